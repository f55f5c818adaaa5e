//! API error types and helpers.
//!
//! # Purpose
//! Centralizes HTTP error response construction so every queue endpoint
//! returns the same error shape.
//!
//! # Key invariants and assumptions
//! - Only rejections the engine marks user-visible carry their display text
//!   to the caller; everything else logs server-side and returns a generic
//!   internal error.
use crate::api::types::ErrorResponse;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use postbox_queue::QueueError;

/// Structured API error returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Build a 403 from a user-visible rejection, carrying its display text.
pub fn api_rejected(err: &QueueError) -> ApiError {
    let code = match err {
        QueueError::QueueFull => "queue_full",
        QueueError::MessageTooLarge { .. } => "message_too_large",
        _ => "rejected",
    };
    ApiError {
        status: StatusCode::FORBIDDEN,
        body: ErrorResponse {
            code: code.to_string(),
            message: err.to_string(),
        },
    }
}

/// Build a 500 from an engine error.
///
/// Logs the error server-side for debugging; the caller only sees the
/// provided generic message.
pub fn api_internal(message: &str, err: &QueueError) -> ApiError {
    tracing::error!(error = ?err, "gateway queue error");
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorResponse {
            code: "internal".to_string(),
            message: message.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postbox_queue::StorageError;

    #[test]
    fn rejections_map_to_forbidden_with_specific_codes() {
        let full = api_rejected(&QueueError::QueueFull);
        assert_eq!(full.status, StatusCode::FORBIDDEN);
        assert_eq!(full.body.code, "queue_full");
        assert_eq!(full.body.message, "queue size exceeded");

        let large = api_rejected(&QueueError::MessageTooLarge {
            size: 20_000,
            limit: 10_240,
        });
        assert_eq!(large.status, StatusCode::FORBIDDEN);
        assert_eq!(large.body.code, "message_too_large");
        assert!(large.body.message.contains("20000"));
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = QueueError::Storage(StorageError::NotFound);
        let api = api_internal("failed to delete message", &err);
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.body.code, "internal");
        assert_eq!(api.body.message, "failed to delete message");
    }
}
