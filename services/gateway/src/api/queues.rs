//! Queue API handlers.
//!
//! # Purpose
//! Implements the put/get/delete/take endpoints over the queue hub. The
//! trailing `:signature` path segment is accepted and ignored here; signature
//! verification belongs to the session middleware, not the gateway.
use crate::api::error::{ApiError, api_internal, api_rejected};
use crate::api::types::MessageResponse;
use crate::app::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use postbox_queue::{Message, MessageId, QueueError};

pub(crate) async fn put_message(
    Path((domain, queue_name)): Path<(String, String)>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    match state.hub.put(&domain, &queue_name, body).await {
        Ok(_) => Ok(StatusCode::OK),
        Err(err) if err.is_user_visible() => Err(api_rejected(&err)),
        Err(err) => Err(api_internal("failed to store message", &err)),
    }
}

pub(crate) async fn get_message(
    Path((domain, queue_name, _signature)): Path<(String, String, String)>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    match state
        .hub
        .get(&domain, &queue_name, state.connection_timeout)
        .await
    {
        Ok(Some(message)) => Ok(message_response(message).into_response()),
        // Nothing arrived within the connection timeout.
        Ok(None) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(err) => Err(api_internal("failed to read message", &err)),
    }
}

pub(crate) async fn take_message(
    Path((domain, queue_name, _signature)): Path<(String, String, String)>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    match state
        .hub
        .take(&domain, &queue_name, state.connection_timeout)
        .await
    {
        Ok(Some(message)) => Ok(message_response(message).into_response()),
        Ok(None) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(err) => Err(api_internal("failed to take message", &err)),
    }
}

pub(crate) async fn delete_message(
    Path((domain, queue_name, message_id, _signature)): Path<(String, String, String, String)>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    // Failures are not distinguished for the caller: a malformed id, a
    // missing entry and an I/O error all answer 500.
    let id: MessageId = message_id
        .parse()
        .map_err(|err| api_internal("failed to delete message", &QueueError::Storage(err)))?;
    match state.hub.delete(&domain, &queue_name, &id).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(err) => Err(api_internal("failed to delete message", &err)),
    }
}

fn message_response(message: Message) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: String::from_utf8_lossy(&message.payload).into_owned(),
        message_id: message.id.to_string(),
    })
}
