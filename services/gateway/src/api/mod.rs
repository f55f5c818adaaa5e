//! Gateway HTTP API module.
//!
//! # Purpose
//! Exposes the queue route handlers and the shared error/response types.
pub mod error;
pub mod queues;
pub mod types;
