//! HTTP API accepting resize actions from the dispatcher
//!
//! # API Endpoints
//!
//! - `POST /api/v1/actions/resize` - Execute one resize action and report its outcome
//! - `GET /healthz` - Liveness probe
//!
//! The response body is always an [`api_types::ActionResponse`]; the status
//! code mirrors the outcome (`200`, `503` for retryable failures, `422` for
//! permanent ones).

use core::error::Error;

pub mod handlers;
pub mod server;

/// API errors
#[derive(Debug, derive_more::Display)]
pub enum ApiError {
    #[display("Server error: {message}")]
    ServerError { message: String },
}

impl Error for ApiError {}
