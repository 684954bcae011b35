//! API error handling
//!
//! Maps the engine error taxonomy onto HTTP status codes with structured
//! bodies and request tracking.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::EngineError;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub request_id: String,
    pub error: ErrorBody,
}

/// Error body with the stable symbolic code from the engine taxonomy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Symbolic code (SESSION_NOT_FOUND, WAGER_MISMATCH, ...)
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Whether the caller may usefully retry the same request
    pub retryable: bool,
}

/// An engine error bound to the request that produced it
#[derive(Debug)]
pub struct ApiError {
    pub engine: EngineError,
    pub request_id: String,
}

impl ApiError {
    pub fn new(request_id: String, engine: EngineError) -> Self {
        Self { engine, request_id }
    }

    fn status(&self) -> StatusCode {
        match &self.engine {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Auth(_) => StatusCode::FORBIDDEN,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Store(_) | EngineError::Chain(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.request_id, self.engine)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(request_id = %self.request_id, error = %self.engine, "request failed");
        }

        let body = Json(ErrorResponse {
            success: false,
            request_id: self.request_id,
            error: ErrorBody {
                code: self.engine.code().to_string(),
                message: self.engine.to_string(),
                retryable: self.engine.retryable(),
            },
        });

        (status, body).into_response()
    }
}
