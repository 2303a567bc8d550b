//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints, mapping internal errors to appropriate HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use omnisia_chat::ChatError;
use omnisia_core::error::OmnisiaError;
use omnisia_train::TrainingError;
use omnisia_vector::IndexError;
use serde::{Deserialize, Serialize};

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 401 Unauthorized - missing or wrong bearer token.
    Unauthorized(String),
    /// 404 Not Found - resource does not exist.
    NotFound(String),
    /// 409 Conflict - request disagrees with current state.
    Conflict(String),
    /// 422 Unprocessable Entity - valid syntax but semantic validation failure.
    UnprocessableEntity(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// 503 Service Unavailable - component not ready.
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_code, message) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg),
            ApiError::Unauthorized(msg) => ("unauthorized", msg),
            ApiError::NotFound(msg) => ("not_found", msg),
            ApiError::Conflict(msg) => ("conflict", msg),
            ApiError::UnprocessableEntity(msg) => ("unprocessable_entity", msg),
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal API error");
                ("internal_error", msg)
            }
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::InvalidArgument(_) => ApiError::BadRequest(err.to_string()),
            IndexError::Embedding(_) => ApiError::ServiceUnavailable(err.to_string()),
            IndexError::DimensionMismatch { .. } => ApiError::Conflict(err.to_string()),
            IndexError::Persistence(_) | IndexError::LockPoisoned => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::EmptyMessage | ChatError::EmptyContext => {
                ApiError::BadRequest(err.to_string())
            }
            ChatError::MessageTooLong(_) | ChatError::ContextTooLong(_) => {
                ApiError::UnprocessableEntity(err.to_string())
            }
            ChatError::Index(e) => e.into(),
        }
    }
}

impl From<TrainingError> for ApiError {
    fn from(err: TrainingError) -> Self {
        match err {
            TrainingError::UnsupportedModel(_) => ApiError::BadRequest(err.to_string()),
            TrainingError::DatasetNotFound(_) => ApiError::UnprocessableEntity(err.to_string()),
            TrainingError::JobNotFound(_) => ApiError::NotFound(err.to_string()),
            TrainingError::InvalidTransition(..) => ApiError::Conflict(err.to_string()),
            TrainingError::Runner(_) | TrainingError::LockPoisoned => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<OmnisiaError> for ApiError {
    fn from(err: OmnisiaError) -> Self {
        match &err {
            OmnisiaError::Config(msg) => ApiError::BadRequest(msg.clone()),
            OmnisiaError::Upload(msg) => ApiError::UnprocessableEntity(msg.clone()),
            OmnisiaError::Embedding(msg) => ApiError::ServiceUnavailable(msg.clone()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
