use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::errors::CollaboratorError;
use crate::model::ValidationError;

/// Error returned by HTTP handlers.
///
/// Renders as `{"error": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A collaborator call failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// The submission was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A message could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Optimistic concurrency retries ran out.
    #[error("Gave up after {attempts} conflicting writes to '{key}'")]
    RetriesExhausted {
        /// Contended row.
        key: String,
        /// Attempts made.
        attempts: usize,
    },
}

/// Handler result.
pub type ApiResult<T> = Result<T, ApiError>;

fn internal(err: &ApiError) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %err, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Collaborator(err) => match err {
                CollaboratorError::NotFound { .. } => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
                }
                CollaboratorError::AlreadyExists { .. } | CollaboratorError::Conflict { .. } => {
                    (StatusCode::CONFLICT, "CONFLICT", err.to_string())
                }
                CollaboratorError::Unavailable { .. } | CollaboratorError::Serialization(_) => {
                    internal(&self)
                }
            },
            ApiError::Validation(err) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string())
            }
            ApiError::RetriesExhausted { .. } => {
                (StatusCode::CONFLICT, "CONFLICT", self.to_string())
            }
            ApiError::Serialization(_) => internal(&self),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
