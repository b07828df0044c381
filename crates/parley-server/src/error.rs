use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parley_shared::protocol::ErrorResponse;
use parley_shared::PayloadError;
use parley_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Send payload without text or image.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// Store failure or timeout.
    #[error("Storage unavailable: {0}")]
    Transport(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl ServerError {
    /// Replace the generic not-found text with one naming the missing record.
    pub fn not_found_as(self, what: &str) -> Self {
        match self {
            ServerError::NotFound(_) => ServerError::NotFound(what.to_string()),
            other => other,
        }
    }
}

impl From<PayloadError> for ServerError {
    fn from(err: PayloadError) -> Self {
        ServerError::Validation(err.to_string())
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServerError::NotFound("Record not found".into()),
            other => ServerError::Transport(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Transport(detail) => {
                tracing::error!(error = %detail, "Store failure");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Storage unavailable".to_string(),
                )
            }
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        (status, axum::Json(ErrorResponse::new(message))).into_response()
    }
}
