use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use lanlink_shared::CryptoError;
use lanlink_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// No resolvable group key for the client's address.  User-facing,
    /// non-retryable, surfaced to the joining client only.
    #[error("Invalid IP address or local network")]
    InvalidNetwork,

    /// Connection rejected before any state mutation.
    #[error("Authentication error")]
    NotAuthenticated,

    /// Durable-store I/O failure; logged and surfaced as a generic error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::InvalidNetwork => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::NotAuthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Store(_) | ServerError::Crypto(_) | ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
