//! Error taxonomy for caller-facing chat operations.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::history::StoreUnavailable;
use crate::session::IdentityPersistenceError;

/// Failure of a caller-facing chat operation.
///
/// None of these are retried by the crate; retry is caller policy. Provider
/// failures never surface here: generation starts lazily, so they arrive as
/// [`Interruption::Failed`](crate::chat::Interruption::Failed) in the event
/// stream.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The session token could not be read or written.
    #[error(transparent)]
    IdentityPersistence(#[from] IdentityPersistenceError),

    /// The history store failed. Never masked by an empty history.
    #[error(transparent)]
    StoreUnavailable(#[from] StoreUnavailable),

    /// The request itself is unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ChatError {
    /// Stable, machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::IdentityPersistence(_) => "identity_persistence",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::InvalidInput(_) => "invalid_input",
        }
    }

    /// HTTP status used when the error ends a request.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::IdentityPersistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Request rejected");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
