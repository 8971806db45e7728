use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// The full error taxonomy surfaced to clients, centralized so handlers can
/// return `Result<T, TunnelError>` and use `?` instead of building JSON
/// bodies at each call site.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("invalid secret")]
    InvalidSecret,
    #[error("invalid token")]
    InvalidToken,
    #[error("invalid nonce")]
    InvalidNonce,
    #[error("invalid tokenid")]
    InvalidTokenId,
    #[error("duplicated nonce")]
    DuplicatedNonce,
    #[error("session id not found")]
    SessionIdNotFound,
    #[error("session already closed")]
    SessionAlreadyClosed,
    #[error("too many sessions")]
    TooManySessions,
    #[error("connect failed")]
    ConnectFailed,
}

impl TunnelError {
    fn status(&self) -> StatusCode {
        match self {
            TunnelError::InvalidSecret
            | TunnelError::InvalidToken
            | TunnelError::InvalidNonce
            | TunnelError::InvalidTokenId => StatusCode::BAD_REQUEST,
            TunnelError::DuplicatedNonce => StatusCode::FORBIDDEN,
            TunnelError::SessionIdNotFound => StatusCode::NOT_FOUND,
            TunnelError::SessionAlreadyClosed => StatusCode::CONFLICT,
            TunnelError::TooManySessions => StatusCode::TOO_MANY_REQUESTS,
            TunnelError::ConnectFailed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Name used in the `Error` field of the session response envelope.
    pub fn wire_name(&self) -> &'static str {
        match self {
            TunnelError::InvalidSecret => "InvalidSecret",
            TunnelError::InvalidToken => "InvalidToken",
            TunnelError::InvalidNonce => "InvalidNonce",
            TunnelError::InvalidTokenId => "InvalidTokenId",
            TunnelError::DuplicatedNonce => "DuplicatedNonce",
            TunnelError::SessionIdNotFound => "SessionIDNotFound",
            TunnelError::SessionAlreadyClosed => "SessionAlreadyClosed",
            TunnelError::TooManySessions => "TooManySessions",
            TunnelError::ConnectFailed => "ConnectFailed",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    #[serde(rename = "Error")]
    error: String,
}

impl IntoResponse for TunnelError {
    fn into_response(self) -> Response {
        match self.status() {
            StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                tracing::warn!(error = self.wire_name(), "rejecting request");
            }
            _ => tracing::error!(error = self.wire_name(), "request failed"),
        }
        (
            self.status(),
            Json(ErrorBody {
                error: self.wire_name().to_owned(),
            }),
        )
            .into_response()
    }
}
