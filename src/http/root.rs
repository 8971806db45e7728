use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::error::TunnelError;
use crate::http::AppState;

/// The sole unauthenticated entry point: hands out the server's RSA
/// public key so a client can encrypt its passphrase toward it.
pub async fn root(State(state): State<AppState>) -> Result<Response, TunnelError> {
    let pem = state.rsa.public_pem()?;
    Ok(([(header::CONTENT_TYPE, "text/plain")], pem).into_response())
}
