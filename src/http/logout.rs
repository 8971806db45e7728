use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::TunnelError;
use crate::http::AppState;

#[derive(Deserialize)]
pub struct LogoutQuery {
    sid: String,
    nonce: String,
}

#[derive(Serialize)]
struct LogoutResponse {
    #[serde(rename = "Error")]
    error: Option<String>,
}

/// Requires a nonce strictly greater than both `put_nonce` and
/// `get_nonce`. Closes the session, joins its watchdog, removes it from
/// the registry, then reaps again (mirroring the double cleanup pass the
/// original forwarder performs on logout).
pub async fn logout(
    State(state): State<AppState>,
    Query(q): Query<LogoutQuery>,
) -> Result<Response, TunnelError> {
    let session = state.registry.lookup(&q.sid).await?;
    let nonce_str = session
        .cipher()
        .decrypt_utf8(&q.nonce)
        .map_err(|_| TunnelError::InvalidNonce)?;
    let nonce: f64 = nonce_str.parse().map_err(|_| TunnelError::InvalidNonce)?;
    session.check_logout_nonce(nonce)?;

    session.close().await;
    session.join_watchdog().await;
    state.registry.remove(&q.sid).await;
    state.registry.reap().await;

    Ok(Json(LogoutResponse { error: None }).into_response())
}
