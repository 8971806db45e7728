use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};

use crate::crypto::SymmetricCipher;
use crate::error::TunnelError;
use crate::http::{response::sid_cookie, AppState};

#[derive(Deserialize)]
pub struct LoginQuery {
    secret: String,
    token: String,
}

#[derive(Serialize)]
struct LoginResponse {
    #[serde(rename = "Error")]
    error: Option<String>,
    sid: String,
}

/// `secret` is the passphrase encrypted toward the server's RSA public
/// key; `token` is that passphrase's symmetric encryption of the
/// `host:port` backend target.
pub async fn login(
    State(state): State<AppState>,
    Query(q): Query<LoginQuery>,
) -> Result<Response, TunnelError> {
    let passphrase = state.rsa.decrypt(&q.secret)?;
    let cipher = SymmetricCipher::from_passphrase(&passphrase);
    let target = cipher.decrypt_utf8(&q.token)?;
    let (host, port) = split_target(&target)?;

    let session = state.registry.login(host, port, cipher).await?;

    let jar = CookieJar::new().add(sid_cookie(&session.id));
    Ok((
        jar,
        Json(LoginResponse {
            error: None,
            sid: session.id.clone(),
        }),
    )
        .into_response())
}

fn split_target(target: &str) -> Result<(&str, u16), TunnelError> {
    let (host, port) = target.rsplit_once(':').ok_or(TunnelError::InvalidToken)?;
    let port: u16 = port.parse().map_err(|_| TunnelError::InvalidToken)?;
    Ok((host, port))
}
