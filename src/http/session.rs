use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use crate::error::TunnelError;
use crate::http::response::{build_envelope, sid_cookie};
use crate::http::{ws, AppState};
use crate::session::{NonceMode, Session};

const PUT_DRAIN_GET: Duration = Duration::from_millis(50);
const PUT_DRAIN_BODY: Duration = Duration::from_millis(20);
const GET_LONG_POLL: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
pub struct SessionQuery {
    sid: Option<String>,
    nonce: Option<String>,
    tokenid: Option<String>,
    token: Option<String>,
}

/// Looks up the session, validates the nonce for `mode`, and (unless this
/// is the GET long-poll path, which detects closure itself in `drain`)
/// rejects an already-closing session with 409.
async fn authenticate(
    state: &AppState,
    sid: &str,
    nonce_b64: &str,
    mode: NonceMode,
    enforce_closed_check: bool,
) -> Result<Arc<Session>, TunnelError> {
    let session = state.registry.lookup(sid).await?;
    let nonce_str = session
        .cipher()
        .decrypt_utf8(nonce_b64)
        .map_err(|_| TunnelError::InvalidNonce)?;
    let nonce: f64 = nonce_str.parse().map_err(|_| TunnelError::InvalidNonce)?;
    if enforce_closed_check && session.is_closed() {
        state.registry.reap().await;
        return Err(TunnelError::SessionAlreadyClosed);
    }
    session.check_nonce(mode, nonce)?;
    Ok(session)
}

/// Decrypts `tokenid` to a space-joined list of sequence numbers and
/// `token` to a space-joined list of base64 ciphertexts, zips them, and
/// pushes each chunk. Stops after the first zero-length payload.
pub(crate) fn enqueue_chunks(
    session: &Session,
    tokenid: &str,
    token: &str,
) -> Result<(), TunnelError> {
    let seqs_str = session
        .cipher()
        .decrypt_utf8(tokenid)
        .map_err(|_| TunnelError::InvalidTokenId)?;
    let seqs = seqs_str
        .split_whitespace()
        .map(|s| s.parse::<u64>().map_err(|_| TunnelError::InvalidTokenId))
        .collect::<Result<Vec<u64>, TunnelError>>()?;
    let payloads: Vec<&str> = token.split_whitespace().collect();
    for (seq, payload_b64) in seqs.into_iter().zip(payloads) {
        let payload = session
            .cipher()
            .decrypt(payload_b64)
            .map_err(|_| TunnelError::InvalidToken)?;
        let is_eos = payload.is_empty();
        session.push_chunk(seq, payload);
        if is_eos {
            break;
        }
    }
    Ok(())
}

fn drain_response(session: &Session, drained: crate::session::Drained) -> Response {
    let status = match &drained {
        crate::session::Drained::Pending => axum::http::StatusCode::ACCEPTED,
        _ => axum::http::StatusCode::OK,
    };
    let envelope = build_envelope(session, drained);
    (status, sid_cookie(&session.id), Json(envelope)).into_response()
}

/// `GET /api/session`. Either a WebSocket upgrade (authenticated from
/// cookies), a short put-then-drain when `tokenid`/`token` are present, or
/// a 10s long-poll drain otherwise.
pub async fn session_get(
    State(state): State<AppState>,
    upgrade: Option<WebSocketUpgrade>,
    jar: CookieJar,
    Query(q): Query<SessionQuery>,
) -> Result<Response, TunnelError> {
    if let Some(upgrade) = upgrade {
        let sid = jar
            .get(crate::http::SID_COOKIE)
            .map(|c| c.value().to_owned())
            .ok_or(TunnelError::SessionIdNotFound)?;
        let nonce = jar
            .get(crate::http::NONCE_COOKIE)
            .map(|c| c.value().to_owned())
            .ok_or(TunnelError::InvalidNonce)?;
        let session = authenticate(&state, &sid, &nonce, NonceMode::Ws, true).await?;
        return Ok(upgrade.on_upgrade(move |socket| ws::handle_socket(socket, session)));
    }

    match (q.tokenid.as_deref(), q.token.as_deref()) {
        (Some(tokenid), Some(token)) => {
            let sid = q.sid.ok_or(TunnelError::SessionIdNotFound)?;
            let nonce = q.nonce.ok_or(TunnelError::InvalidNonce)?;
            let session = authenticate(&state, &sid, &nonce, NonceMode::Put, true).await?;
            enqueue_chunks(&session, tokenid, token)?;
            let drained = session.drain(PUT_DRAIN_GET).await;
            session.ping_watchdog();
            Ok(drain_response(&session, drained))
        }
        _ => {
            let sid = q.sid.ok_or(TunnelError::SessionIdNotFound)?;
            let nonce = q.nonce.ok_or(TunnelError::InvalidNonce)?;
            let session = authenticate(&state, &sid, &nonce, NonceMode::Get, false).await?;
            let drained = session.drain(GET_LONG_POLL).await;
            session.ping_watchdog();
            Ok(drain_response(&session, drained))
        }
    }
}

/// `POST|PUT|DELETE|PATCH /api/session`: identical to the GET-with-tokenid
/// path, but with a shorter drain timeout.
pub async fn session_body(
    State(state): State<AppState>,
    Query(q): Query<SessionQuery>,
) -> Result<Response, TunnelError> {
    let sid = q.sid.ok_or(TunnelError::SessionIdNotFound)?;
    let nonce = q.nonce.ok_or(TunnelError::InvalidNonce)?;
    let tokenid = q.tokenid.ok_or(TunnelError::InvalidTokenId)?;
    let token = q.token.ok_or(TunnelError::InvalidToken)?;

    let session = authenticate(&state, &sid, &nonce, NonceMode::Put, true).await?;
    enqueue_chunks(&session, &tokenid, &token)?;
    let drained = session.drain(PUT_DRAIN_BODY).await;
    session.ping_watchdog();
    Ok(drain_response(&session, drained))
}
