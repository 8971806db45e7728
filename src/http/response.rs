//! The session response envelope shared by long-poll, body, and
//! WebSocket transports, plus the cookie the client carries between them.

use axum_extra::extract::cookie::Cookie;
use serde::Serialize;

use crate::session::{Drained, Session};

#[derive(Serialize)]
pub struct SessionEnvelope {
    #[serde(rename = "Error")]
    pub error: Option<String>,
    pub tokenid: Option<String>,
    pub token: Option<String>,
    pub sid: String,
}

/// Builds the envelope for a drain outcome, encrypting sequence numbers
/// and payloads under the session's cipher per the wire encoding in §6.
pub fn build_envelope(session: &Session, drained: Drained) -> SessionEnvelope {
    match drained {
        Drained::Pending => SessionEnvelope {
            error: None,
            tokenid: None,
            token: None,
            sid: session.id.clone(),
        },
        Drained::Closed { out_seq } => SessionEnvelope {
            error: Some("Timeout".to_owned()),
            tokenid: Some(session.cipher().encrypt(out_seq.to_string().as_bytes())),
            token: Some(session.cipher().encrypt(&[])),
            sid: session.id.clone(),
        },
        Drained::Items(items) => {
            let seqs = items
                .iter()
                .map(|(seq, _)| seq.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            let tokenid = session.cipher().encrypt(seqs.as_bytes());
            let token = items
                .iter()
                .map(|(_, payload)| session.cipher().encrypt(payload))
                .collect::<Vec<_>>()
                .join(" ");
            SessionEnvelope {
                error: None,
                tokenid: Some(tokenid),
                token: Some(token),
                sid: session.id.clone(),
            }
        }
    }
}

/// `true` once the terminal end-of-stream item has been delivered; callers
/// that loop (the WebSocket sender) stop after this point.
pub fn is_terminal(drained: &Drained) -> bool {
    matches!(drained, Drained::Closed { .. })
}

pub fn sid_cookie(sid: &str) -> Cookie<'static> {
    Cookie::build((crate::http::SID_COOKIE, sid.to_owned()))
        .path("/api/")
        .build()
}
