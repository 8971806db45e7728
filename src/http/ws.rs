use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::http::response::{build_envelope, is_terminal};
use crate::http::session::enqueue_chunks;
use crate::session::Session;

const WS_LONG_POLL: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct WsInbound {
    tokenid: String,
    token: String,
}

/// Two cooperative tasks run for the life of the connection: `recv`
/// parses inbound frames and enqueues chunks, `send` long-polls the
/// outbound queue and pushes each batch as a frame. Either side ending
/// closes the socket.
pub async fn handle_socket(socket: WebSocket, session: Arc<Session>) {
    let (mut sink, mut stream) = socket.split();

    let recv_session = session.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<WsInbound>(&text) {
                    Ok(frame) => {
                        if enqueue_chunks(&recv_session, &frame.tokenid, &frame.token).is_ok() {
                            recv_session.ping_watchdog();
                        } else {
                            tracing::warn!(sid = %recv_session.id, "ws inbound frame rejected");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(sid = %recv_session.id, error = %e, "ws frame was not valid json");
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let send_session = session.clone();
    let send_task = tokio::spawn(async move {
        loop {
            let drained = send_session.drain(WS_LONG_POLL).await;
            let terminal = is_terminal(&drained);
            let envelope = build_envelope(&send_session, drained);
            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(_) => break,
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
            if terminal {
                break;
            }
            send_session.ping_watchdog();
        }
    });

    let _ = tokio::join!(recv_task, send_task);
}
