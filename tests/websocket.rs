mod support;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::Message;

use support::{cipher_for, encrypt_secret, spawn_echo_backend, spawn_server};

#[tokio::test]
async fn websocket_session_round_trips_a_chunk() {
    let backend_addr = spawn_echo_backend().await;
    let server = spawn_server(16, 16, 16).await;

    let pem = server
        .client
        .get(server.url("/"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let passphrase = b"ws-pass";
    let secret = encrypt_secret(&pem, passphrase);
    let cipher = cipher_for(passphrase);
    let target = format!("{}:{}", backend_addr.ip(), backend_addr.port());
    let token = cipher.encrypt(target.as_bytes());

    let login: Value = server
        .client
        .get(server.url("/api/login"))
        .query(&[("secret", secret), ("token", token)])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let sid = login["sid"].as_str().unwrap().to_owned();

    let nonce = cipher.encrypt(1.0_f64.to_string().as_bytes());
    let request = Request::builder()
        .uri(format!("ws://{}/api/session", server.addr))
        .header("Host", server.addr.to_string())
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tokio_tungstenite::tungstenite::handshake::client::generate_key(),
        )
        .header("Cookie", format!("sid={}; nonce={}", sid, nonce))
        .body(())
        .unwrap();

    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    let seqs = "1";
    let tokenid = cipher.encrypt(seqs.as_bytes());
    let payload = cipher.encrypt(b"ping");
    let frame = json!({ "tokenid": tokenid, "token": payload });
    ws.send(Message::Text(frame.to_string())).await.unwrap();

    let mut received = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        let Some(Ok(Message::Text(text))) = ws.next().await else {
            continue;
        };
        let envelope: Value = serde_json::from_str(&text).unwrap();
        if let Some(token) = envelope["token"].as_str() {
            for part in token.split(' ') {
                received.extend(cipher.decrypt(part).unwrap());
            }
            if !received.is_empty() {
                break;
            }
        }
    }

    assert_eq!(received, b"ping");
}
