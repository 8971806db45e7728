use std::net::SocketAddr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs8::DecodePublicKey;
use rsa::Oaep;
use sha2::Sha256;
use tokio::net::TcpListener;

use tunnel_server::crypto::{RsaKeys, SymmetricCipher};
use tunnel_server::http::{build_router, AppState};
use tunnel_server::registry::Registry;

pub struct TestServer {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Spins up a real server on `127.0.0.1:0`, mirroring the teacher's own
/// `TcpListener::bind` + `tokio::spawn(axum::serve(..))` test harness.
pub async fn spawn_server(max_sessions: usize, queue_size: usize, reorder_limit: usize) -> TestServer {
    let rsa = Arc::new(RsaKeys::generate().unwrap());
    let registry = Arc::new(Registry::new(max_sessions, queue_size, 8192, reorder_limit));
    let state = AppState { registry, rsa };
    let router = build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = reqwest::Client::builder().cookie_store(true).build().unwrap();
    TestServer { addr, client }
}

/// An in-memory TCP backend that echoes everything it reads, standing in
/// for the teacher's testcontainers-backed Postgres fixtures (no database
/// is needed here).
pub async fn spawn_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            tokio::spawn(async move {
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// RSA-OAEP(SHA-256)-encrypts `passphrase` against the server's PEM,
/// mirroring what a real client does with the key handed out by `GET /`.
pub fn encrypt_secret(pem: &str, passphrase: &[u8]) -> String {
    let public = rsa::RsaPublicKey::from_public_key_pem(pem).unwrap();
    let mut rng = rand::thread_rng();
    let ciphertext = public.encrypt(&mut rng, Oaep::new::<Sha256>(), passphrase).unwrap();
    BASE64.encode(ciphertext)
}

pub fn cipher_for(passphrase: &[u8]) -> SymmetricCipher {
    SymmetricCipher::from_passphrase(passphrase)
}
