//! Process-wide mapping from session id to [`Session`], bounded by
//! `max_sessions` and reaped lazily.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::crypto::SymmetricCipher;
use crate::error::TunnelError;
use crate::session::Session;

/// `None` marks a reserved slot: a login in flight that has claimed
/// capacity but has not yet finished connecting to its backend.
pub struct Registry {
    sessions: Mutex<HashMap<String, Option<Arc<Session>>>>,
    max_sessions: usize,
    queue_size: usize,
    buffer_size: usize,
    reorder_limit: usize,
}

impl Registry {
    pub fn new(max_sessions: usize, queue_size: usize, buffer_size: usize, reorder_limit: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
            queue_size,
            buffer_size,
            reorder_limit,
        }
    }

    /// Removes every session whose TCP socket is already closed, joining
    /// its watchdog task first. Reserved (still-connecting) slots are left
    /// alone. Must run before any capacity check.
    pub async fn reap(&self) {
        let dead: Vec<String> = {
            let map = self.sessions.lock().await;
            map.iter()
                .filter(|(_, slot)| slot.as_ref().is_some_and(|s| s.is_closed()))
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in dead {
            let removed = self.sessions.lock().await.remove(&id);
            if let Some(Some(session)) = removed {
                session.join_watchdog().await;
                tracing::info!(sid = %id, "session reaped");
            }
        }
    }

    /// Connects to `host:port` and, on success, registers a new session
    /// under a fresh UUID. The capacity check and the slot reservation
    /// happen under the same lock acquisition, so two concurrent logins at
    /// the cap boundary cannot both pass: the reservation itself counts
    /// against `max_sessions` for as long as the connect is in flight.
    pub async fn login(
        &self,
        host: &str,
        port: u16,
        cipher: SymmetricCipher,
    ) -> Result<Arc<Session>, TunnelError> {
        self.reap().await;

        let id = {
            let mut map = self.sessions.lock().await;
            if map.len() >= self.max_sessions {
                return Err(TunnelError::TooManySessions);
            }
            let mut candidate = Uuid::new_v4().to_string();
            while map.contains_key(&candidate) {
                candidate = Uuid::new_v4().to_string();
            }
            map.insert(candidate.clone(), None);
            candidate
        };

        let connected = Session::connect(
            id.clone(),
            host,
            port,
            cipher,
            self.queue_size,
            self.buffer_size,
            self.reorder_limit,
        )
        .await;

        let session = match connected {
            Ok(session) => session,
            Err(e) => {
                self.sessions.lock().await.remove(&id);
                return Err(e);
            }
        };

        self.sessions.lock().await.insert(id, Some(session.clone()));
        tracing::info!(sid = %session.id, host, port, "session opened");
        Ok(session)
    }

    pub async fn lookup(&self, id: &str) -> Result<Arc<Session>, TunnelError> {
        self.sessions
            .lock()
            .await
            .get(id)
            .and_then(|slot| slot.clone())
            .ok_or(TunnelError::SessionIdNotFound)
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.remove(id).flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn open_backend() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn rejects_logins_past_capacity() {
        let addr = open_backend().await;
        let registry = Registry::new(1, 8, 1024, 16);
        let cipher = SymmetricCipher::from_passphrase(b"pw");
        let first = registry
            .login(&addr.ip().to_string(), addr.port(), cipher.clone())
            .await;
        assert!(first.is_ok());

        let second = registry
            .login(&addr.ip().to_string(), addr.port(), cipher)
            .await;
        assert!(matches!(second, Err(TunnelError::TooManySessions)));
    }

    #[tokio::test]
    async fn connect_failure_does_not_register_a_session() {
        let registry = Registry::new(4, 8, 1024, 16);
        let cipher = SymmetricCipher::from_passphrase(b"pw");
        let result = registry.login("127.0.0.1", 1, cipher).await;
        assert!(matches!(result, Err(TunnelError::ConnectFailed)));
    }

    #[tokio::test]
    async fn lookup_of_unknown_id_is_not_found() {
        let registry = Registry::new(4, 8, 1024, 16);
        assert!(matches!(
            registry.lookup("missing").await,
            Err(TunnelError::SessionIdNotFound)
        ));
    }
}
