//! The per-session forwarder: owns one outbound TCP connection and drives
//! the writer/reader/watchdog workers that back it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::crypto::SymmetricCipher;
use crate::error::TunnelError;
use crate::reorder::{AssembleError, Chunk, InboundItem, Reassembler};

/// Bound on both the reassembler's per-get wait and the watchdog's grace
/// interval; the two intentionally share one constant (see §4.3).
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub enum NonceMode {
    Get,
    Put,
    Ws,
}

struct Nonces {
    get: StdMutex<f64>,
    put: StdMutex<f64>,
    ws: StdMutex<f64>,
}

impl Default for Nonces {
    fn default() -> Self {
        Self {
            get: StdMutex::new(f64::MIN),
            put: StdMutex::new(f64::MIN),
            ws: StdMutex::new(f64::MIN),
        }
    }
}

struct DrainState {
    rx: mpsc::Receiver<Vec<u8>>,
    out_seq: u64,
}

/// Outcome of draining the outbound queue, used by every transport
/// endpoint that reads outbound data.
pub enum Drained {
    /// At least one item, each tagged with the `out_seq` it was assigned.
    Items(Vec<(u64, Vec<u8>)>),
    /// Nothing arrived before the timeout; session is still open.
    Pending,
    /// Nothing arrived before the timeout and the session is closing;
    /// carries the terminal `out_seq` to report as the EOS marker.
    Closed { out_seq: u64 },
}

pub struct Session {
    pub id: String,
    cipher: SymmetricCipher,
    inbound_tx: mpsc::UnboundedSender<InboundItem>,
    drain: Mutex<DrainState>,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
    watchdog_notify: Notify,
    nonces: Nonces,
    queue_size: usize,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    watchdog_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Connects to the backend and, on success, spawns the writer,
    /// reader, and watchdog tasks. A failed connect never produces a
    /// `Session` — callers must not register anything in the registry.
    pub async fn connect(
        id: String,
        host: &str,
        port: u16,
        cipher: SymmetricCipher,
        queue_size: usize,
        buffer_size: usize,
        reorder_limit: usize,
    ) -> Result<Arc<Session>, TunnelError> {
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            tracing::warn!(host, port, error = %e, "backend connect failed");
            TunnelError::ConnectFailed
        })?;
        configure_keepalive(&stream).map_err(|e| {
            tracing::warn!(error = %e, "failed to configure tcp keepalive");
            TunnelError::ConnectFailed
        })?;
        let (read_half, write_half) = stream.into_split();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<InboundItem>();
        let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(queue_size.max(1));
        let (close_tx, close_rx) = watch::channel(false);

        let session = Arc::new(Session {
            id,
            cipher,
            inbound_tx,
            drain: Mutex::new(DrainState {
                rx: outbound_rx,
                out_seq: 0,
            }),
            closed: AtomicBool::new(false),
            close_tx,
            watchdog_notify: Notify::new(),
            nonces: Nonces::default(),
            queue_size,
            writer_handle: Mutex::new(None),
            reader_handle: Mutex::new(None),
            watchdog_handle: Mutex::new(None),
        });

        let writer_session = session.clone();
        let writer_handle = tokio::spawn(async move {
            writer_task(writer_session, write_half, inbound_rx, reorder_limit).await;
        });

        let reader_session = session.clone();
        let reader_handle = tokio::spawn(async move {
            reader_task(reader_session, read_half, outbound_tx, close_rx, buffer_size).await;
        });

        let watchdog_session = session.clone();
        let watchdog_handle = tokio::spawn(async move {
            watchdog_task(watchdog_session).await;
        });

        *session.writer_handle.lock().await = Some(writer_handle);
        *session.reader_handle.lock().await = Some(reader_handle);
        *session.watchdog_handle.lock().await = Some(watchdog_handle);

        Ok(session)
    }

    pub fn cipher(&self) -> &SymmetricCipher {
        &self.cipher
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn push_chunk(&self, seq: u64, payload: Vec<u8>) {
        let _ = self.inbound_tx.send(Some(Chunk { seq, payload }));
    }

    pub fn ping_watchdog(&self) {
        self.watchdog_notify.notify_one();
    }

    pub fn check_nonce(&self, mode: NonceMode, nonce: f64) -> Result<(), TunnelError> {
        let slot = match mode {
            NonceMode::Get => &self.nonces.get,
            NonceMode::Put => &self.nonces.put,
            NonceMode::Ws => &self.nonces.ws,
        };
        let mut stored = slot.lock().unwrap();
        if nonce > *stored {
            *stored = nonce;
            Ok(())
        } else {
            Err(TunnelError::DuplicatedNonce)
        }
    }

    /// Logout requires a nonce strictly greater than both `put_nonce` and
    /// `get_nonce`, and advances both on success.
    pub fn check_logout_nonce(&self, nonce: f64) -> Result<(), TunnelError> {
        let mut put = self.nonces.put.lock().unwrap();
        let mut get = self.nonces.get.lock().unwrap();
        if nonce > *put && nonce > *get {
            *put = nonce;
            *get = nonce;
            Ok(())
        } else {
            Err(TunnelError::DuplicatedNonce)
        }
    }

    /// Drains up to `queue_size` outbound items, assigning each the next
    /// `out_seq`. Holding the drain lock for the whole call keeps the
    /// increment atomic with the emission, so concurrent drains serialize.
    pub async fn drain(&self, wait: Duration) -> Drained {
        let mut state = self.drain.lock().await;
        match tokio::time::timeout(wait, state.rx.recv()).await {
            Err(_) => {
                if self.is_closed() {
                    state.out_seq += 1;
                    Drained::Closed {
                        out_seq: state.out_seq,
                    }
                } else {
                    Drained::Pending
                }
            }
            Ok(None) => {
                state.out_seq += 1;
                Drained::Closed {
                    out_seq: state.out_seq,
                }
            }
            Ok(Some(first)) => {
                let mut items = Vec::new();
                state.out_seq += 1;
                items.push((state.out_seq, first));
                while items.len() < self.queue_size {
                    match state.rx.try_recv() {
                        Ok(item) => {
                            state.out_seq += 1;
                            items.push((state.out_seq, item));
                        }
                        Err(_) => break,
                    }
                }
                Drained::Items(items)
            }
        }
    }

    /// Idempotent: flips the closed flag and wakes the reader, the writer
    /// (via the inbound sentinel), and the watchdog. Does not join any
    /// task — safe to call from the writer's own termination path.
    fn mark_closed(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.close_tx.send(true);
            let _ = self.inbound_tx.send(None);
            self.watchdog_notify.notify_one();
        }
    }

    /// Marks the session closed, drops any queued outbound items, and
    /// joins the writer and reader tasks. Safe to call concurrently from
    /// the watchdog and an explicit logout; only the first caller does
    /// any work, and each task is joined at most once.
    pub async fn close(&self) {
        self.mark_closed();
        {
            let mut state = self.drain.lock().await;
            while state.rx.try_recv().is_ok() {}
        }
        if let Some(handle) = self.writer_handle.lock().await.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.reader_handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Joins the watchdog task. Called by the registry's reaper, and
    /// explicitly by logout (mirroring the forwarder joining its own
    /// watchdog before the registry ever reaps it).
    pub async fn join_watchdog(&self) {
        if let Some(handle) = self.watchdog_handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}

fn configure_keepalive(stream: &TcpStream) -> std::io::Result<()> {
    let sock_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10))
        .with_retries(3);
    sock_ref.set_tcp_keepalive(&keepalive)
}

async fn writer_task(
    session: Arc<Session>,
    mut write_half: OwnedWriteHalf,
    mut inbound_rx: mpsc::UnboundedReceiver<InboundItem>,
    reorder_limit: usize,
) {
    let mut assembler = Reassembler::new(reorder_limit, WATCHDOG_INTERVAL);
    let mut next_in: u64 = 1;
    loop {
        match assembler.next(next_in, &mut inbound_rx).await {
            Ok(chunk) => {
                next_in = chunk.seq + 1;
                if chunk.payload.is_empty() {
                    tracing::debug!(sid = %session.id, "writer observed end of stream");
                    break;
                }
                if let Err(e) = write_half.write_all(&chunk.payload).await {
                    tracing::warn!(sid = %session.id, error = %e, "backend write failed");
                    break;
                }
            }
            Err(AssembleError::Abort) => {
                tracing::debug!(sid = %session.id, "writer aborted: session closing");
                break;
            }
            Err(AssembleError::Timeout) => {
                tracing::warn!(sid = %session.id, "writer timed out waiting for next chunk");
                break;
            }
            Err(AssembleError::ReorderOverflow) => {
                tracing::warn!(sid = %session.id, "reorder buffer overflow, closing session");
                break;
            }
        }
    }
    let _ = write_half.shutdown().await;
    session.mark_closed();
}

async fn reader_task(
    session: Arc<Session>,
    mut read_half: OwnedReadHalf,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    mut close_rx: watch::Receiver<bool>,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        tokio::select! {
            biased;
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    break;
                }
            }
            result = read_half.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        let _ = outbound_tx.send(Vec::new()).await;
                        let _ = session.inbound_tx.send(None);
                        break;
                    }
                    Ok(n) => {
                        if outbound_tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(sid = %session.id, error = %e, "backend read failed");
                        let _ = outbound_tx.send(Vec::new()).await;
                        let _ = session.inbound_tx.send(None);
                        break;
                    }
                }
            }
        }
    }
}

async fn watchdog_task(session: Arc<Session>) {
    loop {
        if session.is_closed() {
            break;
        }
        match tokio::time::timeout(WATCHDOG_INTERVAL, session.watchdog_notify.notified()).await {
            Ok(()) => continue,
            Err(_) => {
                tracing::warn!(sid = %session.id, "watchdog timeout, closing session");
                session.close().await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt as _;
    use tokio::net::TcpListener;

    async fn echo_backend() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
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
        (addr, handle)
    }

    #[tokio::test]
    async fn ordered_chunks_reach_the_backend_in_order() {
        let (addr, _backend) = echo_backend().await;
        let cipher = SymmetricCipher::from_passphrase(b"pw");
        let session = Session::connect(
            "s1".into(),
            &addr.ip().to_string(),
            addr.port(),
            cipher,
            8,
            1024,
            16,
        )
        .await
        .unwrap();

        session.push_chunk(2, b"B".to_vec());
        session.push_chunk(1, b"A".to_vec());
        session.push_chunk(3, Vec::new());

        let drained = session.drain(Duration::from_millis(500)).await;
        let items = match drained {
            Drained::Items(items) => items,
            _ => panic!("expected echoed bytes"),
        };
        let received: Vec<u8> = items.into_iter().flat_map(|(_, bytes)| bytes).collect();
        assert_eq!(received, b"AB");
    }

    #[tokio::test]
    async fn connect_failure_never_yields_a_session() {
        let cipher = SymmetricCipher::from_passphrase(b"pw");
        let result = Session::connect("s2".into(), "127.0.0.1", 1, cipher, 8, 1024, 16).await;
        assert!(matches!(result, Err(TunnelError::ConnectFailed)));
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_closes_a_session_with_no_activity() {
        let (addr, _backend) = echo_backend().await;
        let cipher = SymmetricCipher::from_passphrase(b"pw");
        let session = Session::connect(
            "s5".into(),
            &addr.ip().to_string(),
            addr.port(),
            cipher,
            8,
            1024,
            16,
        )
        .await
        .unwrap();
        assert!(!session.is_closed());

        tokio::time::advance(WATCHDOG_INTERVAL + Duration::from_secs(1)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn nonce_must_strictly_increase() {
        let (addr, _backend) = echo_backend().await;
        let cipher = SymmetricCipher::from_passphrase(b"pw");
        let session = Session::connect(
            "s3".into(),
            &addr.ip().to_string(),
            addr.port(),
            cipher,
            8,
            1024,
            16,
        )
        .await
        .unwrap();
        assert!(session.check_nonce(NonceMode::Put, 1.0).is_ok());
        assert!(matches!(
            session.check_nonce(NonceMode::Put, 1.0),
            Err(TunnelError::DuplicatedNonce)
        ));
        assert!(session.check_nonce(NonceMode::Put, 1.1).is_ok());
    }
}
