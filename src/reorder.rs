//! Reassembles an ordered byte stream from inbound chunks that may arrive
//! out of order across concurrent HTTP/WebSocket requests.

use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// One inbound unit of the client to backend stream. A zero-length
/// `payload` is the in-band end-of-stream marker.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub seq: u64,
    pub payload: Vec<u8>,
}

/// Sentinel item posted to the inbound queue to unblock the assembler on
/// session close. `None` plays the role of Python's `iqueue.put(None)`.
pub type InboundItem = Option<Chunk>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AssembleError {
    #[error("session closed")]
    Abort,
    #[error("no chunk arrived before the watchdog interval elapsed")]
    Timeout,
    #[error("reorder buffer exceeded its configured limit")]
    ReorderOverflow,
}

/// Single-consumer reassembler. Only the writer task may call this; `rx`
/// and `buffer` are owned exclusively by that task for the session's
/// lifetime.
pub struct Reassembler {
    limit: usize,
    wait: Duration,
    buffer: Vec<Chunk>,
}

impl Reassembler {
    pub fn new(limit: usize, wait: Duration) -> Self {
        Self {
            limit,
            wait,
            buffer: Vec::new(),
        }
    }

    /// Returns the next chunk in `seq` order starting from `expected_seq`,
    /// buffering and discarding as needed. See module docs for the exact
    /// scan/pull/timeout algorithm.
    pub async fn next(
        &mut self,
        expected_seq: u64,
        rx: &mut mpsc::UnboundedReceiver<InboundItem>,
    ) -> Result<Chunk, AssembleError> {
        if let Some(pos) = self.buffer.iter().position(|c| c.seq == expected_seq) {
            return Ok(self.buffer.remove(pos));
        }

        loop {
            let item = timeout(self.wait, rx.recv())
                .await
                .map_err(|_| AssembleError::Timeout)?;
            let chunk = match item {
                None => return Err(AssembleError::Abort),
                Some(None) => return Err(AssembleError::Abort),
                Some(Some(chunk)) => chunk,
            };
            if chunk.seq < expected_seq {
                continue;
            }
            if chunk.seq == expected_seq {
                return Ok(chunk);
            }
            self.buffer.push(chunk);
            if self.buffer.len() > self.limit {
                return Err(AssembleError::ReorderOverflow);
            }
        }
    }
}
