use thiserror::Error;
use tokio::sync::watch;

use torrent_node_types::RecordError;

/// Error kinds of the node, mirroring how far each failure is allowed to
/// propagate: protocol errors kill one request, integrity errors one block,
/// storage errors one worker iteration; cancellation unwinds everything.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Malformed peer data: bad JSON, bad varint, size mismatch.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Cryptographic or chain-linkage mismatch; the offending block is
    /// refused.
    #[error("integrity error: {0}")]
    Integrity(String),
    /// Embedded KV failure.
    #[error("storage error: {0}")]
    Storage(String),
    #[error("{0} not found")]
    NotFound(String),
    /// Malformed request on the query surface.
    #[error("{0}")]
    User(String),
    /// Every fan-out worker exited with segments still unserved.
    #[error("fan-out exhausted: all peer workers exited")]
    FanOutExhausted,
    /// The stop flag was observed. Not an error to log.
    #[error("cancelled")]
    Cancelled,
}

pub type NodeResult<T> = Result<T, NodeError>;

impl From<RecordError> for NodeError {
    fn from(err: RecordError) -> Self {
        NodeError::Protocol(err.to_string())
    }
}

impl From<torrent_node_common::CompressionError> for NodeError {
    fn from(err: torrent_node_common::CompressionError) -> Self {
        NodeError::Protocol(err.to_string())
    }
}

impl NodeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NodeError::Cancelled)
    }
}

/// Process-wide stop flag. Cloned receivers are polled at every loop
/// boundary; flipping the sender makes each of them raise
/// [`NodeError::Cancelled`] on the next check.
#[derive(Clone)]
pub struct StopFlag {
    rx: watch::Receiver<bool>,
}

pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopFlag {
    pub fn new() -> (StopHandle, StopFlag) {
        let (tx, rx) = watch::channel(false);
        (StopHandle { tx }, StopFlag { rx })
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn check(&self) -> NodeResult<()> {
        if self.is_stopped() {
            Err(NodeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once the flag flips.
    pub async fn stopped(&mut self) {
        // An error means the sender is gone, which also counts as a stop.
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}
