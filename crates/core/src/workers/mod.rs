//! Worker stages fed by the sync driver. Every worker owns a small bounded
//! queue and a long-running consumer task; the driver enqueues each
//! finalized block to all of them in block order, so per-worker processing
//! follows the global chain order.

pub mod cache;
pub mod main;

use std::sync::Arc;

use async_trait::async_trait;

use torrent_node_types::BlockInfo;

use crate::error::{NodeError, NodeResult};

pub use cache::WorkerCache;
pub use main::WorkerMain;
pub use node_test::WorkerNodeTest;

/// One unit of worker input: the parsed block and its raw dump.
pub type WorkerItem = (Arc<BlockInfo>, Arc<Vec<u8>>);

#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &'static str;

    /// The block this worker had committed when it was constructed; the
    /// driver re-feeds everything after it on startup. `None` means the
    /// worker needs no recovery.
    fn init_block_number(&self) -> Option<u64>;

    /// Hands a block to the worker, waiting while its queue is full.
    async fn enqueue(&self, item: WorkerItem) -> NodeResult<()>;
}

pub(crate) fn send_error() -> NodeError {
    NodeError::Cancelled
}
