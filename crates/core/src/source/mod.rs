//! Block sources: where the sync driver pulls blocks from. The file source
//! replays a local archive, the network source follows the peer set. Both
//! satisfy the same contract, so the driver does not care which one it
//! drives.

pub mod fetcher;
pub mod file;
pub mod network;

use async_trait::async_trait;

use torrent_node_types::{BlockHeader, BlockInfo};

use crate::error::NodeResult;

pub use file::FileBlockSource;
pub use network::NetworkBlockSource;

#[async_trait]
pub trait BlockSource: Send {
    /// One-time setup before the first iteration.
    async fn initialize(&mut self) -> NodeResult<()>;

    /// Prepares one sync round. Receives the resolver's current block count
    /// and tip hash; returns whether blocks are available and the highest
    /// block number known upstream (0 when unknown).
    async fn do_process(&mut self, count_blocks: u64, last_block_hash: &str)
        -> NodeResult<(bool, u64)>;

    /// Produces the next block and its dump, or `None` when this round is
    /// drained.
    async fn process(&mut self) -> NodeResult<Option<(BlockInfo, Vec<u8>)>>;

    /// Re-reads one already-indexed block identified by its stored header.
    async fn get_existing_block(&self, header: &BlockHeader) -> NodeResult<(BlockInfo, Vec<u8>)>;

    /// Highest block number advertised upstream during the last round.
    fn known_block(&self) -> u64;
}
