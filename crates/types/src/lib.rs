//! Core data model of the torrent node: addresses, block headers,
//! transactions and the records persisted to the embedded KV store.

pub mod address;
pub mod block;
pub mod metadata;
pub mod record;
pub mod transaction;

pub use address::Address;
pub use block::{BlockHeader, BlockInfo, FilePosition, MinimalBlockHeader};
pub use metadata::{AllNodes, BlocksMetadata, FileInfo, MainBlockInfo, NodeStatBlockInfo};
pub use record::{RecordError, RecordReader, RecordWriter};
pub use transaction::{DelegateInfo, ScriptInfo, TransactionInfo};

/// Hex hash of the genesis block. The resolver installs it under number 0 on
/// construction; every numbered chain bottoms out here.
pub const GENESIS_BLOCK_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";
