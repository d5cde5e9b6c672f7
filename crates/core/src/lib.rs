//! Core of the torrent node: the binary block codec, signature
//! verification, the embedded KV adapter, the in-memory blockchain
//! resolver, the peer fan-out engine, the two block sources and the sync
//! driver that wires them into the worker stages.

pub mod blockchain;
pub mod cache;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod p2p;
pub mod source;
pub mod state;
pub mod storage;
pub mod sync;
pub mod workers;

pub mod testing;

pub use blockchain::BlockChain;
pub use error::{NodeError, NodeResult, StopFlag, StopHandle};
pub use state::NodeState;
pub use sync::Sync;
