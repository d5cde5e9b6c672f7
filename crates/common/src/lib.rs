//! Small helpers shared by the torrent-node crates.

pub mod compression;
pub mod hash;

pub use compression::{compress, decompress, CompressionError};
pub use hash::sha256d;
