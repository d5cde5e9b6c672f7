use std::collections::BTreeMap;

use crate::block::FilePosition;
use crate::record::{RecordError, RecordReader, RecordWriter};

/// Head pointer of the canonical chain, rewritten after every indexed block
/// and used to renumber the resolver on restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlocksMetadata {
    pub block_hash: String,
    pub prev_block_hash: String,
    pub block_number: u64,
}

impl BlocksMetadata {
    pub fn serialize(&self) -> Result<Vec<u8>, RecordError> {
        if self.block_hash.is_empty() || self.prev_block_hash.is_empty() {
            return Err(RecordError::Malformed("metadata hashes not set"));
        }
        let mut w = RecordWriter::new();
        w.write_str(&self.block_hash);
        w.write_str(&self.prev_block_hash);
        w.write_u64(self.block_number);
        Ok(w.into_bytes())
    }

    /// An absent record decodes to the default value.
    pub fn deserialize(raw: &[u8]) -> Result<Self, RecordError> {
        if raw.is_empty() {
            return Ok(Self::default());
        }
        let mut r = RecordReader::new(raw);
        Ok(Self {
            block_hash: r.read_string()?,
            prev_block_hash: r.read_string()?,
            block_number: r.read_u64()?,
        })
    }
}

/// Checkpoint of the main indexer worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MainBlockInfo {
    pub block_number: u64,
    pub block_hash: String,
    pub count_val: u64,
}

impl MainBlockInfo {
    pub fn new(block_number: u64, block_hash: String, count_val: u64) -> Self {
        Self {
            block_number,
            block_hash,
            count_val,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, RecordError> {
        if self.block_hash.is_empty() {
            return Err(RecordError::Malformed("metadata hash not set"));
        }
        let mut w = RecordWriter::new();
        w.write_str(&self.block_hash);
        w.write_u64(self.block_number);
        w.write_u64(self.count_val);
        Ok(w.into_bytes())
    }

    pub fn deserialize(raw: &[u8]) -> Result<Self, RecordError> {
        if raw.is_empty() {
            return Ok(Self::default());
        }
        let mut r = RecordReader::new(raw);
        Ok(Self {
            block_hash: r.read_string()?,
            block_number: r.read_u64()?,
            count_val: r.read_u64()?,
        })
    }
}

/// Checkpoint of the node-test worker. Same shape as [`MainBlockInfo`] but
/// persisted under its own key so the workers advance independently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStatBlockInfo {
    pub block_number: u64,
    pub block_hash: String,
    pub count_val: u64,
}

impl NodeStatBlockInfo {
    pub fn new(block_number: u64, block_hash: String, count_val: u64) -> Self {
        Self {
            block_number,
            block_hash,
            count_val,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, RecordError> {
        if self.block_hash.is_empty() {
            return Err(RecordError::Malformed("metadata hash not set"));
        }
        let mut w = RecordWriter::new();
        w.write_str(&self.block_hash);
        w.write_u64(self.block_number);
        w.write_u64(self.count_val);
        Ok(w.into_bytes())
    }

    pub fn deserialize(raw: &[u8]) -> Result<Self, RecordError> {
        if raw.is_empty() {
            return Ok(Self::default());
        }
        let mut r = RecordReader::new(raw);
        Ok(Self {
            block_hash: r.read_string()?,
            block_number: r.read_u64()?,
            count_val: r.read_u64()?,
        })
    }
}

/// Directory of registered nodes: host -> published name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllNodes {
    pub nodes: BTreeMap<String, String>,
}

impl AllNodes {
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = RecordWriter::new();
        w.write_u64(self.nodes.len() as u64);
        for (host, name) in &self.nodes {
            w.write_str(host);
            w.write_str(name);
        }
        w.into_bytes()
    }

    pub fn deserialize(raw: &[u8]) -> Result<Self, RecordError> {
        if raw.is_empty() {
            return Ok(Self::default());
        }
        let mut r = RecordReader::new(raw);
        let count = r.read_u64()?;
        let mut nodes = BTreeMap::new();
        for _ in 0..count {
            let host = r.read_string()?;
            let name = r.read_string()?;
            nodes.insert(host, name);
        }
        Ok(Self { nodes })
    }
}

/// Tail offset of one archive file, keyed by its basename.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub file_pos: FilePosition,
}

impl FileInfo {
    pub fn serialize(&self) -> Vec<u8> {
        self.file_pos.serialize()
    }

    pub fn deserialize(raw: &[u8]) -> Result<Self, RecordError> {
        Ok(Self {
            file_pos: FilePosition::deserialize(raw)?,
        })
    }
}
