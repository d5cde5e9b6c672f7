//! Builders for well-formed blocks, transactions and archives, shared by
//! the test suites of the codec, the sources and the sync driver.

use std::path::Path;
use std::str::FromStr;

use torrent_node_common::sha256d;
use torrent_node_types::block::BLOCK_TYPE;
use torrent_node_types::Address;

use crate::codec::{append_block_to_file, write_varint};
use crate::crypto::NodeKey;

pub const TEST_TIMESTAMP: u64 = 1_600_000_000;

/// Deterministic non-script, non-blocked address.
pub fn test_address(seed: u8) -> Address {
    let mut bytes = vec![seed; 25];
    bytes[0] = 0;
    Address::from_bytes(bytes, false)
}

pub fn test_node_key() -> NodeKey {
    NodeKey::generate()
}

/// Recipe for one transaction inside a built block.
#[derive(Clone)]
pub struct TxSpec {
    pub to: Address,
    pub value: u64,
    pub fees: u64,
    pub nonce: u64,
    pub data: Vec<u8>,
    pub int_status: Option<u64>,
    pub key: Option<NodeKey>,
}

impl TxSpec {
    pub fn transfer(to: Address, value: u64, fees: u64, nonce: u64) -> Self {
        Self {
            to,
            value,
            fees,
            nonce,
            data: Vec::new(),
            int_status: None,
            key: None,
        }
    }

    /// A signature-carrier transaction: sender equals recipient, zero value
    /// and the signed block's hash as data.
    pub fn sign_block(key: &NodeKey, prev_hash_hex: &str) -> Self {
        let to = Address::from_str(key.address()).expect("node key address is valid");
        Self {
            to,
            value: 0,
            fees: 0,
            nonce: 0,
            data: hex::decode(prev_hash_hex).expect("hex block hash"),
            int_status: None,
            key: Some(key.clone()),
        }
    }

    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn int_status(mut self, status: u64) -> Self {
        self.int_status = Some(status);
        self
    }

    pub fn signed_by(mut self, key: &NodeKey) -> Self {
        self.key = Some(key.clone());
        self
    }
}

/// Serializes a transaction body (everything behind the tx-size varint).
pub fn build_tx_bytes(spec: &TxSpec) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(spec.to.as_bytes());
    write_varint(&mut body, spec.value);
    write_varint(&mut body, spec.fees);
    write_varint(&mut body, spec.nonce);
    write_varint(&mut body, spec.data.len() as u64);
    body.extend_from_slice(&spec.data);

    let (sign, pubkey) = match &spec.key {
        Some(key) => (key.sign(&body), key.public_key().to_vec()),
        None => (Vec::new(), Vec::new()),
    };
    write_varint(&mut body, sign.len() as u64);
    body.extend_from_slice(&sign);
    write_varint(&mut body, pubkey.len() as u64);
    body.extend_from_slice(&pubkey);
    if let Some(status) = spec.int_status {
        write_varint(&mut body, status);
    }
    body
}

/// A block assembled by [`build_block`].
pub struct BuiltBlock {
    /// The dump: block bytes without the leading size prefix.
    pub dump: Vec<u8>,
    /// The archive record: `u64_le` size followed by the dump.
    pub record: Vec<u8>,
    /// Hex double-SHA256 of the dump.
    pub hash: String,
}

pub fn build_block(prev_hash_hex: &str, txs: &[TxSpec]) -> BuiltBlock {
    build_block_at(prev_hash_hex, txs, TEST_TIMESTAMP)
}

pub fn build_block_at(prev_hash_hex: &str, txs: &[TxSpec], timestamp: u64) -> BuiltBlock {
    let prev_hash = hex::decode(prev_hash_hex).expect("hex block hash");
    assert_eq!(prev_hash.len(), 32, "prev hash must be 32 bytes");

    let mut dump = Vec::new();
    dump.extend_from_slice(&BLOCK_TYPE.to_le_bytes());
    dump.extend_from_slice(&timestamp.to_le_bytes());
    dump.extend_from_slice(&prev_hash);
    dump.extend_from_slice(&[0u8; 32]); // txs hash
    for spec in txs {
        let body = build_tx_bytes(spec);
        write_varint(&mut dump, body.len() as u64);
        dump.extend_from_slice(&body);
    }
    write_varint(&mut dump, 0);

    let hash = hex::encode(sha256d(&dump));
    let mut record = Vec::with_capacity(8 + dump.len());
    record.extend_from_slice(&(dump.len() as u64).to_le_bytes());
    record.extend_from_slice(&dump);
    BuiltBlock { dump, record, hash }
}

/// Builds a chain of `count` blocks on top of `prev_hash_hex`, one simple
/// transfer per block.
pub fn build_chain(prev_hash_hex: &str, count: usize) -> Vec<BuiltBlock> {
    let mut blocks = Vec::with_capacity(count);
    let mut prev = prev_hash_hex.to_string();
    for i in 0..count {
        let block = build_block_at(
            &prev,
            &[TxSpec::transfer(test_address(i as u8 + 1), 100 + i as u64, 1, i as u64)],
            TEST_TIMESTAMP + i as u64,
        );
        prev = block.hash.clone();
        blocks.push(block);
    }
    blocks
}

/// Writes blocks into one archive file, returning its path.
pub fn write_archive(dir: &Path, file_name: &str, blocks: &[BuiltBlock]) -> std::path::PathBuf {
    let path = dir.join(file_name);
    for block in blocks {
        append_block_to_file(&path, &block.dump).expect("archive write");
    }
    path
}
