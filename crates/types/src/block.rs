use crate::record::{RecordError, RecordReader, RecordWriter};
use crate::transaction::TransactionInfo;

pub const BLOCK_TYPE: u64 = 0xEFCDAB8967452301;
pub const BLOCK_TYPE_COMMON: u64 = 0x0000000067452301;
pub const BLOCK_TYPE_STATE: u64 = 0x1100000067452301;
pub const BLOCK_TYPE_FORGING: u64 = 0x2200000067452301;

pub const BLOCK_TYPE_COMMON_2: u64 = 0x0001000067452301;
pub const BLOCK_TYPE_STATE_2: u64 = 0x1101000067452301;
pub const BLOCK_TYPE_FORGING_2: u64 = 0x2201000067452301;

/// Marker preceding each embedded signature transaction in a serialized
/// header.
const SIGNATURE_TAG: u8 = b's';

/// Where a block or transaction lives inside the append-only archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilePosition {
    pub file_name: String,
    pub offset: u64,
}

impl FilePosition {
    pub fn new(file_name: impl Into<String>, offset: u64) -> Self {
        Self {
            file_name: file_name.into(),
            offset,
        }
    }

    pub fn write_to(&self, w: &mut RecordWriter) {
        w.write_str(&self.file_name);
        w.write_u64(self.offset);
    }

    pub fn read_from(r: &mut RecordReader<'_>) -> Result<Self, RecordError> {
        let file_name = r.read_string()?;
        let offset = r.read_u64()?;
        Ok(Self { file_name, offset })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = RecordWriter::new();
        self.write_to(&mut w);
        w.into_bytes()
    }

    pub fn deserialize(raw: &[u8]) -> Result<Self, RecordError> {
        Self::read_from(&mut RecordReader::new(raw))
    }
}

/// Parsed block header. Hashes are lowercase hex of the 32-byte digests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockHeader {
    pub timestamp: u64,
    pub block_size: u64,
    pub block_type: u64,
    pub hash: String,
    pub prev_hash: String,
    pub txs_hash: String,
    /// Data of the block's first sign-block transaction, if any.
    pub signature: Vec<u8>,
    pub count_txs: Option<u64>,
    pub file_pos: FilePosition,
    /// Archive offset one past the end of this block's record.
    pub end_block_pos: u64,
    pub block_number: Option<u64>,
    pub block_signatures: Vec<TransactionInfo>,
    pub sender_sign: Vec<u8>,
    pub sender_pubkey: Vec<u8>,
    pub sender_address: Vec<u8>,
}

impl BlockHeader {
    pub fn is_simple_block(&self) -> bool {
        matches!(
            self.block_type,
            BLOCK_TYPE | BLOCK_TYPE_COMMON | BLOCK_TYPE_COMMON_2
        )
    }

    pub fn is_state_block(&self) -> bool {
        matches!(self.block_type, BLOCK_TYPE_STATE | BLOCK_TYPE_STATE_2)
    }

    pub fn is_forging_block(&self) -> bool {
        matches!(self.block_type, BLOCK_TYPE_FORGING | BLOCK_TYPE_FORGING_2)
    }

    pub fn block_type_name(&self) -> Result<&'static str, RecordError> {
        if self.is_state_block() {
            Ok("state")
        } else if self.is_simple_block() {
            Ok("block")
        } else if self.is_forging_block() {
            Ok("forging")
        } else {
            Err(RecordError::Malformed("unknown block type"))
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, RecordError> {
        if self.hash.is_empty() {
            return Err(RecordError::Malformed("empty hash"));
        }
        if self.prev_hash.is_empty() {
            return Err(RecordError::Malformed("empty prev hash"));
        }
        let count_txs = self
            .count_txs
            .ok_or(RecordError::Malformed("count txs not set"))?;

        let mut w = RecordWriter::new();
        self.file_pos.write_to(&mut w);
        w.write_str(&self.prev_hash);
        w.write_str(&self.hash);
        w.write_str(&self.txs_hash);
        w.write_bytes(&self.signature);
        w.write_u64(self.block_size);
        w.write_u64(self.block_type);
        w.write_u64(self.timestamp);
        w.write_u64(count_txs);

        w.write_bytes(&self.sender_sign);
        w.write_bytes(&self.sender_pubkey);
        w.write_bytes(&self.sender_address);

        for tx in &self.block_signatures {
            w.write_u8(SIGNATURE_TAG);
            w.write_raw(&tx.serialize());
        }
        Ok(w.into_bytes())
    }

    pub fn deserialize(raw: &[u8]) -> Result<Self, RecordError> {
        let mut r = RecordReader::new(raw);
        let file_pos = FilePosition::read_from(&mut r)?;
        let prev_hash = r.read_string()?;
        let hash = r.read_string()?;
        let txs_hash = r.read_string()?;
        let signature = r.read_bytes()?;
        let block_size = r.read_u64()?;
        let block_type = r.read_u64()?;
        let timestamp = r.read_u64()?;
        let count_txs = r.read_u64()?;

        let sender_sign = r.read_bytes()?;
        let sender_pubkey = r.read_bytes()?;
        let sender_address = r.read_bytes()?;

        let mut block_signatures = Vec::new();
        while !r.is_exhausted() {
            let tag = r.read_u8()?;
            if tag != SIGNATURE_TAG {
                return Err(RecordError::Malformed("unknown trailer tag"));
            }
            block_signatures.push(TransactionInfo::read_from(&mut r)?);
        }

        Ok(Self {
            timestamp,
            block_size,
            block_type,
            hash,
            prev_hash,
            txs_hash,
            signature,
            count_txs: Some(count_txs),
            file_pos,
            end_block_pos: 0,
            block_number: None,
            block_signatures,
            sender_sign,
            sender_pubkey,
            sender_address,
        })
    }
}

/// Header shape a peer returns for `type: "forP2P"` queries. Enough to fetch
/// and verify the block body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MinimalBlockHeader {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub block_size: u64,
    pub file_name: String,
}

/// A fully parsed block: header plus the transactions that survived the
/// persistence filter.
#[derive(Debug, Clone, Default)]
pub struct BlockInfo {
    pub header: BlockHeader,
    pub txs: Vec<TransactionInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            timestamp: 1_234_567,
            block_size: 420,
            block_type: BLOCK_TYPE,
            hash: "aa".repeat(32),
            prev_hash: "bb".repeat(32),
            txs_hash: "cc".repeat(32),
            signature: vec![1, 2, 3],
            count_txs: Some(7),
            file_pos: FilePosition::new("3.blk", 100),
            sender_sign: vec![9, 9],
            sender_pubkey: vec![4],
            sender_address: b"0xdead".to_vec(),
            ..BlockHeader::default()
        }
    }

    #[test]
    fn header_round_trip() {
        let mut header = sample_header();
        header.block_signatures.push(TransactionInfo {
            file_pos: FilePosition::new("3.blk", 140),
            block_number: 5,
            ..TransactionInfo::default()
        });

        let restored = BlockHeader::deserialize(&header.serialize().unwrap()).unwrap();
        assert_eq!(restored.hash, header.hash);
        assert_eq!(restored.prev_hash, header.prev_hash);
        assert_eq!(restored.txs_hash, header.txs_hash);
        assert_eq!(restored.signature, header.signature);
        assert_eq!(restored.block_size, header.block_size);
        assert_eq!(restored.block_type, header.block_type);
        assert_eq!(restored.timestamp, header.timestamp);
        assert_eq!(restored.count_txs, header.count_txs);
        assert_eq!(restored.file_pos, header.file_pos);
        assert_eq!(restored.sender_sign, header.sender_sign);
        assert_eq!(restored.block_signatures.len(), 1);
        assert_eq!(restored.block_signatures[0].block_number, 5);
    }

    #[test]
    fn serialize_requires_hashes_and_count() {
        let mut header = sample_header();
        header.hash.clear();
        assert!(header.serialize().is_err());

        let mut header = sample_header();
        header.count_txs = None;
        assert!(header.serialize().is_err());
    }

    #[test]
    fn block_type_families() {
        let mut header = sample_header();
        assert!(header.is_simple_block());
        assert_eq!(header.block_type_name().unwrap(), "block");

        header.block_type = BLOCK_TYPE_STATE_2;
        assert!(header.is_state_block());

        header.block_type = BLOCK_TYPE_FORGING;
        assert!(header.is_forging_block());

        header.block_type = 42;
        assert!(header.block_type_name().is_err());
    }
}
