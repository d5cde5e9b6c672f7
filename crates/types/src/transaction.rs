use crate::address::Address;
use crate::block::FilePosition;
use crate::record::{RecordError, RecordReader, RecordWriter};

/// Block approve transaction.
pub const TX_STATE_APPROVE: u64 = 1;
/// Transaction accepted (data & move).
pub const TX_STATE_ACCEPT: u64 = 20;
/// Transaction not accepted (insufficient funds).
pub const TX_STATE_WRONG_MONEY: u64 = 30;
/// Transaction not accepted (data method rejected).
pub const TX_STATE_WRONG_DATA: u64 = 40;
/// Forging transaction.
pub const TX_STATE_FORGING: u64 = 100;
/// Wallet forging transaction.
pub const TX_STATE_FORGING_W: u64 = 101;
/// Node forging transaction.
pub const TX_STATE_FORGING_N: u64 = 102;
/// Coin forging transaction.
pub const TX_STATE_FORGING_C: u64 = 103;
pub const TX_STATE_FORGING_A: u64 = 104;
/// State block transaction.
pub const TX_STATE_STATE: u64 = 200;
/// Node statistics carrier.
pub const TX_STATE_TECH_NODE_STAT: u64 = 0x1101;

/// Delegation request decoded from a JSON-shaped `data` field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegateInfo {
    pub value: u64,
    pub is_delegate: bool,
}

/// Script call decoded for transactions targeting a script address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptInfo {
    pub tx_raw: Vec<u8>,
    pub is_initialize_script: bool,
}

/// Parsed transaction record.
///
/// A value deserialized from the KV store carries only the file position and
/// block number (`is_initialized == false`); the remaining fields are filled
/// by re-reading the archive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionInfo {
    /// Double-SHA256 of the canonical transaction prefix (32 bytes).
    pub hash: Vec<u8>,
    pub from_address: Address,
    pub to_address: Address,
    pub value: i64,
    pub fees: i64,
    pub nonce: u64,
    pub block_number: u64,
    pub size_raw_tx: u64,
    /// `max(size_raw_tx - 255, 0)`.
    pub real_fees: i64,

    pub sign: Vec<u8>,
    /// Empty iff the sender is the initial wallet.
    pub pub_key: Vec<u8>,
    pub data: Vec<u8>,
    /// Full raw transaction bytes, retained only when the caller asks for it.
    pub all_raw_tx: Vec<u8>,
    pub file_pos: FilePosition,

    pub int_status: Option<u64>,
    pub delegate: Option<DelegateInfo>,
    pub script_info: Option<ScriptInfo>,

    pub is_sign_block_tx: bool,
    /// Set by the sync driver's persistence filter.
    pub is_save_to_db: bool,
    pub is_initialized: bool,
}

impl TransactionInfo {
    pub fn calc_real_fee(&mut self) {
        self.real_fees = (self.size_raw_tx as i64 - 255).max(0);
    }

    pub fn is_int_status_no_balance(&self) -> bool {
        self.int_status == Some(TX_STATE_WRONG_MONEY)
    }

    pub fn is_int_status_not_success(&self) -> bool {
        matches!(
            self.int_status,
            Some(TX_STATE_WRONG_MONEY) | Some(TX_STATE_WRONG_DATA)
        )
    }

    pub fn is_int_status_forging(&self) -> bool {
        matches!(
            self.int_status,
            Some(TX_STATE_FORGING)
                | Some(TX_STATE_FORGING_W)
                | Some(TX_STATE_FORGING_N)
                | Some(TX_STATE_FORGING_C)
                | Some(TX_STATE_FORGING_A)
        )
    }

    pub fn is_int_status_node_test(&self) -> bool {
        self.int_status == Some(TX_STATE_TECH_NODE_STAT)
    }

    /// KV projection: only the file position and block number are persisted;
    /// everything else is re-read from the archive on demand.
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = RecordWriter::new();
        self.file_pos.write_to(&mut w);
        w.write_u64(self.block_number);
        w.into_bytes()
    }

    pub fn read_from(r: &mut RecordReader<'_>) -> Result<Self, RecordError> {
        let file_pos = FilePosition::read_from(r)?;
        let block_number = r.read_u64()?;
        Ok(Self {
            file_pos,
            block_number,
            ..Self::default()
        })
    }

    pub fn deserialize(raw: &[u8]) -> Result<Self, RecordError> {
        Self::read_from(&mut RecordReader::new(raw))
    }
}
