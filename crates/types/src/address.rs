use std::fmt;
use std::str::FromStr;

use crate::record::RecordError;

/// Rendering of the empty address. Transactions carrying no public key are
/// funded by the network itself and use this sentinel as their sender.
pub const INITIAL_WALLET_TRANSACTION: &str = "InitialWalletTransaction";

const ADDRESS_SIZE: usize = 25;
const SCRIPT_MARKER: u8 = 8;

/// 25-byte wallet identifier: version byte, RIPEMD160(SHA256(pubkey)) and a
/// 4-byte double-SHA256 checksum. The empty address is a valid value and
/// marks the initial wallet.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(Vec<u8>);

impl Address {
    /// Wraps raw address bytes. With `blocked` set the version byte is
    /// stamped to 1, marking a sender that is barred from transfers.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, blocked: bool) -> Self {
        let mut bytes = bytes.into();
        if blocked && !bytes.is_empty() {
            bytes[0] = 1;
        }
        Self(bytes)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The empty address doubles as the initial-wallet sentinel.
    pub fn is_initial_wallet(&self) -> bool {
        self.is_empty()
    }

    pub fn is_script_address(&self) -> bool {
        self.0.first() == Some(&SCRIPT_MARKER)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str(INITIAL_WALLET_TRANSACTION)
        } else {
            write!(f, "0x{}", hex::encode(&self.0))
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s.strip_prefix("0x").unwrap_or(s);
        let bytes =
            hex::decode(hex_part).map_err(|_| RecordError::Malformed("address is not hex"))?;
        if bytes.len() != ADDRESS_SIZE {
            return Err(RecordError::Malformed("address must be 25 bytes"));
        }
        Ok(Self(bytes))
    }
}
