//! Signature verification and address derivation.
//!
//! The network signs with secp256k1 over a single SHA-256 of the message;
//! signatures travel as DER and are low-S normalized before verification to
//! keep malleable encodings out. Keys that are not secp256k1 points are
//! retried as DER-encoded P-256 public keys, which is the only other key
//! shape peers have ever produced.

use once_cell::sync::Lazy;
use p256::ecdsa::signature::Verifier;
use p256::pkcs8::DecodePublicKey;
use ripemd::Ripemd160;
use secp256k1::ecdsa::Signature;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use torrent_node_common::sha256d;
use torrent_node_types::record::be;

use crate::error::{NodeError, NodeResult};

static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

const UNCOMPRESSED_PUBKEY_SIZE: usize = 65;

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Derives the 25-byte binary address for an uncompressed public key laid
/// out in the trailing 65 bytes of `pubkey`. Returns `None` for anything
/// shorter.
pub fn address_bytes_from_pubkey(pubkey: &[u8]) -> Option<Vec<u8>> {
    if pubkey.len() < UNCOMPRESSED_PUBKEY_SIZE {
        return None;
    }
    let mut point = [0u8; UNCOMPRESSED_PUBKEY_SIZE];
    point.copy_from_slice(&pubkey[pubkey.len() - UNCOMPRESSED_PUBKEY_SIZE..]);
    // DER wrappers may carry a different marker byte in front of the point.
    point[0] = 0x04;

    let r160 = Ripemd160::digest(sha256(&point));
    let mut wide = Vec::with_capacity(25);
    wide.push(0);
    wide.extend_from_slice(&r160);

    let checksum = sha256d(&wide);
    wide.extend_from_slice(&checksum[..4]);
    Some(wide)
}

/// `0x`-hex rendering of [`address_bytes_from_pubkey`].
pub fn address_hex_from_pubkey(pubkey: &[u8]) -> Option<String> {
    address_bytes_from_pubkey(pubkey).map(|bytes| format!("0x{}", hex::encode(bytes)))
}

/// Derives the address by round-tripping the key through secp256k1, which
/// normalizes compressed and oddly framed keys to the canonical
/// uncompressed form first.
pub fn address_from_secp_key(pubkey: &[u8]) -> NodeResult<String> {
    let key = PublicKey::from_slice(pubkey)
        .map_err(|_| NodeError::Protocol("incorrect pubkey".into()))?;
    let serialized = key.serialize_uncompressed();
    address_hex_from_pubkey(&serialized)
        .ok_or_else(|| NodeError::Protocol("incorrect pubkey".into()))
}

fn check_sign_fallback(sign: &[u8], pubkey: &[u8], data: &[u8]) -> NodeResult<bool> {
    let verifying_key = p256::ecdsa::VerifyingKey::from_public_key_der(pubkey)
        .map_err(|_| NodeError::Protocol("cannot load public key".into()))?;
    let signature = p256::ecdsa::Signature::from_der(sign)
        .map_err(|_| NodeError::Protocol("incorrect sign".into()))?;
    Ok(verifying_key.verify(data, &signature).is_ok())
}

/// Verifies `sign` over `data` for `pubkey`. secp256k1 first, generic P-256
/// only when the key does not parse as a secp256k1 point.
pub fn check_sign_data(sign: &[u8], pubkey: &[u8], data: &[u8]) -> NodeResult<bool> {
    if pubkey.len() < UNCOMPRESSED_PUBKEY_SIZE {
        return check_sign_fallback(sign, pubkey, data);
    }
    let point = &pubkey[pubkey.len() - UNCOMPRESSED_PUBKEY_SIZE..];
    let Ok(key) = PublicKey::from_slice(point) else {
        return check_sign_fallback(sign, pubkey, data);
    };

    let mut signature =
        Signature::from_der(sign).map_err(|_| NodeError::Protocol("incorrect sign".into()))?;
    signature.normalize_s();

    let message = Message::from_digest(sha256(data));
    Ok(SECP.verify_ecdsa(&message, &signature, &key).is_ok())
}

/// The node's own signing key, loaded from a raw DER private-key file.
#[derive(Clone)]
pub struct NodeKey {
    secret: SecretKey,
    pub_key: Vec<u8>,
    address: String,
}

impl NodeKey {
    /// Offset of the 32-byte scalar inside the DER ECPrivateKey blob.
    const SECRET_OFFSET: usize = 7;

    /// Builds the key from DER private-key bytes, checking the derived
    /// address against the configured name.
    pub fn from_der(der: &[u8], expected_address: &str) -> NodeResult<Self> {
        if der.len() < Self::SECRET_OFFSET + 32 {
            return Err(NodeError::User("incorrect private key".into()));
        }
        let secret = SecretKey::from_slice(&der[Self::SECRET_OFFSET..Self::SECRET_OFFSET + 32])
            .map_err(|_| NodeError::User("incorrect private key".into()))?;
        let pub_key = PublicKey::from_secret_key(&SECP, &secret)
            .serialize_uncompressed()
            .to_vec();
        let address = address_hex_from_pubkey(&pub_key)
            .ok_or_else(|| NodeError::User("incorrect private key".into()))?;
        if !expected_address.is_empty() && address != expected_address.to_lowercase() {
            return Err(NodeError::User("incorrect private key or address".into()));
        }
        Ok(Self {
            secret,
            pub_key,
            address,
        })
    }

    /// Generates an ephemeral key. Test-signing still works without a
    /// configured key file.
    pub fn generate() -> Self {
        let (secret, public) = SECP.generate_keypair(&mut rand::thread_rng());
        let pub_key = public.serialize_uncompressed().to_vec();
        let address = address_hex_from_pubkey(&pub_key).expect("65-byte pubkey");
        Self {
            secret,
            pub_key,
            address,
        }
    }

    pub fn public_key(&self) -> &[u8] {
        &self.pub_key
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// DER signature over `sha256(data)`.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let message = Message::from_digest(sha256(data));
        SECP.sign_ecdsa(&message, &self.secret)
            .serialize_der()
            .to_vec()
    }
}

/// Split and verified sign envelope of a block dump.
pub struct BlockSignatureCheckResult {
    pub block: Vec<u8>,
    pub sign: Vec<u8>,
    pub pubkey: Vec<u8>,
    pub address: String,
}

/// Big-endian size prefix preceding a signed dump.
pub fn make_first_part_block_sign(block_size: u64) -> [u8; 8] {
    be::u64_bytes(block_size)
}

/// Envelope trailer: framed signature, public key and address over the full
/// dump.
pub fn make_block_sign(dump: &[u8], key: &NodeKey) -> Vec<u8> {
    let sign = key.sign(dump);
    let mut out = Vec::with_capacity(8 + sign.len() + 8 + key.pub_key.len() + 8 + key.address.len());
    be::write_framed(&mut out, &sign);
    be::write_framed(&mut out, &key.pub_key);
    be::write_framed(&mut out, key.address.as_bytes());
    out
}

/// Splits `[size][block][sign][pubkey][address]`, verifies the signature
/// and checks that the address matches the key.
pub fn check_signature_block(raw: &[u8]) -> NodeResult<BlockSignatureCheckResult> {
    let mut pos = 0;
    let block = be::read_framed(raw, &mut pos)?.to_vec();
    let sign = be::read_framed(raw, &mut pos)?.to_vec();
    let pubkey = be::read_framed(raw, &mut pos)?.to_vec();
    let address_bytes = be::read_framed(raw, &mut pos)?;
    let address = String::from_utf8(address_bytes.to_vec())
        .map_err(|_| NodeError::Integrity("envelope address is not utf-8".into()))?;

    if !check_sign_data(&sign, &pubkey, &block)? {
        return Err(NodeError::Integrity("block signature not validated".into()));
    }
    let calculated = match address_from_secp_key(&pubkey) {
        Ok(address) => address,
        Err(_) => address_hex_from_pubkey(&pubkey)
            .ok_or_else(|| NodeError::Integrity("envelope pubkey unusable".into()))?,
    };
    if calculated != address {
        return Err(NodeError::Integrity("block signer address mismatch".into()));
    }

    Ok(BlockSignatureCheckResult {
        block,
        sign,
        pubkey,
        address,
    })
}

/// Signs an arbitrary test string, producing the same framed
/// sign/pubkey/address trailer the dump path uses.
pub fn make_test_sign(data: &[u8], key: &NodeKey) -> Vec<u8> {
    let sign = key.sign(data);
    let mut out = Vec::new();
    be::write_framed(&mut out, &sign);
    be::write_framed(&mut out, &key.pub_key);
    be::write_framed(&mut out, key.address.as_bytes());
    out
}

/// Verifies a test-sign envelope over `text`, returning the signer address.
pub fn check_signature_test(text: &[u8], envelope: &[u8]) -> NodeResult<String> {
    let mut pos = 0;
    let sign = be::read_framed(envelope, &mut pos)?;
    let pubkey = be::read_framed(envelope, &mut pos)?;
    let address_bytes = be::read_framed(envelope, &mut pos)?;
    let address = String::from_utf8(address_bytes.to_vec())
        .map_err(|_| NodeError::Integrity("envelope address is not utf-8".into()))?;

    if !check_sign_data(sign, pubkey, text)? {
        return Err(NodeError::Integrity("test signature not validated".into()));
    }
    if address_from_secp_key(pubkey)? != address {
        return Err(NodeError::Integrity("test signer address mismatch".into()));
    }
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let key = NodeKey::generate();
        let data = b"some message";
        let sign = key.sign(data);
        assert!(check_sign_data(&sign, key.public_key(), data).unwrap());
        assert!(!check_sign_data(&sign, key.public_key(), b"other message").unwrap());
    }

    #[test]
    fn address_matches_both_derivations() {
        let key = NodeKey::generate();
        assert_eq!(
            address_hex_from_pubkey(key.public_key()).unwrap(),
            key.address()
        );
        assert_eq!(
            address_from_secp_key(key.public_key()).unwrap(),
            key.address()
        );
        // 25 bytes -> 50 hex chars behind the prefix.
        assert_eq!(key.address().len(), 2 + 50);
        assert!(key.address().starts_with("0x00"));
    }

    #[test]
    fn block_envelope_round_trip() {
        let key = NodeKey::generate();
        let dump = b"block bytes".to_vec();

        let mut framed = Vec::new();
        framed.extend_from_slice(&make_first_part_block_sign(dump.len() as u64));
        framed.extend_from_slice(&dump);
        let trailer_at = framed.len();
        framed.extend_from_slice(&make_block_sign(&dump, &key));

        // The size prefix doubles as the big-endian frame of the block.
        let result = check_signature_block(&framed).unwrap();
        assert_eq!(result.block, dump);
        assert_eq!(result.address, key.address());

        // Corrupt the signature: the envelope is refused.
        framed[trailer_at + 10] ^= 0xFF;
        assert!(matches!(
            check_signature_block(&framed),
            Err(NodeError::Integrity(_)) | Err(NodeError::Protocol(_))
        ));
    }

    #[test]
    fn test_sign_envelope_round_trip() {
        let key = NodeKey::generate();
        let envelope = make_test_sign(b"probe", &key);
        assert_eq!(
            check_signature_test(b"probe", &envelope).unwrap(),
            key.address()
        );
        assert!(check_signature_test(b"not the probe", &envelope).is_err());
    }

    #[test]
    fn der_key_material_round_trip() {
        // An ECPrivateKey DER layout places the scalar at a fixed offset;
        // fabricate one around a known scalar.
        let reference = NodeKey::generate();
        let mut der = vec![0u8; 7];
        der.extend_from_slice(&reference.secret.secret_bytes());
        let restored = NodeKey::from_der(&der, reference.address()).unwrap();
        assert_eq!(restored.address(), reference.address());
        assert!(NodeKey::from_der(&der, "0xdeadbeef").is_err());
    }
}
