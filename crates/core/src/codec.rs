//! Binary codec of the block archive and the peer dump protocol.
//!
//! A block record is a little-endian `u64` size followed by the block body
//! ("dump"): block type, timestamp, previous-block hash, transaction-list
//! hash and the transactions, each behind a varint size. A zero transaction
//! size terminates the block. The block hash is the double SHA-256 of the
//! whole dump; a transaction hash covers its bytes up to, but not
//! including, the optional trailing `int_status` field.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde_json::Value;

use torrent_node_common::sha256d;
use torrent_node_types::{
    Address, BlockHeader, BlockInfo, DelegateInfo, ScriptInfo, TransactionInfo,
};

use crate::crypto;
use crate::error::{NodeError, NodeResult};

/// Bytes of the fixed block prefix: size, type, timestamp and two hashes.
pub const BLOCK_HEADER_SIZE: u64 = 3 * 8 + 64;

const TO_ADDRESS_SIZE: usize = 25;

fn out_of_array() -> NodeError {
    NodeError::Protocol("out of the array".into())
}

fn take<'a>(raw: &'a [u8], pos: &mut usize, len: usize) -> NodeResult<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= raw.len())
        .ok_or_else(out_of_array)?;
    let slice = &raw[*pos..end];
    *pos = end;
    Ok(slice)
}

fn read_u64_le(raw: &[u8], pos: &mut usize) -> NodeResult<u64> {
    let bytes = take(raw, pos, 8)?;
    Ok(u64::from_le_bytes(bytes.try_into().expect("8 bytes")))
}

/// Reads one varint: a single byte up to 249, otherwise a marker selecting a
/// 2-, 4- or 8-byte little-endian payload.
pub fn read_varint(raw: &[u8], pos: &mut usize) -> NodeResult<u64> {
    let marker = take(raw, pos, 1)?[0];
    match marker {
        0..=249 => Ok(marker as u64),
        250 => {
            let bytes = take(raw, pos, 2)?;
            Ok(u16::from_le_bytes(bytes.try_into().expect("2 bytes")) as u64)
        }
        251 => {
            let bytes = take(raw, pos, 4)?;
            Ok(u32::from_le_bytes(bytes.try_into().expect("4 bytes")) as u64)
        }
        252 => {
            let bytes = take(raw, pos, 8)?;
            Ok(u64::from_le_bytes(bytes.try_into().expect("8 bytes")))
        }
        _ => Err(NodeError::Protocol(format!(
            "not supported varint value {marker}"
        ))),
    }
}

/// Writes the shortest varint form able to carry `value`.
pub fn write_varint(out: &mut Vec<u8>, value: u64) {
    if value <= 249 {
        out.push(value as u8);
    } else if value <= u16::MAX as u64 {
        out.push(250);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= u32::MAX as u64 {
        out.push(251);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(252);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Sign-block chain state threaded through a block's transactions. The
/// first transaction of a block may always open the signature chain; later
/// ones must repeat the previous sign-block's data.
#[derive(Default)]
pub struct PrevTxSignHelper {
    pub is_first: bool,
    pub is_prev_sign: bool,
    pub prev_tx_data: Vec<u8>,
}

fn is_sign_block_tx(tx: &TransactionInfo, helper: &PrevTxSignHelper) -> bool {
    if !helper.is_prev_sign {
        return false;
    }
    tx.from_address == tx.to_address
        && tx.value == 0
        && (helper.is_first || (!tx.data.is_empty() && tx.data == helper.prev_tx_data))
}

fn parse_data_json(data: &[u8]) -> Option<Value> {
    if data.first() != Some(&b'{') || data.last() != Some(&b'}') {
        return None;
    }
    // Users can put anything into the data field, so a parse failure is not
    // an error.
    serde_json::from_slice(data).ok()
}

fn parse_delegate(data: &[u8]) -> Option<DelegateInfo> {
    let doc = parse_data_json(data)?;
    let method = doc.get("method")?.as_str()?;
    match method {
        "delegate" => {
            let value = doc.get("params")?.get("value")?.as_str()?;
            let value = value.parse().ok()?;
            Some(DelegateInfo {
                value,
                is_delegate: true,
            })
        }
        "undelegate" => Some(DelegateInfo {
            value: 0,
            is_delegate: false,
        }),
        _ => None,
    }
}

fn parse_script_method(data: &[u8]) -> bool {
    parse_data_json(data)
        .and_then(|doc| doc.get("method")?.as_str().map(str::to_owned))
        .map(|method| method == "compile")
        .unwrap_or(false)
}

/// Outcome of [`read_transaction`]: the size consumed from the transaction
/// region (0 terminates the block) and the position one past the
/// transaction.
pub struct ReadTransaction {
    pub tx_size: u64,
    pub next_pos: usize,
    pub tx: Option<TransactionInfo>,
}

/// Parses one transaction starting at `pos`. With `parse_tx` unset only the
/// size is consumed, which lets callers skip over transaction windows.
pub fn read_transaction(
    raw: &[u8],
    pos: usize,
    parse_tx: bool,
    save_all_tx: bool,
    helper: &PrevTxSignHelper,
    validate: bool,
) -> NodeResult<ReadTransaction> {
    let all_tx_start = pos;
    let mut cur = pos;

    let tx_size = read_varint(raw, &mut cur)?;
    if tx_size == 0 {
        return Ok(ReadTransaction {
            tx_size: 0,
            next_pos: cur,
            tx: None,
        });
    }
    let end = cur
        .checked_add(tx_size as usize)
        .filter(|end| *end <= raw.len())
        .ok_or_else(out_of_array)?;
    if !parse_tx {
        return Ok(ReadTransaction {
            tx_size,
            next_pos: end,
            tx: None,
        });
    }

    let tx_start = cur;
    let region = &raw[..end];
    let mut tx = TransactionInfo::default();

    tx.to_address = Address::from_bytes(take(region, &mut cur, TO_ADDRESS_SIZE)?, false);
    tx.value = read_varint(region, &mut cur)? as i64;
    tx.fees = read_varint(region, &mut cur)? as i64;
    tx.nonce = read_varint(region, &mut cur)?;

    let data_size = read_varint(region, &mut cur)? as usize;
    tx.data = take(region, &mut cur, data_size)?.to_vec();

    let mut blocked_from = false;
    if data_size == 9 && tx.data[0] == 1 {
        blocked_from = true;
    } else if data_size > 0 {
        tx.delegate = parse_delegate(&tx.data);
    }

    if tx.to_address.is_script_address() {
        tx.script_info = Some(ScriptInfo {
            tx_raw: Vec::new(),
            is_initialize_script: !tx.data.is_empty() && parse_script_method(&tx.data),
        });
    }

    let end_clear_tx = cur;

    let sign_size = read_varint(region, &mut cur)? as usize;
    tx.sign = take(region, &mut cur, sign_size)?.to_vec();

    let pubkey_size = read_varint(region, &mut cur)? as usize;
    if pubkey_size != 0 {
        tx.pub_key = take(region, &mut cur, pubkey_size)?.to_vec();
    } else {
        tx.from_address = Address::empty();
    }

    let mut tx_hash_size = tx_size;
    if cur < end {
        let before_status = cur;
        tx.int_status = Some(read_varint(region, &mut cur)?);
        tx_hash_size -= (cur - before_status) as u64;
    }
    let all_tx_end = cur;

    if !tx.pub_key.is_empty() {
        let bin_address = crypto::address_bytes_from_pubkey(&tx.pub_key)
            .ok_or_else(|| NodeError::Protocol("incorrect pubkey script".into()))?;
        tx.from_address = Address::from_bytes(bin_address, blocked_from);
    }

    tx.hash = sha256d(&raw[tx_start..tx_start + tx_hash_size as usize]).to_vec();

    if let Some(script_info) = tx.script_info.as_mut() {
        script_info.tx_raw = raw[tx_start..end_clear_tx].to_vec();
    }
    tx.size_raw_tx = tx_size;
    if save_all_tx {
        tx.all_raw_tx = raw[all_tx_start..all_tx_end].to_vec();
    }

    tx.is_sign_block_tx = is_sign_block_tx(&tx, helper);

    if validate && !tx.from_address.is_initial_wallet() {
        let signed_region = &raw[tx_start..end_clear_tx];
        if !crypto::check_sign_data(&tx.sign, &tx.pub_key, signed_region)? {
            return Err(NodeError::Integrity("transaction signature mismatch".into()));
        }
    }

    tx.calc_real_fee();
    tx.is_initialized = true;

    Ok(ReadTransaction {
        tx_size,
        next_pos: cur,
        tx: Some(tx),
    })
}

fn read_block_prefix_without_size(raw: &[u8], header: &mut BlockHeader) -> NodeResult<()> {
    let mut pos = 0;
    header.block_type = read_u64_le(raw, &mut pos)?;
    header.timestamp = read_u64_le(raw, &mut pos)?;
    header.prev_hash = hex::encode(take(raw, &mut pos, 32)?);
    header.txs_hash = hex::encode(take(raw, &mut pos, 32)?);
    Ok(())
}

/// Walks the transaction region of `dump`, filling `bi.txs` and the derived
/// header fields. `begin_tx`/`count_tx` select a window; zero `count_tx`
/// means all.
fn read_block_txs(
    dump: &[u8],
    pos_in_file: u64,
    bi: &mut BlockInfo,
    save_all_tx: bool,
    begin_tx: usize,
    count_tx: usize,
    validate: bool,
) -> NodeResult<()> {
    bi.header.hash = hex::encode(sha256d(dump));

    // The dump starts at the block type, so the transactions begin one u64
    // short of the full prefix.
    let mut cur = (BLOCK_HEADER_SIZE - 8) as usize;
    if cur > dump.len() {
        return Err(out_of_array());
    }

    let mut helper = PrevTxSignHelper {
        is_first: true,
        is_prev_sign: true,
        prev_tx_data: Vec::new(),
    };
    let mut tx_index = 0usize;
    loop {
        let file_offset = cur as u64 + pos_in_file + 8;
        let parse = tx_index >= begin_tx;
        let read = read_transaction(dump, cur, parse, save_all_tx, &helper, validate)?;
        cur = read.next_pos;
        if read.tx_size == 0 {
            break;
        }

        let (is_sign, data) = match read.tx {
            Some(mut tx) => {
                tx.file_pos.offset = file_offset;
                let meta = (tx.is_sign_block_tx, tx.data.clone());
                bi.txs.push(tx);
                meta
            }
            None => (false, Vec::new()),
        };
        if count_tx != 0 && bi.txs.len() >= count_tx {
            break;
        }

        helper.is_prev_sign = is_sign;
        helper.prev_tx_data = data;
        helper.is_first = false;
        tx_index += 1;
    }

    if count_tx == 0 {
        bi.header.count_txs = Some(bi.txs.len() as u64);
    }
    if let Some(first) = bi.txs.first() {
        if first.from_address == first.to_address && first.value == 0 {
            bi.header.signature = first.data.clone();
        }
    }
    Ok(())
}

/// Parses a block dump fetched from a peer (no leading size prefix).
pub fn parse_block_dump(
    dump: &[u8],
    pos_in_file: u64,
    validate: bool,
    save_all_tx: bool,
    begin_tx: usize,
    count_tx: usize,
) -> NodeResult<BlockInfo> {
    let mut bi = BlockInfo::default();
    read_block_prefix_without_size(dump, &mut bi.header)?;
    read_block_txs(
        dump,
        pos_in_file,
        &mut bi,
        save_all_tx,
        begin_tx,
        count_tx,
        validate,
    )?;
    bi.header.block_size = dump.len() as u64;
    bi.header.file_pos.offset = pos_in_file;
    bi.header.end_block_pos = pos_in_file + bi.header.block_size + 8;
    Ok(bi)
}

fn file_size(file: &mut File) -> NodeResult<u64> {
    file.seek(SeekFrom::End(0))
        .map_err(|e| NodeError::Storage(e.to_string()))
}

fn read_at(file: &mut File, pos: u64, buf: &mut [u8]) -> NodeResult<()> {
    file.seek(SeekFrom::Start(pos))
        .map_err(|e| NodeError::Storage(e.to_string()))?;
    file.read_exact(buf)
        .map_err(|e| NodeError::Storage(e.to_string()))
}

/// Reads the next block record at `curr_pos`. Returns `None` when the file
/// does not yet hold a complete record there, leaving the position for a
/// later retry.
pub fn read_next_block_from_file(
    file: &mut File,
    curr_pos: u64,
    validate: bool,
    save_all_tx: bool,
) -> NodeResult<Option<(BlockInfo, Vec<u8>, u64)>> {
    let f_size = file_size(file)?;
    if f_size <= curr_pos || f_size - curr_pos < BLOCK_HEADER_SIZE {
        return Ok(None);
    }

    let mut size_buf = [0u8; 8];
    read_at(file, curr_pos, &mut size_buf)?;
    let block_size = u64::from_le_bytes(size_buf);
    if f_size - curr_pos < block_size + 8 {
        return Ok(None);
    }

    let mut dump = vec![0u8; block_size as usize];
    read_at(file, curr_pos + 8, &mut dump)?;

    let mut bi = BlockInfo::default();
    read_block_prefix_without_size(&dump, &mut bi.header)?;
    read_block_txs(&dump, curr_pos, &mut bi, save_all_tx, 0, 0, validate)?;
    bi.header.block_size = block_size;
    bi.header.file_pos.offset = curr_pos;

    let next_pos = curr_pos + block_size + 8;
    bi.header.end_block_pos = next_pos;
    Ok(Some((bi, dump, next_pos)))
}

/// Re-reads a single transaction from the archive, as stored under its
/// persisted file position.
pub fn read_one_transaction_from_file(
    file: &mut File,
    pos: u64,
    save_all_tx: bool,
) -> NodeResult<Option<TransactionInfo>> {
    let f_size = file_size(file)?;
    if f_size <= pos || f_size - pos < 8 {
        return Ok(None);
    }

    // First learn the size, then read the exact region.
    let probe_len = ((f_size - pos) as usize).min(9);
    let mut probe = vec![0u8; probe_len];
    read_at(file, pos, &mut probe)?;
    let mut probe_pos = 0;
    let tx_size = read_varint(&probe, &mut probe_pos)?;

    let total = probe_pos as u64 + tx_size;
    if f_size - pos < total {
        return Ok(None);
    }
    let mut raw = vec![0u8; total as usize];
    read_at(file, pos, &mut raw)?;

    let read = read_transaction(
        &raw,
        0,
        true,
        save_all_tx,
        &PrevTxSignHelper::default(),
        false,
    )?;
    Ok(read.tx)
}

/// Reads `[from_byte, to_byte)` of the dump stored at `curr_pos`, clamping
/// `to_byte` to the block size. Returns the full block size alongside.
pub fn block_dump_range(
    file: &mut File,
    curr_pos: u64,
    from_byte: u64,
    to_byte: u64,
) -> NodeResult<(u64, Vec<u8>)> {
    let f_size = file_size(file)?;
    if f_size <= curr_pos || f_size - curr_pos < BLOCK_HEADER_SIZE {
        return Ok((0, Vec::new()));
    }

    let mut size_buf = [0u8; 8];
    read_at(file, curr_pos, &mut size_buf)?;
    let block_size = u64::from_le_bytes(size_buf);

    if from_byte >= block_size {
        return Ok((0, Vec::new()));
    }
    let to_byte = to_byte.min(block_size);

    let mut result = vec![0u8; (to_byte - from_byte) as usize];
    read_at(file, curr_pos + 8 + from_byte, &mut result)?;
    Ok((block_size, result))
}

/// Appends one block record (`u64_le` size + dump) to the archive file,
/// returning the offset the record starts at.
pub fn append_block_to_file(path: &Path, dump: &[u8]) -> NodeResult<u64> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| NodeError::Storage(format!("cannot open {}: {e}", path.display())))?;
    let offset = file
        .seek(SeekFrom::End(0))
        .map_err(|e| NodeError::Storage(e.to_string()))?;
    file.write_all(&(dump.len() as u64).to_le_bytes())
        .and_then(|_| file.write_all(dump))
        .map_err(|e| NodeError::Storage(e.to_string()))?;
    Ok(offset)
}

/// Appends raw transaction bytes (no framing) to an open archive file,
/// returning the write offset. Used when only the watched transactions of a
/// block are retained.
pub fn append_transaction_to_file(file: &mut File, raw: &[u8]) -> NodeResult<u64> {
    let offset = file
        .seek(SeekFrom::End(0))
        .map_err(|e| NodeError::Storage(e.to_string()))?;
    file.write_all(raw)
        .map_err(|e| NodeError::Storage(e.to_string()))?;
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use test_case::test_case;

    #[test_case(0, 1)]
    #[test_case(249, 1)]
    #[test_case(250, 3)]
    #[test_case(65_535, 3)]
    #[test_case(65_536, 5)]
    #[test_case(u32::MAX as u64, 5)]
    #[test_case(u32::MAX as u64 + 1, 9)]
    #[test_case(u64::MAX, 9)]
    fn varint_boundaries(value: u64, encoded_len: usize) {
        let mut out = Vec::new();
        write_varint(&mut out, value);
        assert_eq!(out.len(), encoded_len);

        let mut pos = 0;
        assert_eq!(read_varint(&out, &mut pos).unwrap(), value);
        assert_eq!(pos, encoded_len);
    }

    #[test]
    fn varint_rejects_reserved_markers() {
        for marker in [253u8, 254, 255] {
            let raw = [marker, 0, 0, 0, 0, 0, 0, 0, 0];
            let mut pos = 0;
            assert!(matches!(
                read_varint(&raw, &mut pos),
                Err(NodeError::Protocol(_))
            ));
        }
    }

    #[test]
    fn parse_simple_block() {
        let to = testing::test_address(3);
        let txs = vec![testing::TxSpec::transfer(to.clone(), 500, 1, 7).data(b"hello".to_vec())];
        let block = testing::build_block(&"00".repeat(32), &txs);

        let bi = parse_block_dump(&block.dump, 0, false, true, 0, 0).unwrap();
        assert_eq!(bi.header.hash, block.hash);
        assert_eq!(bi.header.prev_hash, "00".repeat(32));
        assert_eq!(bi.header.block_size, block.dump.len() as u64);
        assert_eq!(bi.header.count_txs, Some(1));
        assert_eq!(bi.txs.len(), 1);

        let tx = &bi.txs[0];
        assert_eq!(tx.to_address, to);
        assert_eq!(tx.value, 500);
        assert_eq!(tx.fees, 1);
        assert_eq!(tx.nonce, 7);
        assert_eq!(tx.data, b"hello");
        assert!(tx.from_address.is_initial_wallet());
        assert_eq!(tx.hash.len(), 32);
    }

    #[test]
    fn hash_covers_dump_but_not_int_status() {
        let to = testing::test_address(9);
        let with_status =
            testing::build_block(&"00".repeat(32), &[testing::TxSpec::transfer(to.clone(), 1, 0, 0)
                .int_status(20)]);
        let without_status =
            testing::build_block(&"00".repeat(32), &[testing::TxSpec::transfer(to, 1, 0, 0)]);

        let parsed_with = parse_block_dump(&with_status.dump, 0, false, false, 0, 0).unwrap();
        let parsed_without = parse_block_dump(&without_status.dump, 0, false, false, 0, 0).unwrap();

        // The block hashes differ (the status is inside the dump), the tx
        // hashes do not (the status is outside the tx pre-image).
        assert_ne!(parsed_with.header.hash, parsed_without.header.hash);
        assert_eq!(parsed_with.txs[0].hash, parsed_without.txs[0].hash);
        assert_eq!(parsed_with.txs[0].int_status, Some(20));
        assert_eq!(
            parsed_with.header.hash,
            hex::encode(sha256d(&with_status.dump))
        );
    }

    #[test]
    fn five_byte_data_uses_one_byte_varint() {
        let to = testing::test_address(1);
        let spec = testing::TxSpec::transfer(to, 0, 0, 0).data(b"hello".to_vec());
        let tx_bytes = testing::build_tx_bytes(&spec);
        // to(25) + value + fees + nonce, then the data size marker.
        let data_size_pos = 25 + 3;
        assert_eq!(tx_bytes[data_size_pos], 5);

        let block = testing::build_block(&"11".repeat(32), &[spec]);
        let bi = parse_block_dump(&block.dump, 0, false, false, 0, 0).unwrap();
        assert_eq!(bi.txs[0].data, b"hello");
    }

    #[test]
    fn sign_block_chain_detection() {
        let key = testing::test_node_key();
        let prev_hash = "ab".repeat(32);
        let block = testing::build_block(
            &prev_hash,
            &[
                testing::TxSpec::sign_block(&key, &prev_hash),
                testing::TxSpec::sign_block(&key, &prev_hash),
                testing::TxSpec::transfer(testing::test_address(4), 10, 0, 0),
            ],
        );

        let bi = parse_block_dump(&block.dump, 0, false, false, 0, 0).unwrap();
        assert!(bi.txs[0].is_sign_block_tx);
        assert!(bi.txs[1].is_sign_block_tx);
        assert!(!bi.txs[2].is_sign_block_tx);
        // The first sign tx donates the block signature.
        assert_eq!(bi.header.signature, hex::decode(&prev_hash).unwrap());
    }

    #[test]
    fn validate_rejects_bad_signature() {
        let key = testing::test_node_key();
        let to = testing::test_address(2);
        let spec = testing::TxSpec::transfer(to, 77, 1, 1).signed_by(&key);
        let block = testing::build_block(&"00".repeat(32), &[spec]);

        assert!(parse_block_dump(&block.dump, 0, true, false, 0, 0).is_ok());

        let mut corrupted = block.dump.clone();
        // Flip a byte inside the signed prefix (the `value` varint).
        let flip_at = (BLOCK_HEADER_SIZE - 8) as usize + 1 + 25;
        corrupted[flip_at] ^= 0x01;
        let err = parse_block_dump(&corrupted, 0, true, false, 0, 0).unwrap_err();
        assert!(matches!(err, NodeError::Integrity(_)));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00.blk");
        let block = testing::build_block(
            &"00".repeat(32),
            &[testing::TxSpec::transfer(testing::test_address(5), 3, 0, 0)],
        );
        let offset = append_block_to_file(&path, &block.dump).unwrap();
        assert_eq!(offset, 0);
        let second_offset = append_block_to_file(&path, &block.dump).unwrap();
        assert_eq!(second_offset, block.dump.len() as u64 + 8);

        let mut file = File::open(&path).unwrap();
        let (bi, dump, next) = read_next_block_from_file(&mut file, 0, false, false)
            .unwrap()
            .unwrap();
        assert_eq!(dump, block.dump);
        assert_eq!(bi.header.hash, block.hash);
        assert_eq!(next, second_offset);

        // A truncated tail reports "no complete record yet".
        let at_end = read_next_block_from_file(&mut file, next + block.dump.len() as u64 + 8, false, false)
            .unwrap();
        assert!(at_end.is_none());

        let (real_size, slice) = block_dump_range(&mut file, 0, 8, 24).unwrap();
        assert_eq!(real_size, block.dump.len() as u64);
        assert_eq!(slice, &block.dump[8..24]);
    }

    #[test]
    fn delegate_and_script_side_parses() {
        let to = testing::test_address(6);
        let delegate_json = br#"{"method":"delegate","params":{"value":"1500"}}"#.to_vec();
        let undelegate_json = br#"{"method":"undelegate"}"#.to_vec();
        let mut script_addr_bytes = vec![0u8; 25];
        script_addr_bytes[0] = 8;
        let script_addr = Address::from_bytes(script_addr_bytes, false);

        let block = testing::build_block(
            &"00".repeat(32),
            &[
                testing::TxSpec::transfer(to.clone(), 1, 0, 0).data(delegate_json),
                testing::TxSpec::transfer(to, 1, 0, 1).data(undelegate_json),
                testing::TxSpec::transfer(script_addr, 1, 0, 2)
                    .data(br#"{"method":"compile"}"#.to_vec()),
            ],
        );
        let bi = parse_block_dump(&block.dump, 0, false, false, 0, 0).unwrap();

        let delegate = bi.txs[0].delegate.as_ref().unwrap();
        assert!(delegate.is_delegate);
        assert_eq!(delegate.value, 1500);
        let undelegate = bi.txs[1].delegate.as_ref().unwrap();
        assert!(!undelegate.is_delegate);

        let script = bi.txs[2].script_info.as_ref().unwrap();
        assert!(script.is_initialize_script);
        assert!(!script.tx_raw.is_empty());
    }

    #[test]
    fn tx_window_parsing() {
        let to = testing::test_address(7);
        let specs: Vec<_> = (0..5)
            .map(|i| testing::TxSpec::transfer(to.clone(), 100 + i, 0, i as u64))
            .collect();
        let block = testing::build_block(&"00".repeat(32), &specs);

        let bi = parse_block_dump(&block.dump, 0, false, false, 2, 2).unwrap();
        assert_eq!(bi.txs.len(), 2);
        assert_eq!(bi.txs[0].value, 102);
        assert_eq!(bi.txs[1].value, 103);
        // Partial parses leave the total count unset.
        assert_eq!(bi.header.count_txs, None);
    }
}
