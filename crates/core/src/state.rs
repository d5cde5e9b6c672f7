//! Shared node state: everything the query surface reads and the sync
//! driver writes. One `Arc<NodeState>` is handed to the HTTP handlers, the
//! workers and the driver.

use std::fs::File;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use torrent_node_config::types::Modules;
use torrent_node_types::{BlockHeader, BlockInfo};

use crate::blockchain::BlockChain;
use crate::cache::AllCaches;
use crate::codec;
use crate::crypto::{self, NodeKey};
use crate::error::{NodeError, NodeResult};
use crate::storage::Storage;

pub struct NodeState {
    pub storage: Arc<Storage>,
    pub blockchain: Arc<BlockChain>,
    pub caches: Arc<AllCaches>,
    pub modules: Modules,
    pub node_key: Option<Arc<NodeKey>>,
    known_last_block: AtomicU64,
}

impl NodeState {
    pub fn new(
        storage: Arc<Storage>,
        blockchain: Arc<BlockChain>,
        caches: Arc<AllCaches>,
        modules: Modules,
        node_key: Option<Arc<NodeKey>>,
    ) -> Self {
        Self {
            storage,
            blockchain,
            caches,
            modules,
            node_key,
            known_last_block: AtomicU64::new(0),
        }
    }

    pub fn known_block(&self) -> u64 {
        self.known_last_block.load(Ordering::Relaxed)
    }

    pub fn set_known_block(&self, number: u64) {
        self.known_last_block.store(number, Ordering::Relaxed);
    }

    fn require_raw_blocks(&self) -> NodeResult<()> {
        if !self.modules.block() || !self.modules.block_raw() || self.modules.users() {
            return Err(NodeError::Protocol(
                "modules block and block_raw not set".into(),
            ));
        }
        Ok(())
    }

    fn open_block_file(header: &BlockHeader) -> NodeResult<File> {
        if header.file_pos.file_name.is_empty() {
            return Err(NodeError::Storage("empty file name in block header".into()));
        }
        File::open(&header.file_pos.file_name).map_err(|e| {
            NodeError::Storage(format!("cannot open {}: {e}", header.file_pos.file_name))
        })
    }

    /// Raw dump slice `[from_byte, to_byte)` of a block, from the dump
    /// cache or the archive. With `is_sign` the slice is wrapped into the
    /// signed envelope: a big-endian size prefix when the range starts at
    /// 0, the signature trailer when it reaches the end.
    pub fn block_dump(
        &self,
        header: &BlockHeader,
        from_byte: u64,
        to_byte: u64,
        is_sign: bool,
    ) -> NodeResult<Vec<u8>> {
        self.require_raw_blocks()?;

        let cached = self.caches.block_dump_cache.get_value(&header.hash);
        let (real_size, mut res, full_dump) = match cached {
            Some(dump) => {
                let real_size = dump.len() as u64;
                let to = to_byte.min(real_size);
                let from = from_byte.min(to);
                let slice = dump[from as usize..to as usize].to_vec();
                let full = (is_sign && to_byte >= real_size).then(|| dump.as_ref().clone());
                (real_size, slice, full)
            }
            None => {
                let mut file = Self::open_block_file(header)?;
                let (real_size, slice) =
                    codec::block_dump_range(&mut file, header.file_pos.offset, from_byte, to_byte)?;
                let full = if is_sign && to_byte >= real_size {
                    if from_byte == 0 {
                        Some(slice.clone())
                    } else {
                        let (_, full) =
                            codec::block_dump_range(&mut file, header.file_pos.offset, 0, to_byte)?;
                        Some(full)
                    }
                } else {
                    None
                };
                (real_size, slice, full)
            }
        };

        if is_sign {
            let key = self
                .node_key
                .as_deref()
                .ok_or_else(|| NodeError::User("private key not set".into()))?;
            if from_byte == 0 {
                let mut framed = crypto::make_first_part_block_sign(real_size).to_vec();
                framed.extend_from_slice(&res);
                res = framed;
            }
            if to_byte >= real_size {
                let full_dump =
                    full_dump.ok_or_else(|| NodeError::Storage("block dump not readable".into()))?;
                res.extend_from_slice(&crypto::make_block_sign(&full_dump, key));
            }
        }
        Ok(res)
    }

    /// Full parse of a stored block including its transactions, used by the
    /// `full` and `hashes` projections. `begin_tx`/`count_tx` page through
    /// large blocks.
    pub fn full_block(
        &self,
        header: &BlockHeader,
        begin_tx: usize,
        count_tx: usize,
    ) -> NodeResult<BlockInfo> {
        self.require_raw_blocks()?;
        let block_number = header
            .block_number
            .ok_or_else(|| NodeError::NotFound(format!("block {}", header.hash)))?;
        if block_number == 0 {
            return Ok(BlockInfo {
                header: header.clone(),
                txs: Vec::new(),
            });
        }

        let mut bi = match self.caches.block_dump_cache.get_value(&header.hash) {
            Some(dump) => codec::parse_block_dump(
                &dump,
                header.file_pos.offset,
                false,
                false,
                begin_tx,
                count_tx,
            )?,
            None => {
                let mut file = Self::open_block_file(header)?;
                let Some((bi, _dump, _)) = codec::read_next_block_from_file(
                    &mut file,
                    header.file_pos.offset,
                    false,
                    false,
                )?
                else {
                    return Err(NodeError::Storage("block not readable".into()));
                };
                let mut bi = bi;
                if begin_tx != 0 || count_tx != 0 {
                    let skip = begin_tx.min(bi.txs.len());
                    bi.txs.drain(..skip);
                    if count_tx != 0 {
                        bi.txs.truncate(count_tx);
                    }
                }
                bi
            }
        };

        let mut full_header = header.clone();
        full_header.count_txs = bi.header.count_txs.or(header.count_txs);
        bi.header = full_header;
        for tx in &mut bi.txs {
            tx.block_number = block_number;
            tx.file_pos.file_name = bi.header.file_pos.file_name.clone();
        }
        Ok(bi)
    }

    /// Re-reads the not-yet-initialized signature transactions referenced
    /// by a header from the archive.
    pub fn fill_signed_transactions(&self, header: &mut BlockHeader) -> NodeResult<()> {
        let mut open: Option<(String, File)> = None;
        for tx in &mut header.block_signatures {
            if tx.is_initialized || tx.file_pos.file_name.is_empty() {
                continue;
            }
            if open
                .as_ref()
                .map(|(name, _)| name != &tx.file_pos.file_name)
                .unwrap_or(true)
            {
                let file = File::open(&tx.file_pos.file_name).map_err(|e| {
                    NodeError::Storage(format!("cannot open {}: {e}", tx.file_pos.file_name))
                })?;
                open = Some((tx.file_pos.file_name.clone(), file));
            }
            let (name, file) = open.as_mut().expect("file opened above");
            let block_number = tx.block_number;
            let file_name = name.clone();
            let offset = tx.file_pos.offset;
            let read = codec::read_one_transaction_from_file(file, offset, false)?
                .ok_or_else(|| NodeError::Storage("incorrect read transaction info".into()))?;
            *tx = read;
            tx.block_number = block_number;
            tx.file_pos.file_name = file_name;
            tx.file_pos.offset = offset;
        }
        Ok(())
    }

    /// Signs an arbitrary byte string with the node key, returning the
    /// framed sign/pubkey/address envelope.
    pub fn sign_test_string(&self, data: &[u8]) -> NodeResult<Vec<u8>> {
        let key = self
            .node_key
            .as_deref()
            .ok_or_else(|| NodeError::User("private key not set".into()))?;
        Ok(crypto::make_test_sign(data, key))
    }
}
