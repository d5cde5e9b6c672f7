use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use torrent_node_config::constants::COUNT_ADVANCED_BLOCKS;
use torrent_node_types::{BlockHeader, BlockInfo, MinimalBlockHeader};

use crate::codec;
use crate::crypto;
use crate::error::{NodeError, NodeResult};
use crate::p2p::Peers;
use crate::source::fetcher::BlockFetcher;
use crate::source::file::archive_path;
use crate::source::BlockSource;
use crate::storage::cropped_file_name;

/// Follows the peer set: discovers the advertised head, prefetches the next
/// run of blocks and hands them to the driver one at a time.
pub struct NetworkBlockSource {
    fetcher: BlockFetcher,
    folder: PathBuf,
    save_all_tx: bool,
    validate: bool,
    verify_sign: bool,
    next_block_to_read: u64,
    last_block_in_chain: u64,
    servers: Vec<String>,
    /// Speculatively fetched blocks by number. A slot holds either the
    /// verified parse or the error to rethrow when the slot is consumed.
    advanced: BTreeMap<u64, NodeResult<(BlockInfo, Vec<u8>)>>,
}

/// Verification + parse of one fetched blob, run off the async threads.
fn verify_and_parse(
    header: &MinimalBlockHeader,
    raw: Vec<u8>,
    folder: &PathBuf,
    verify_sign: bool,
    validate: bool,
    save_all_tx: bool,
) -> NodeResult<(BlockInfo, Vec<u8>)> {
    let (dump, sender) = if verify_sign {
        let checked = crypto::check_signature_block(&raw)?;
        (
            checked.block,
            Some((checked.sign, checked.pubkey, checked.address)),
        )
    } else {
        (raw, None)
    };
    if dump.len() as u64 != header.block_size {
        return Err(NodeError::Protocol(format!(
            "dump size {} != advertised block size {}",
            dump.len(),
            header.block_size
        )));
    }

    let mut bi = codec::parse_block_dump(&dump, 0, validate, save_all_tx, 0, 0)?;
    bi.header.file_pos.file_name = archive_path(folder, &cropped_file_name(&header.file_name))
        .display()
        .to_string();
    if let Some((sign, pubkey, address)) = sender {
        bi.header.sender_sign = sign;
        bi.header.sender_pubkey = pubkey;
        bi.header.sender_address = address.into_bytes();
    }
    Ok((bi, dump))
}

impl NetworkBlockSource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        folder: impl Into<PathBuf>,
        max_advanced_load_blocks: usize,
        count_blocks_in_batch: usize,
        compress: bool,
        peers: Arc<Peers>,
        save_all_tx: bool,
        validate: bool,
        verify_sign: bool,
    ) -> Self {
        Self {
            fetcher: BlockFetcher::new(
                max_advanced_load_blocks,
                count_blocks_in_batch,
                compress,
                peers,
            ),
            folder: folder.into(),
            save_all_tx,
            validate,
            verify_sign,
            next_block_to_read: 0,
            last_block_in_chain: 0,
            servers: Vec::new(),
            advanced: BTreeMap::new(),
        }
    }

    async fn fill_advanced(&mut self) -> NodeResult<()> {
        self.advanced.clear();

        if self.servers.is_empty() {
            return Err(NodeError::Protocol("servers empty".into()));
        }
        let count_advanced = (COUNT_ADVANCED_BLOCKS as u64)
            .min(self.last_block_in_chain - self.next_block_to_read + 1);

        // Fetch phase: headers and raw dumps, sequentially per slot (the
        // fetcher batches under the hood).
        let servers = self.servers.clone();
        let last_block = self.last_block_in_chain;
        let verify_sign = self.verify_sign;
        let mut fetched: BTreeMap<u64, NodeResult<(MinimalBlockHeader, Vec<u8>)>> = BTreeMap::new();
        for i in 0..count_advanced {
            let number = self.next_block_to_read + i;
            let result = async {
                let header = self
                    .fetcher
                    .get_block_header(number, last_block, &servers[0])
                    .await?;
                let raw = self
                    .fetcher
                    .get_block_dump(&header.hash, header.block_size, &servers, verify_sign)
                    .await?;
                Ok((header, raw))
            }
            .await;
            fetched.insert(number, result);
        }

        // Verify phase: signature checks and parses run in parallel on the
        // blocking pool; per-slot failures stay in their slot.
        let mut handles = Vec::with_capacity(fetched.len());
        for (number, result) in fetched {
            let folder = self.folder.clone();
            let verify_sign = self.verify_sign;
            let validate = self.validate;
            let save_all_tx = self.save_all_tx;
            handles.push((
                number,
                tokio::task::spawn_blocking(move || {
                    let (header, raw) = result?;
                    verify_and_parse(&header, raw, &folder, verify_sign, validate, save_all_tx)
                }),
            ));
        }
        for (number, handle) in handles {
            let slot = handle
                .await
                .map_err(|e| NodeError::Protocol(format!("verify task failed: {e}")))?;
            self.advanced.insert(number, slot);
        }
        Ok(())
    }
}

#[async_trait]
impl BlockSource for NetworkBlockSource {
    async fn initialize(&mut self) -> NodeResult<()> {
        std::fs::create_dir_all(&self.folder)
            .map_err(|e| NodeError::Storage(format!("cannot create archive folder: {e}")))?;
        Ok(())
    }

    async fn do_process(
        &mut self,
        count_blocks: u64,
        _last_block_hash: &str,
    ) -> NodeResult<(bool, u64)> {
        self.next_block_to_read = count_blocks + 1;
        let last_block = self.fetcher.get_last_block().await?;
        self.last_block_in_chain = last_block.last_block;
        self.servers = last_block.servers;

        self.advanced.clear();
        self.fetcher.clear_advanced();

        Ok((
            self.last_block_in_chain >= self.next_block_to_read,
            self.last_block_in_chain,
        ))
    }

    async fn process(&mut self) -> NodeResult<Option<(BlockInfo, Vec<u8>)>> {
        if self.last_block_in_chain < self.next_block_to_read {
            return Ok(None);
        }

        if !self.advanced.contains_key(&self.next_block_to_read) {
            self.fill_advanced().await?;
        }
        let slot = self
            .advanced
            .remove(&self.next_block_to_read)
            .ok_or_else(|| NodeError::Protocol("incorrect results".into()))?;
        let (bi, dump) = slot?;
        self.next_block_to_read += 1;
        Ok(Some((bi, dump)))
    }

    async fn get_existing_block(&self, header: &BlockHeader) -> NodeResult<(BlockInfo, Vec<u8>)> {
        let block_number = header
            .block_number
            .ok_or_else(|| NodeError::Integrity("block number not set".into()))?;
        let last_block = self.fetcher.get_last_block().await?;
        let minimal = self
            .fetcher
            .get_block_header_without_advance(block_number, &last_block.servers[0])
            .await?;
        let raw = self
            .fetcher
            .get_block_dump_without_advance(
                &minimal.hash,
                minimal.block_size,
                &last_block.servers,
                self.verify_sign,
            )
            .await?;

        let (dump, sender) = if self.verify_sign {
            let checked = crypto::check_signature_block(&raw)?;
            (
                checked.block,
                Some((checked.sign, checked.pubkey, checked.address)),
            )
        } else {
            (raw, None)
        };
        if dump.len() as u64 != minimal.block_size {
            return Err(NodeError::Protocol(
                "dump size != advertised block size".into(),
            ));
        }

        let mut bi = codec::parse_block_dump(
            &dump,
            header.file_pos.offset,
            self.validate,
            self.save_all_tx,
            0,
            0,
        )?;
        bi.header.file_pos.file_name = header.file_pos.file_name.clone();
        bi.header.block_number = header.block_number;
        if let Some((sign, pubkey, address)) = sender {
            bi.header.sender_sign = sign;
            bi.header.sender_pubkey = pubkey;
            bi.header.sender_address = address.into_bytes();
        }
        for tx in &mut bi.txs {
            tx.file_pos.file_name = header.file_pos.file_name.clone();
            tx.block_number = block_number;
        }
        Ok((bi, dump))
    }

    fn known_block(&self) -> u64 {
        self.last_block_in_chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StopFlag;
    use crate::testing;
    use httptest::{cycle, matchers::request, responders::status_code, Expectation, Server};
    use torrent_node_types::GENESIS_BLOCK_HASH;

    fn header_json(number: u64, block: &testing::BuiltBlock, prev: &str) -> String {
        format!(
            r#"{{"number":{number},"hash":"{}","prev_hash":"{prev}","size":{},"fileName":"/srv/blocks/00.blk"}}"#,
            block.hash,
            block.dump.len(),
        )
    }

    fn source_for(server: &Server) -> NetworkBlockSource {
        let (_handle, stop) = StopFlag::new();
        let peers = Arc::new(Peers::new(vec![server.url_str("/")], 1, stop).unwrap());
        NetworkBlockSource::new("/tmp/unused", 8, 1, false, peers, false, false, false)
    }

    #[tokio::test]
    async fn fetches_and_parses_advertised_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let blocks = testing::build_chain(GENESIS_BLOCK_HASH, 2);
        let server = Server::run();

        server.expect(
            Expectation::matching(request::method_path("POST", "/get-count-blocks"))
                .respond_with(status_code(200).body(r#"{"result":{"count_blocks":2}}"#)),
        );
        // Header prefetch issues one singleton request per block, in order.
        server.expect(
            Expectation::matching(request::method_path("POST", "/get-block-by-number"))
                .times(2)
                .respond_with(cycle![
                    status_code(200).body(format!(
                        r#"{{"result":{}}}"#,
                        header_json(1, &blocks[0], GENESIS_BLOCK_HASH)
                    )),
                    status_code(200).body(format!(
                        r#"{{"result":{}}}"#,
                        header_json(2, &blocks[1], &blocks[0].hash)
                    )),
                ]),
        );
        // Dumps are served as one batched multi-dump response.
        let mut multi = Vec::new();
        for block in &blocks {
            torrent_node_types::record::be::write_framed(&mut multi, &block.dump);
        }
        server.expect(
            Expectation::matching(request::method_path("POST", "/get-dumps-blocks-by-hash"))
                .times(1..)
                .respond_with(status_code(200).body(multi)),
        );

        let (_handle, stop) = StopFlag::new();
        let peers = Arc::new(Peers::new(vec![server.url_str("/")], 1, stop).unwrap());
        let mut source = NetworkBlockSource::new(
            dir.path().join("blocks"),
            8,
            1,
            false,
            peers,
            false,
            false,
            false,
        );
        source.initialize().await.unwrap();

        let (more, known) = source.do_process(0, GENESIS_BLOCK_HASH).await.unwrap();
        assert!(more);
        assert_eq!(known, 2);
        assert_eq!(source.known_block(), 2);

        let (bi1, dump1) = source.process().await.unwrap().unwrap();
        assert_eq!(bi1.header.hash, blocks[0].hash);
        assert_eq!(dump1, blocks[0].dump);
        // The local archive path replaces the peer's own path.
        assert!(bi1
            .header
            .file_pos
            .file_name
            .starts_with(dir.path().join("blocks").to_str().unwrap()));

        let (bi2, _) = source.process().await.unwrap().unwrap();
        assert_eq!(bi2.header.hash, blocks[1].hash);
        assert!(source.process().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn round_without_new_blocks_is_idle() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/get-count-blocks"))
                .respond_with(status_code(200).body(r#"{"result":{"count_blocks":5}}"#)),
        );
        let mut source = source_for(&server);
        let (more, known) = source.do_process(5, "whatever").await.unwrap();
        assert!(!more);
        assert_eq!(known, 5);
        assert!(source.process().await.unwrap().is_none());
    }
}
