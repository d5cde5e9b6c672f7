//! Sync driver: wires a block source into the resolver, the worker stages
//! and the KV store, with startup recovery and a paced steady loop.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::JoinHandle;

use torrent_node_config::constants::{SYNC_LOOP_PERIOD, VERSION_DB};
use torrent_node_types::{Address, BlockInfo, BlocksMetadata, FileInfo, FilePosition};

use crate::codec;
use crate::error::{NodeError, NodeResult, StopFlag};
use crate::source::{BlockSource, FileBlockSource};
use crate::state::NodeState;
use crate::storage::{self, Batch};
use crate::workers::{Worker, WorkerCache, WorkerItem, WorkerMain, WorkerNodeTest};

/// Behavior switches of one sync run, distilled from the node config.
#[derive(Clone, Copy, Default)]
pub struct SyncSettings {
    /// Persist fetched dumps into the local archive (`block_raw` mode).
    pub save_block_to_files: bool,
    /// One-block look-ahead: admit a block only once its successor's
    /// sign-block transactions confirm its hash.
    pub validate: bool,
}

pub struct Sync {
    state: Arc<NodeState>,
    source: Box<dyn BlockSource>,
    users: Arc<Mutex<BTreeSet<Address>>>,
    settings: SyncSettings,
    workers: Vec<Arc<dyn Worker>>,
    worker_tasks: Vec<JoinHandle<()>>,
    stop: StopFlag,
}

fn confirm_prev_block(prev: &BlockInfo, next: &BlockInfo) -> NodeResult<()> {
    let this_hash = hex::decode(&prev.header.hash)
        .map_err(|_| NodeError::Protocol("block hash is not hex".into()))?;
    for tx in &next.txs {
        if tx.is_sign_block_tx && tx.data != this_hash {
            return Err(NodeError::Integrity(
                "block signatures not confirmed".into(),
            ));
        }
    }
    Ok(())
}

impl Sync {
    pub fn new(
        state: Arc<NodeState>,
        source: Box<dyn BlockSource>,
        settings: SyncSettings,
        stop: StopFlag,
    ) -> Self {
        Self {
            state,
            source,
            users: Arc::new(Mutex::new(BTreeSet::new())),
            settings,
            workers: Vec::new(),
            worker_tasks: Vec::new(),
            stop,
        }
    }

    pub fn state(&self) -> Arc<NodeState> {
        Arc::clone(&self.state)
    }

    /// Adds addresses to the watch set consulted by the persistence filter
    /// (module `users`).
    pub fn add_users(&self, addresses: impl IntoIterator<Item = Address>) {
        let mut users = self.users.lock().expect("users lock poisoned");
        users.extend(addresses);
    }

    /// Runs the sync: startup checks, resolver restore, worker recovery,
    /// then the steady loop until the stop flag flips.
    pub async fn synchronize(mut self) -> NodeResult<()> {
        self.prepare().await?;

        loop {
            let begin = Instant::now();
            match self.sync_iteration().await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => break,
                Err(err) => tracing::error!("sync iteration failed: {err}"),
            }
            if self.stop.is_stopped() {
                break;
            }
            let elapsed = begin.elapsed();
            if elapsed < SYNC_LOOP_PERIOD {
                tokio::time::sleep(SYNC_LOOP_PERIOD - elapsed).await;
            }
        }

        tracing::info!("stop synchronize loop");
        // Dropping the queues lets every worker drain and finish.
        self.workers.clear();
        for task in self.worker_tasks.drain(..) {
            let _ = task.await;
        }
        Ok(())
    }

    /// Startup: module/version pinning, resolver restore from the header
    /// store, worker construction and checkpoint recovery.
    async fn prepare(&mut self) -> NodeResult<()> {
        let modules = self.state.modules;
        if !modules.block() {
            return Err(NodeError::User("module block not set".into()));
        }

        match storage::find_modules(&self.state.storage)? {
            Some(pinned) if !pinned.is_empty() => {
                if pinned != modules.to_bitset_string() {
                    return Err(NodeError::User(
                        "modules changed in this database".into(),
                    ));
                }
            }
            _ => storage::save_modules(&self.state.storage, &modules.to_bitset_string())?,
        }
        match storage::find_version_db(&self.state.storage)? {
            Some(pinned) if !pinned.is_empty() => {
                if pinned != VERSION_DB {
                    return Err(NodeError::User("version database does not match".into()));
                }
            }
            _ => storage::save_version_db(&self.state.storage, VERSION_DB)?,
        }

        let metadata =
            BlocksMetadata::deserialize(&storage::find_block_metadata(&self.state.storage)?)?;

        self.source.initialize().await?;

        self.state.blockchain.clear();
        for raw in storage::all_block_headers(&self.state.storage)? {
            let header = torrent_node_types::BlockHeader::deserialize(&raw)?;
            self.state.blockchain.add_without_calc(header)?;
        }
        if !metadata.block_hash.is_empty() {
            let count_blocks = self.state.blockchain.calc_blockchain(&metadata.block_hash)?;
            tracing::info!(count_blocks, tip = %metadata.block_hash, "restored blockchain");
        }

        let (cache_worker, cache_task) =
            WorkerCache::spawn(Arc::clone(&self.state.caches), self.stop.clone());
        self.workers.push(cache_worker);
        self.worker_tasks.push(cache_task);

        let (main_worker, main_task) =
            WorkerMain::spawn(Arc::clone(&self.state.storage), self.stop.clone())?;
        self.workers.push(main_worker);
        self.worker_tasks.push(main_task);

        if modules.node_test() {
            let (node_test_worker, node_test_task) =
                WorkerNodeTest::spawn(Arc::clone(&self.state.storage), self.stop.clone())?;
            self.workers.push(node_test_worker);
            self.worker_tasks.push(node_test_task);
        }

        self.recover_workers().await
    }

    /// Re-feeds blocks `[min checkpoint + 1, tip]` to every worker whose
    /// own checkpoint lags. The local archive is preferred; the block
    /// source serves what the archive cannot.
    async fn recover_workers(&mut self) -> NodeResult<()> {
        let Some(min_init) = self
            .workers
            .iter()
            .filter_map(|worker| worker.init_block_number())
            .min()
        else {
            return Ok(());
        };

        let count_blocks = self.state.blockchain.count_blocks();
        let from_block = min_init + 1;
        if from_block > count_blocks {
            return Ok(());
        }
        tracing::info!(from_block, "retry from block");

        for number in from_block..=count_blocks {
            self.stop.check()?;
            let header = self
                .state
                .blockchain
                .get_block_by_number(number)
                .ok_or_else(|| NodeError::NotFound(format!("block {number}")))?;

            let (mut bi, dump) =
                match FileBlockSource::existing_block(&header, self.settings.validate) {
                    Ok(read) => read,
                    Err(err) => {
                        tracing::warn!("dont get existing block: {err}");
                        self.source.get_existing_block(&header).await?
                    }
                };
            self.filter_transactions_to_save(&mut bi);

            let bi = Arc::new(bi);
            let dump = Arc::new(dump);
            for worker in &self.workers {
                let lags = worker
                    .init_block_number()
                    .map(|init| init < number)
                    .unwrap_or(false);
                if lags {
                    worker.enqueue((Arc::clone(&bi), Arc::clone(&dump))).await?;
                }
            }
        }
        Ok(())
    }

    /// One round of the steady loop: ask the source for the upstream head,
    /// then drain the blocks it has to offer.
    async fn sync_iteration(&mut self) -> NodeResult<()> {
        let count_blocks = self.state.blockchain.count_blocks();
        let last_hash = self.state.blockchain.get_last_block().hash;
        let (is_continue, known_block) =
            self.source.do_process(count_blocks, &last_hash).await?;
        self.state.set_known_block(known_block);
        if !is_continue {
            return Ok(());
        }

        // In validate mode `pending` buffers one block until its successor
        // confirms it; the unconfirmed tip simply stays pending into the
        // next round.
        let mut pending: Option<(BlockInfo, Vec<u8>)> = None;
        loop {
            self.stop.check()?;
            let Some((next_bi, next_dump)) = self.source.process().await? else {
                break;
            };

            let current = if self.settings.validate {
                match pending.take() {
                    None => {
                        pending = Some((next_bi, next_dump));
                        continue;
                    }
                    Some((prev_bi, prev_dump)) => {
                        confirm_prev_block(&prev_bi, &next_bi)?;
                        pending = Some((next_bi, next_dump));
                        (prev_bi, prev_dump)
                    }
                }
            } else {
                (next_bi, next_dump)
            };

            self.process_block(current.0, current.1).await?;
        }
        Ok(())
    }

    async fn process_block(&mut self, mut bi: BlockInfo, dump: Vec<u8>) -> NodeResult<()> {
        let started = Instant::now();

        self.filter_transactions_to_save(&mut bi);
        if self.settings.save_block_to_files {
            self.save_transactions(&mut bi, &dump)?;
        }
        for tx in &bi.txs {
            if tx.is_sign_block_tx {
                bi.header.block_signatures.push(tx.clone());
            }
        }

        let block_number = self.state.blockchain.add_block(bi.header.clone())?;
        if block_number == 0 {
            return Err(NodeError::Integrity("incorrect block number".into()));
        }
        bi.header.block_number = Some(block_number);
        for tx in &mut bi.txs {
            tx.block_number = block_number;
        }

        tracing::info!(
            block = block_number,
            txs = bi.txs.len(),
            hash = %bi.header.hash,
            parent = %bi.header.prev_hash,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "block received"
        );

        // The header and head pointer must be durable before any worker
        // checkpoint can advance past this block.
        self.save_block_to_kv(&bi)?;

        let bi = Arc::new(bi);
        let dump = Arc::new(dump);
        for worker in &self.workers {
            let item: WorkerItem = (Arc::clone(&bi), Arc::clone(&dump));
            worker.enqueue(item).await?;
        }
        Ok(())
    }

    /// Marks which transactions survive persistence: everything, unless
    /// module `users` restricts it to the watch set and signature carriers.
    fn filter_transactions_to_save(&self, bi: &mut BlockInfo) {
        let users_on = self.state.modules.users();
        let watched = if users_on {
            self.users.lock().expect("users lock poisoned").clone()
        } else {
            BTreeSet::new()
        };
        for tx in &mut bi.txs {
            tx.is_save_to_db = !users_on
                || watched.contains(&tx.from_address)
                || watched.contains(&tx.to_address)
                || tx.is_sign_block_tx;
            if !tx.is_save_to_db {
                tx.all_raw_tx = Vec::new();
            }
        }
    }

    /// Writes the fetched dump (or only the watched transactions) into the
    /// local archive and rewrites the file positions accordingly.
    fn save_transactions(&self, bi: &mut BlockInfo, dump: &[u8]) -> NodeResult<()> {
        let file_name = bi.header.file_pos.file_name.clone();
        if file_name.is_empty() {
            return Err(NodeError::Storage("file name not set".into()));
        }

        if !self.state.modules.users() {
            let offset = codec::append_block_to_file(Path::new(&file_name), dump)?;
            bi.header.file_pos.offset = offset;
            bi.header.end_block_pos = offset + dump.len() as u64 + 8;
            for tx in &mut bi.txs {
                tx.file_pos.file_name = file_name.clone();
                tx.file_pos.offset += offset;
            }
        } else {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file_name)
                .map_err(|e| NodeError::Storage(format!("cannot open {file_name}: {e}")))?;
            for tx in &mut bi.txs {
                if tx.is_save_to_db {
                    let offset = codec::append_transaction_to_file(&mut file, &tx.all_raw_tx)?;
                    tx.file_pos.file_name = file_name.clone();
                    tx.file_pos.offset = offset;
                }
                tx.all_raw_tx = Vec::new();
            }
        }
        Ok(())
    }

    /// Persists the header, advances the chain-head metadata (smaller hash
    /// wins a tie on the same parent) and records the archive tail.
    fn save_block_to_kv(&self, bi: &BlockInfo) -> NodeResult<()> {
        let mut batch = Batch::new();
        if self.state.modules.block() {
            batch.add_block_header(&bi.header.hash, &bi.header.serialize()?);
        }

        let metadata =
            BlocksMetadata::deserialize(&storage::find_block_metadata(&self.state.storage)?)?;
        let block_hash = if metadata.prev_block_hash == bi.header.prev_hash
            && !metadata.block_hash.is_empty()
            && metadata.block_hash < bi.header.hash
        {
            metadata.block_hash
        } else {
            bi.header.hash.clone()
        };
        let new_metadata = BlocksMetadata {
            block_hash,
            prev_block_hash: bi.header.prev_hash.clone(),
            block_number: bi.header.block_number.unwrap_or(0),
        };
        batch.add_block_metadata(&new_metadata.serialize()?);

        if !bi.header.file_pos.file_name.is_empty() {
            let info = FileInfo {
                file_pos: FilePosition::new(
                    bi.header.file_pos.file_name.clone(),
                    bi.header.end_block_pos,
                ),
            };
            batch.add_file_metadata(
                &storage::cropped_file_name(&info.file_pos.file_name),
                &info.serialize(),
            );
        }

        self.state.storage.apply(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::BlockChain;
    use crate::cache::AllCaches;
    use crate::storage::Storage;
    use crate::testing;
    use torrent_node_config::types::Modules;
    use torrent_node_config::DbConfig;
    use torrent_node_types::{MainBlockInfo, GENESIS_BLOCK_HASH};

    fn temp_state(dir: &Path, modules: &[&str]) -> Arc<NodeState> {
        let config = DbConfig {
            path_to_bd: dir.join("db").display().to_string(),
            write_buffer_size_mb: 4,
            lru_cache_mb: 1,
            is_bloom_filter: false,
            is_checks: false,
        };
        Arc::new(NodeState::new(
            Arc::new(Storage::open(&config).unwrap()),
            Arc::new(BlockChain::new()),
            Arc::new(AllCaches::new(16, 16)),
            Modules::parse(modules.iter().copied()).unwrap(),
            None,
        ))
    }

    fn file_sync(state: &Arc<NodeState>, folder: &Path, stop: StopFlag) -> Sync {
        let source = Box::new(FileBlockSource::new(
            Arc::clone(&state.storage),
            folder,
            false,
        ));
        Sync::new(Arc::clone(state), source, SyncSettings::default(), stop)
    }

    async fn drain_file_source(sync: &mut Sync) {
        // The file source reports one pause per file boundary; a few rounds
        // drain any small archive.
        for _ in 0..4 {
            sync.sync_iteration().await.unwrap();
        }
    }

    async fn wait_for_main_checkpoint(state: &NodeState, number: u64) -> MainBlockInfo {
        for _ in 0..200 {
            let meta =
                MainBlockInfo::deserialize(&storage::find_main_block(&state.storage).unwrap())
                    .unwrap();
            if meta.block_number == number {
                return meta;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("main checkpoint never reached block {number}");
    }

    #[tokio::test]
    async fn cold_start_indexes_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let blocks = testing::build_chain(GENESIS_BLOCK_HASH, 3);
        testing::write_archive(dir.path(), "00.blk", &blocks);

        let state = temp_state(dir.path(), &["block"]);
        let (_stop_handle, stop) = StopFlag::new();
        let mut sync = file_sync(&state, dir.path(), stop);

        sync.prepare().await.unwrap();
        drain_file_source(&mut sync).await;

        assert_eq!(state.blockchain.count_blocks(), 3);
        for (i, block) in blocks.iter().enumerate() {
            let stored = state
                .storage
                .get(storage::block_key(&block.hash))
                .unwrap()
                .expect("header persisted");
            let header = torrent_node_types::BlockHeader::deserialize(&stored).unwrap();
            assert_eq!(header.hash, block.hash);
            assert_eq!(
                state.blockchain.get_block_by_number(i as u64 + 1).unwrap().hash,
                block.hash
            );
        }

        let metadata =
            BlocksMetadata::deserialize(&storage::find_block_metadata(&state.storage).unwrap())
                .unwrap();
        assert_eq!(metadata.block_hash, blocks[2].hash);

        let main = wait_for_main_checkpoint(&state, 3).await;
        assert_eq!(main.block_hash, blocks[2].hash);

        // The dump cache gets warmed along the way.
        for _ in 0..200 {
            if state
                .caches
                .block_dump_cache
                .get_value(&blocks[2].hash)
                .is_some()
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(state
            .caches
            .block_dump_cache
            .get_value(&blocks[2].hash)
            .is_some());
    }

    #[tokio::test]
    async fn restart_restores_resolver_and_skips_indexed_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let blocks = testing::build_chain(GENESIS_BLOCK_HASH, 3);
        testing::write_archive(dir.path(), "00.blk", &blocks);

        // First run indexes everything.
        let state = temp_state(dir.path(), &["block"]);
        let (_stop_handle, stop) = StopFlag::new();
        let mut sync = file_sync(&state, dir.path(), stop);
        sync.prepare().await.unwrap();
        drain_file_source(&mut sync).await;
        wait_for_main_checkpoint(&state, 3).await;
        drop(sync);

        // Second run on the same database: the resolver is rebuilt from
        // the header store and the workers resume from their checkpoints.
        let restarted = Arc::new(NodeState::new(
            Arc::clone(&state.storage),
            Arc::new(BlockChain::new()),
            Arc::new(AllCaches::new(16, 16)),
            state.modules,
            None,
        ));
        let (_stop_handle2, stop2) = StopFlag::new();
        let mut sync = file_sync(&restarted, dir.path(), stop2);
        sync.prepare().await.unwrap();

        assert_eq!(restarted.blockchain.count_blocks(), 3);
        assert_eq!(
            restarted.blockchain.get_last_block().hash,
            blocks[2].hash
        );
        // No new blocks to read: the archive offset was persisted.
        sync.sync_iteration().await.unwrap();
        assert_eq!(restarted.blockchain.count_blocks(), 3);

        let meta = MainBlockInfo::deserialize(
            &storage::find_main_block(&restarted.storage).unwrap(),
        )
        .unwrap();
        assert_eq!(meta.block_number, 3);
    }

    #[tokio::test]
    async fn fork_tie_break_prefers_smaller_hash() {
        let dir = tempfile::tempdir().unwrap();
        let state = temp_state(dir.path(), &["block"]);
        let (_stop_handle, stop) = StopFlag::new();
        let sync = file_sync(&state, dir.path(), stop);

        // Two competing tips on the same parent.
        let parent = testing::build_block(GENESIS_BLOCK_HASH, &[]);
        let tip_a = testing::build_block_at(&parent.hash, &[], testing::TEST_TIMESTAMP + 1);
        let tip_b = testing::build_block_at(&parent.hash, &[], testing::TEST_TIMESTAMP + 2);
        let (smaller, larger) = if tip_a.hash < tip_b.hash {
            (&tip_a, &tip_b)
        } else {
            (&tip_b, &tip_a)
        };

        for block in [&parent, larger, smaller] {
            let mut bi = codec::parse_block_dump(&block.dump, 0, false, false, 0, 0).unwrap();
            bi.header.file_pos.file_name = "archive.blk".to_string();
            sync.save_block_to_kv(&bi).unwrap();
        }

        let metadata =
            BlocksMetadata::deserialize(&storage::find_block_metadata(&state.storage).unwrap())
                .unwrap();
        // Both tips share the parent; the lexicographically smaller hash
        // holds the head pointer.
        assert_eq!(metadata.block_hash, smaller.hash);
        assert_eq!(metadata.prev_block_hash, parent.hash);

        // Feeding the larger tip again must not steal the pointer back.
        let mut bi = codec::parse_block_dump(&larger.dump, 0, false, false, 0, 0).unwrap();
        bi.header.file_pos.file_name = "archive.blk".to_string();
        sync.save_block_to_kv(&bi).unwrap();
        let metadata =
            BlocksMetadata::deserialize(&storage::find_block_metadata(&state.storage).unwrap())
                .unwrap();
        assert_eq!(metadata.block_hash, smaller.hash);
    }

    #[tokio::test]
    async fn pinned_modules_must_match() {
        let dir = tempfile::tempdir().unwrap();
        let state = temp_state(dir.path(), &["block"]);
        storage::save_modules(&state.storage, "11111111").unwrap();

        let (_stop_handle, stop) = StopFlag::new();
        let mut sync = file_sync(&state, dir.path(), stop);
        let err = sync.prepare().await.unwrap_err();
        assert!(matches!(err, NodeError::User(_)));
    }

    /// Network-like source replaying a fixed chain: every round starts over
    /// from the resolver's count, the way the peer source re-requests
    /// blocks it has not admitted yet.
    struct ScriptedSource {
        chain: Vec<testing::BuiltBlock>,
        file_name: String,
        next: u64,
        last: u64,
    }

    #[async_trait::async_trait]
    impl BlockSource for ScriptedSource {
        async fn initialize(&mut self) -> NodeResult<()> {
            Ok(())
        }

        async fn do_process(
            &mut self,
            count_blocks: u64,
            _last_block_hash: &str,
        ) -> NodeResult<(bool, u64)> {
            self.next = count_blocks + 1;
            Ok((self.last >= self.next, self.last))
        }

        async fn process(&mut self) -> NodeResult<Option<(BlockInfo, Vec<u8>)>> {
            if self.next > self.last {
                return Ok(None);
            }
            let block = &self.chain[(self.next - 1) as usize];
            self.next += 1;
            let mut bi = codec::parse_block_dump(&block.dump, 0, false, false, 0, 0)?;
            bi.header.file_pos.file_name = self.file_name.clone();
            Ok(Some((bi, block.dump.clone())))
        }

        async fn get_existing_block(
            &self,
            _header: &torrent_node_types::BlockHeader,
        ) -> NodeResult<(BlockInfo, Vec<u8>)> {
            Err(NodeError::NotFound("scripted source".into()))
        }

        fn known_block(&self) -> u64 {
            self.last
        }
    }

    #[tokio::test]
    async fn validate_mode_defers_the_tip() {
        let dir = tempfile::tempdir().unwrap();
        let key = testing::test_node_key();

        // Each block opens with a sign-block tx confirming its parent.
        let block1 = testing::build_block(
            GENESIS_BLOCK_HASH,
            &[testing::TxSpec::transfer(testing::test_address(1), 5, 0, 0)],
        );
        let block2 =
            testing::build_block(&block1.hash, &[testing::TxSpec::sign_block(&key, &block1.hash)]);
        let block3 =
            testing::build_block(&block2.hash, &[testing::TxSpec::sign_block(&key, &block2.hash)]);

        let state = temp_state(dir.path(), &["block"]);
        let (_stop_handle, stop) = StopFlag::new();
        let source = Box::new(ScriptedSource {
            chain: vec![block1.clone(), block2.clone(), block3],
            file_name: dir.path().join("00.blk").display().to_string(),
            next: 0,
            last: 3,
        });
        let mut sync = Sync::new(
            Arc::clone(&state),
            source,
            SyncSettings {
                validate: true,
                save_block_to_files: false,
            },
            stop,
        );
        sync.prepare().await.unwrap();

        // One round admits blocks 1 and 2; the tip stays deferred because
        // no successor has confirmed it yet.
        sync.sync_iteration().await.unwrap();
        assert_eq!(state.blockchain.count_blocks(), 2);
        assert_eq!(state.blockchain.get_last_block().hash, block2.hash);

        // Further rounds with an unchanged head keep deferring the tip.
        sync.sync_iteration().await.unwrap();
        assert_eq!(state.blockchain.count_blocks(), 2);
    }

    #[tokio::test]
    async fn validate_mode_rejects_unconfirmed_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let key = testing::test_node_key();

        let block1 = testing::build_block(
            GENESIS_BLOCK_HASH,
            &[testing::TxSpec::transfer(testing::test_address(1), 5, 0, 0)],
        );
        // Block 2's signature chain confirms a different hash.
        let block2 = testing::build_block(
            &block1.hash,
            &[testing::TxSpec::sign_block(&key, &"ff".repeat(32))],
        );

        let state = temp_state(dir.path(), &["block"]);
        let (_stop_handle, stop) = StopFlag::new();
        let source = Box::new(ScriptedSource {
            chain: vec![block1, block2],
            file_name: dir.path().join("00.blk").display().to_string(),
            next: 0,
            last: 2,
        });
        let mut sync = Sync::new(
            Arc::clone(&state),
            source,
            SyncSettings {
                validate: true,
                save_block_to_files: false,
            },
            stop,
        );
        sync.prepare().await.unwrap();

        let err = sync.sync_iteration().await.unwrap_err();
        assert!(matches!(err, NodeError::Integrity(_)));
        assert_eq!(state.blockchain.count_blocks(), 0);
    }
}
