use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use torrent_node_types::MainBlockInfo;

use crate::error::{NodeResult, StopFlag};
use crate::storage::{self, Batch, Storage};
use crate::workers::{send_error, Worker, WorkerItem};

const QUEUE_CAPACITY: usize = 3;

/// Main indexer: advances the `ms_` checkpoint after each block, enforcing
/// that the chain links onto the previously committed hash.
pub struct WorkerMain {
    tx: mpsc::Sender<WorkerItem>,
    init_block_number: u64,
}

impl WorkerMain {
    pub fn spawn(storage: Arc<Storage>, stop: StopFlag) -> NodeResult<(Arc<Self>, JoinHandle<()>)> {
        let old_metadata = MainBlockInfo::deserialize(&storage::find_main_block(&storage)?)?;
        let count_val = Arc::new(AtomicU64::new(old_metadata.count_val));

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = tokio::spawn(run(storage, rx, stop, count_val));
        Ok((
            Arc::new(Self {
                tx,
                init_block_number: old_metadata.block_number,
            }),
            handle,
        ))
    }
}

async fn run(
    storage: Arc<Storage>,
    mut rx: mpsc::Receiver<WorkerItem>,
    mut stop: StopFlag,
    count_val: Arc<AtomicU64>,
) {
    loop {
        let item = tokio::select! {
            _ = stop.stopped() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let (bi, _dump) = item;
        if let Err(err) = process_block(&storage, &bi, &count_val) {
            if err.is_cancelled() {
                break;
            }
            tracing::error!("main worker: {err}");
        }
    }
    tracing::info!("stop main worker");
}

fn process_block(
    storage: &Storage,
    bi: &torrent_node_types::BlockInfo,
    count_val: &AtomicU64,
) -> NodeResult<()> {
    let block_number = bi
        .header
        .block_number
        .ok_or_else(|| crate::error::NodeError::Integrity("block number not set".into()))?;

    let old_metadata = MainBlockInfo::deserialize(&storage::find_main_block(storage)?)?;
    if block_number <= old_metadata.block_number {
        return Ok(());
    }
    if !old_metadata.block_hash.is_empty() && old_metadata.block_hash != bi.header.prev_hash {
        return Err(crate::error::NodeError::Integrity(format!(
            "incorrect prev hash. Expected {}, received {}",
            old_metadata.block_hash, bi.header.prev_hash
        )));
    }

    let mut batch = Batch::new();
    let checkpoint = MainBlockInfo::new(
        block_number,
        bi.header.hash.clone(),
        count_val.load(Ordering::Relaxed),
    );
    batch.add_main_block(&checkpoint.serialize()?);
    storage.apply(batch)?;

    tracing::info!(
        block = block_number,
        txs = bi.txs.len(),
        "block saved by main worker"
    );
    Ok(())
}

#[async_trait]
impl Worker for WorkerMain {
    fn name(&self) -> &'static str {
        "main"
    }

    fn init_block_number(&self) -> Option<u64> {
        Some(self.init_block_number)
    }

    async fn enqueue(&self, item: WorkerItem) -> NodeResult<()> {
        // Blocks at or below the recovered checkpoint were already indexed.
        if item.0.header.block_number.unwrap_or(0) <= self.init_block_number {
            return Ok(());
        }
        self.tx.send(item).await.map_err(|_| send_error())
    }
}
