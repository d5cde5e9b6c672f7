use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::AllCaches;
use crate::error::{NodeResult, StopFlag};
use crate::workers::{send_error, Worker, WorkerItem};

const QUEUE_CAPACITY: usize = 1;

/// Keeps the dump and transaction caches warm: each finalized block is
/// inserted under its block-number attribute and the attribute that slid
/// out of the window is evicted wholesale.
pub struct WorkerCache {
    tx: mpsc::Sender<WorkerItem>,
}

impl WorkerCache {
    pub fn spawn(caches: Arc<AllCaches>, stop: StopFlag) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = tokio::spawn(run(caches, rx, stop));
        (Arc::new(Self { tx }), handle)
    }
}

async fn run(caches: Arc<AllCaches>, mut rx: mpsc::Receiver<WorkerItem>, mut stop: StopFlag) {
    loop {
        let item = tokio::select! {
            _ = stop.stopped() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let (bi, dump) = item;
        let Some(block_number) = bi.header.block_number else {
            tracing::error!("cache worker received an unnumbered block");
            continue;
        };
        let attribute = block_number.to_string();

        if caches.max_count_elements_block_cache != 0 {
            caches
                .block_dump_cache
                .add_value(bi.header.hash.clone(), &attribute, Arc::clone(&dump));
            if let Some(evicted) =
                block_number.checked_sub(caches.max_count_elements_block_cache as u64)
            {
                caches.block_dump_cache.remove(&evicted.to_string());
            }
        }

        if caches.max_count_elements_txs_cache != 0 {
            for tx in &bi.txs {
                if tx.is_int_status_node_test() {
                    continue;
                }
                if tx.is_save_to_db {
                    caches
                        .txs_cache
                        .add_value(tx.hash.clone(), &attribute, tx.clone());
                }
            }
            if let Some(evicted) =
                block_number.checked_sub(caches.max_count_elements_txs_cache as u64)
            {
                caches.txs_cache.remove(&evicted.to_string());
            }
        }

        tracing::info!(block = block_number, "block saved to cache");
    }
    tracing::info!("stop cache worker");
}

#[async_trait]
impl Worker for WorkerCache {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn init_block_number(&self) -> Option<u64> {
        None
    }

    async fn enqueue(&self, item: WorkerItem) -> NodeResult<()> {
        self.tx.send(item).await.map_err(|_| send_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use torrent_node_types::{BlockInfo, TransactionInfo};

    fn block(number: u64, hash: &str, tx_hashes: &[&[u8]]) -> WorkerItem {
        let mut bi = BlockInfo::default();
        bi.header.block_number = Some(number);
        bi.header.hash = hash.to_string();
        for tx_hash in tx_hashes {
            bi.txs.push(TransactionInfo {
                hash: tx_hash.to_vec(),
                is_save_to_db: true,
                ..TransactionInfo::default()
            });
        }
        (Arc::new(bi), Arc::new(vec![1, 2, 3]))
    }

    #[tokio::test]
    async fn caches_follow_the_block_window() {
        let caches = Arc::new(AllCaches::new(2, 2));
        let (_handle, stop) = StopFlag::new();
        let (worker, task) = WorkerCache::spawn(Arc::clone(&caches), stop);

        for number in 1..=3u64 {
            let hash = format!("h{number}");
            let tx_hash = format!("t{number}");
            worker
                .enqueue(block(number, &hash, &[tx_hash.as_bytes()]))
                .await
                .unwrap();
        }
        // Give the consumer a chance to drain the queue.
        for _ in 0..100 {
            if caches.block_dump_cache.get_value(&"h3".to_string()).is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        // Window of 2: block 1 was evicted when block 3 arrived.
        assert!(caches.block_dump_cache.get_value(&"h1".to_string()).is_none());
        assert!(caches.block_dump_cache.get_value(&"h2".to_string()).is_some());
        assert!(caches.block_dump_cache.get_value(&"h3".to_string()).is_some());
        assert!(caches.txs_cache.get_value(&b"t1".to_vec()).is_none());
        assert!(caches.txs_cache.get_value(&b"t3".to_vec()).is_some());

        drop(worker);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn disabled_cache_stays_empty() {
        let caches = Arc::new(AllCaches::new(0, 0));
        let (_handle, stop) = StopFlag::new();
        let (worker, task) = WorkerCache::spawn(Arc::clone(&caches), stop);
        worker.enqueue(block(1, "h1", &[b"t1"])).await.unwrap();
        drop(worker);
        task.await.unwrap();
        assert!(caches.block_dump_cache.is_empty());
        assert!(caches.txs_cache.is_empty());
    }
}
