//! Thin typed adapter over the embedded ordered KV store (RocksDB).
//!
//! One namespace holds every record, separated by short ASCII prefixes:
//! `b_` headers, `f_` archive-file offsets, `ms_`/`ns_` worker checkpoints,
//! `nsaa_` the node directory, plus the pinned `modules`, `?version_db` and
//! `?block_meta` singletons.

use std::collections::HashMap;
use std::path::Path;

use rocksdb::{BlockBasedOptions, Cache, Options, WriteBatch, DB};

use torrent_node_config::DbConfig;
use torrent_node_types::{FileInfo, RecordError};

use crate::error::{NodeError, NodeResult};

const KEY_BLOCK_METADATA: &str = "?block_meta";
const KEY_VERSION_DB: &str = "?version_db";

const BLOCK_PREFIX: &str = "b_";
const FILE_PREFIX: &str = "f_";
const MAIN_BLOCK_NUMBER_PREFIX: &str = "ms_";
const NODE_STAT_BLOCK_NUMBER_PREFIX: &str = "ns_";
const NODES_STATS_ALL: &str = "nsaa_";
const MODULES_KEY: &str = "modules";

fn storage_err(err: impl ToString) -> NodeError {
    NodeError::Storage(err.to_string())
}

impl From<rocksdb::Error> for NodeError {
    fn from(err: rocksdb::Error) -> Self {
        storage_err(err)
    }
}

pub fn block_key(block_hash: &str) -> String {
    format!("{BLOCK_PREFIX}{block_hash}")
}

pub fn file_key(file_name: &str) -> String {
    format!("{FILE_PREFIX}{file_name}")
}

/// Basename of an archive path; the persisted `f_` keys are stable across
/// moves of the archive directory.
pub fn cropped_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// `[prefix, next)` bounds for a prefix scan.
fn prefix_bounds(prefix: &str) -> (String, String) {
    let mut to = prefix.as_bytes().to_vec();
    let last = to.last_mut().expect("non-empty prefix");
    *last += 1;
    (
        prefix.to_string(),
        String::from_utf8(to).expect("ascii prefix"),
    )
}

pub struct Storage {
    db: DB,
}

impl Storage {
    pub fn open(config: &DbConfig) -> NodeResult<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        options.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        if config.is_checks {
            options.set_paranoid_checks(true);
        }

        let mut block_options = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.lru_cache_mb * 1024 * 1024);
        block_options.set_block_cache(&cache);
        if config.is_bloom_filter {
            block_options.set_bloom_filter(10.0, false);
        }
        options.set_block_based_table_factory(&block_options);

        let db = DB::open(&options, &config.path_to_bd)
            .map_err(|e| storage_err(format!("cannot open database: {e}")))?;
        Ok(Self { db })
    }

    pub fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> NodeResult<()> {
        Ok(self.db.put(key, value)?)
    }

    /// Synchronous write, flushed to the WAL before returning. Used for the
    /// pinned singletons that must survive an immediate crash.
    pub fn put_sync(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> NodeResult<()> {
        let mut options = rocksdb::WriteOptions::default();
        options.set_sync(true);
        Ok(self.db.put_opt(key, value, &options)?)
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> NodeResult<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    /// Like [`Storage::get`] but absent keys read as an empty value, which
    /// the metadata deserializers treat as the default record.
    pub fn get_or_empty(&self, key: impl AsRef<[u8]>) -> NodeResult<Vec<u8>> {
        Ok(self.get(key)?.unwrap_or_default())
    }

    pub fn delete(&self, key: impl AsRef<[u8]>) -> NodeResult<()> {
        Ok(self.db.delete(key)?)
    }

    /// Iterates keys in `[key_from, key_to)`, skipping `skip` entries and
    /// returning at most `limit` (0 = unbounded).
    pub fn find_range(
        &self,
        key_from: &str,
        key_to: &str,
        skip: usize,
        limit: usize,
    ) -> NodeResult<Vec<(String, Vec<u8>)>> {
        let mut result = Vec::new();
        let iter = self.db.iterator(rocksdb::IteratorMode::From(
            key_from.as_bytes(),
            rocksdb::Direction::Forward,
        ));
        let mut index = 0usize;
        for entry in iter {
            let (key, value) = entry?;
            if key.as_ref() >= key_to.as_bytes() {
                break;
            }
            if limit != 0 && index >= skip + limit {
                break;
            }
            if index >= skip {
                let key = String::from_utf8_lossy(&key).into_owned();
                result.push((key, value.into_vec()));
            }
            index += 1;
        }
        Ok(result)
    }

    pub fn apply(&self, batch: Batch) -> NodeResult<()> {
        Ok(self.db.write(batch.batch)?)
    }
}

/// Accumulated writes committed atomically by [`Storage::apply`]. With
/// `shadow` enabled the batch answers reads for its own pending writes.
pub struct Batch {
    batch: WriteBatch,
    shadow: Option<HashMap<Vec<u8>, Vec<u8>>>,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    pub fn new() -> Self {
        Self {
            batch: WriteBatch::default(),
            shadow: None,
        }
    }

    pub fn with_shadow() -> Self {
        Self {
            batch: WriteBatch::default(),
            shadow: Some(HashMap::new()),
        }
    }

    fn add_key(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.batch.put(key.as_ref(), value.as_ref());
        if let Some(shadow) = self.shadow.as_mut() {
            shadow.insert(key.as_ref().to_vec(), value.as_ref().to_vec());
        }
    }

    pub fn remove_key(&mut self, key: impl AsRef<[u8]>) {
        self.batch.delete(key.as_ref());
        if let Some(shadow) = self.shadow.as_mut() {
            shadow.remove(key.as_ref());
        }
    }

    pub fn find_value_in_batch(&self, key: impl AsRef<[u8]>) -> Option<&[u8]> {
        self.shadow
            .as_ref()
            .and_then(|shadow| shadow.get(key.as_ref()))
            .map(Vec::as_slice)
    }

    pub fn add_block_header(&mut self, block_hash: &str, value: &[u8]) {
        self.add_key(block_key(block_hash), value);
    }

    pub fn add_block_metadata(&mut self, value: &[u8]) {
        self.add_key(KEY_BLOCK_METADATA, value);
    }

    pub fn add_file_metadata(&mut self, cropped_name: &str, value: &[u8]) {
        self.add_key(file_key(cropped_name), value);
    }

    pub fn add_main_block(&mut self, value: &[u8]) {
        self.add_key(MAIN_BLOCK_NUMBER_PREFIX, value);
    }

    pub fn add_node_stat_block(&mut self, value: &[u8]) {
        self.add_key(NODE_STAT_BLOCK_NUMBER_PREFIX, value);
    }

    pub fn add_all_nodes(&mut self, value: &[u8]) {
        self.add_key(NODES_STATS_ALL, value);
    }
}

pub fn find_block_metadata(storage: &Storage) -> NodeResult<Vec<u8>> {
    storage.get_or_empty(KEY_BLOCK_METADATA)
}

pub fn find_main_block(storage: &Storage) -> NodeResult<Vec<u8>> {
    storage.get_or_empty(MAIN_BLOCK_NUMBER_PREFIX)
}

pub fn find_node_stat_block(storage: &Storage) -> NodeResult<Vec<u8>> {
    storage.get_or_empty(NODE_STAT_BLOCK_NUMBER_PREFIX)
}

pub fn find_all_nodes(storage: &Storage) -> NodeResult<Vec<u8>> {
    storage.get_or_empty(NODES_STATS_ALL)
}

pub fn find_modules(storage: &Storage) -> NodeResult<Option<String>> {
    Ok(storage
        .get(MODULES_KEY)?
        .map(|raw| String::from_utf8_lossy(&raw).into_owned()))
}

pub fn save_modules(storage: &Storage, modules: &str) -> NodeResult<()> {
    storage.put_sync(MODULES_KEY, modules)
}

pub fn find_version_db(storage: &Storage) -> NodeResult<Option<String>> {
    Ok(storage
        .get(KEY_VERSION_DB)?
        .map(|raw| String::from_utf8_lossy(&raw).into_owned()))
}

pub fn save_version_db(storage: &Storage, version: &str) -> NodeResult<()> {
    storage.put(KEY_VERSION_DB, version)
}

/// Every serialized block header in the store.
pub fn all_block_headers(storage: &Storage) -> NodeResult<Vec<Vec<u8>>> {
    let (from, to) = prefix_bounds(BLOCK_PREFIX);
    Ok(storage
        .find_range(&from, &to, 0, 0)?
        .into_iter()
        .map(|(_, value)| value)
        .collect())
}

/// Archive tail offsets keyed by cropped file name.
pub fn all_files(storage: &Storage) -> NodeResult<HashMap<String, FileInfo>> {
    let (from, to) = prefix_bounds(FILE_PREFIX);
    let mut result = HashMap::new();
    for (_, value) in storage.find_range(&from, &to, 0, 0)? {
        let info = FileInfo::deserialize(&value)
            .map_err(|err: RecordError| NodeError::Storage(err.to_string()))?;
        result.insert(cropped_file_name(&info.file_pos.file_name), info);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use torrent_node_types::{BlocksMetadata, FilePosition};

    fn open_temp() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig {
            path_to_bd: dir.path().join("db").display().to_string(),
            write_buffer_size_mb: 4,
            lru_cache_mb: 1,
            is_bloom_filter: true,
            is_checks: false,
        };
        let storage = Storage::open(&config).unwrap();
        (dir, storage)
    }

    #[test]
    fn batch_is_atomic_and_shadowed() {
        let (_dir, storage) = open_temp();

        let mut batch = Batch::with_shadow();
        batch.add_block_header("abc", b"header-bytes");
        let meta = BlocksMetadata {
            block_hash: "abc".into(),
            prev_block_hash: "def".into(),
            block_number: 1,
        };
        batch.add_block_metadata(&meta.serialize().unwrap());

        assert_eq!(
            batch.find_value_in_batch(block_key("abc")),
            Some(b"header-bytes".as_ref())
        );
        assert!(storage.get(block_key("abc")).unwrap().is_none());

        storage.apply(batch).unwrap();
        assert_eq!(
            storage.get(block_key("abc")).unwrap().unwrap(),
            b"header-bytes"
        );
        let restored =
            BlocksMetadata::deserialize(&find_block_metadata(&storage).unwrap()).unwrap();
        assert_eq!(restored, meta);
    }

    #[test]
    fn prefix_scan_with_pagination() {
        let (_dir, storage) = open_temp();
        for i in 0..5 {
            storage.put(block_key(&format!("hash{i}")), [i]).unwrap();
        }
        storage.put("c_other", b"x").unwrap();

        let all = storage.find_range("b_", "c", 0, 0).unwrap();
        assert_eq!(all.len(), 5);

        let page = storage.find_range("b_", "c", 2, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].0, block_key("hash2"));
        assert_eq!(page[1].0, block_key("hash3"));
    }

    #[test]
    fn file_records_round_trip() {
        let (_dir, storage) = open_temp();
        let info = FileInfo {
            file_pos: FilePosition::new("/data/blocks/07.blk", 4096),
        };
        let mut batch = Batch::new();
        batch.add_file_metadata(&cropped_file_name(&info.file_pos.file_name), &info.serialize());
        storage.apply(batch).unwrap();

        let files = all_files(&storage).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files["07.blk"].file_pos.offset, 4096);
    }

    #[test]
    fn pinned_singletons() {
        let (_dir, storage) = open_temp();
        assert!(find_modules(&storage).unwrap().is_none());
        save_modules(&storage, "00010001").unwrap();
        assert_eq!(find_modules(&storage).unwrap().unwrap(), "00010001");

        save_version_db(&storage, "v3.4").unwrap();
        assert_eq!(find_version_db(&storage).unwrap().unwrap(), "v3.4");
    }
}
