use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use torrent_node_types::{BlockHeader, BlockInfo, FileInfo};

use crate::codec;
use crate::error::{NodeError, NodeResult};
use crate::source::BlockSource;
use crate::storage::{self, Storage};

/// Replays blocks from the local `*.blk` archive, resuming each file at the
/// offset persisted in the KV store.
pub struct FileBlockSource {
    storage: Arc<Storage>,
    folder: PathBuf,
    validate: bool,
    all_files: HashMap<String, FileInfo>,
    file: Option<File>,
    file_name: String,
    curr_pos: u64,
}

impl FileBlockSource {
    pub fn new(storage: Arc<Storage>, folder: impl Into<PathBuf>, validate: bool) -> Self {
        Self {
            storage,
            folder: folder.into(),
            validate,
            all_files: HashMap::new(),
            file: None,
            file_name: String::new(),
            curr_pos: 0,
        }
    }

    /// First archive file (ordered by basename) with unread bytes left.
    fn next_file(&self) -> NodeResult<Option<(String, u64)>> {
        let mut names: Vec<PathBuf> = std::fs::read_dir(&self.folder)
            .map_err(|e| NodeError::Storage(format!("cannot read archive folder: {e}")))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|ext| ext == "blk").unwrap_or(false))
            .collect();
        names.sort();

        for path in names {
            let cropped = storage::cropped_file_name(&path.display().to_string());
            let offset = self
                .all_files
                .get(&cropped)
                .map(|info| info.file_pos.offset)
                .unwrap_or(0);
            let size = std::fs::metadata(&path)
                .map_err(|e| NodeError::Storage(e.to_string()))?
                .len();
            if offset < size {
                return Ok(Some((path.display().to_string(), offset)));
            }
        }
        Ok(None)
    }

    /// Reads one block straight out of the archive position recorded in a
    /// stored header. Also usable without a constructed source.
    pub fn existing_block(header: &BlockHeader, validate: bool) -> NodeResult<(BlockInfo, Vec<u8>)> {
        if header.file_pos.file_name.is_empty() {
            return Err(NodeError::Storage("incorrect file name".into()));
        }
        let mut file = File::open(&header.file_pos.file_name).map_err(|e| {
            NodeError::Storage(format!("cannot open {}: {e}", header.file_pos.file_name))
        })?;
        let Some((mut bi, dump, _)) =
            codec::read_next_block_from_file(&mut file, header.file_pos.offset, validate, false)?
        else {
            return Err(NodeError::Storage("file incorrect".into()));
        };
        let block_number = header
            .block_number
            .ok_or_else(|| NodeError::Integrity("block number not set".into()))?;
        bi.header.file_pos.file_name = header.file_pos.file_name.clone();
        bi.header.block_number = header.block_number;
        for tx in &mut bi.txs {
            tx.file_pos.file_name = header.file_pos.file_name.clone();
            tx.block_number = block_number;
        }
        Ok((bi, dump))
    }
}

#[async_trait]
impl BlockSource for FileBlockSource {
    async fn initialize(&mut self) -> NodeResult<()> {
        self.all_files = storage::all_files(&self.storage)?;
        Ok(())
    }

    async fn do_process(
        &mut self,
        _count_blocks: u64,
        _last_block_hash: &str,
    ) -> NodeResult<(bool, u64)> {
        Ok((true, 0))
    }

    async fn process(&mut self) -> NodeResult<Option<(BlockInfo, Vec<u8>)>> {
        if self.file.is_none() {
            let Some((file_name, offset)) = self.next_file()? else {
                return Ok(None);
            };
            let file = File::open(&file_name)
                .map_err(|e| NodeError::Storage(format!("cannot open {file_name}: {e}")))?;
            tracing::info!(file = %file_name, offset, "open next archive file");
            self.file = Some(file);
            self.file_name = file_name;
            self.curr_pos = offset;
        }

        let file = self.file.as_mut().expect("file opened above");
        match codec::read_next_block_from_file(file, self.curr_pos, self.validate, false)? {
            None => {
                // Exhausted for now; a later round may find more data or the
                // next file.
                self.file = None;
                self.file_name.clear();
                Ok(None)
            }
            Some((mut bi, dump, next_pos)) => {
                bi.header.file_pos.file_name = self.file_name.clone();
                for tx in &mut bi.txs {
                    tx.file_pos.file_name = self.file_name.clone();
                }
                self.curr_pos = next_pos;
                let cropped = storage::cropped_file_name(&self.file_name);
                let entry = self.all_files.entry(cropped).or_default();
                entry.file_pos.file_name = self.file_name.clone();
                entry.file_pos.offset = next_pos;
                Ok(Some((bi, dump)))
            }
        }
    }

    async fn get_existing_block(&self, header: &BlockHeader) -> NodeResult<(BlockInfo, Vec<u8>)> {
        Self::existing_block(header, self.validate)
    }

    fn known_block(&self) -> u64 {
        0
    }
}

/// Full path of an archive file inside the configured folder.
pub fn archive_path(folder: &Path, base_name: &str) -> PathBuf {
    folder.join(base_name)
}
