//! In-memory blockchain resolver: a forward `{hash -> header}` map plus the
//! ordered `[number -> hash]` vector of the canonical chain.
//!
//! Blocks may arrive before their parents, so insertion and numbering are
//! separate steps. Numbering walks the parent chain from a tip until it
//! meets an already-numbered header, then assigns ascending numbers on the
//! way back; a walk that dangles rolls back without a trace. Forks coexist
//! in the map but only one branch ever becomes numbered.

use std::collections::HashMap;
use std::sync::RwLock;

use torrent_node_types::{BlockHeader, GENESIS_BLOCK_HASH};

use crate::error::{NodeError, NodeResult};

struct ChainState {
    blocks: HashMap<String, BlockHeader>,
    hashes: Vec<String>,
}

impl ChainState {
    fn with_genesis() -> Self {
        let mut genesis = BlockHeader::default();
        genesis.hash = GENESIS_BLOCK_HASH.to_string();
        genesis.block_number = Some(0);

        let mut blocks = HashMap::new();
        blocks.insert(genesis.hash.clone(), genesis);
        Self {
            blocks,
            hashes: vec![GENESIS_BLOCK_HASH.to_string()],
        }
    }
}

pub struct BlockChain {
    state: RwLock<ChainState>,
}

impl Default for BlockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockChain {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ChainState::with_genesis()),
        }
    }

    /// Inserts the header if its hash is unseen. Returns whether it was
    /// already present; an existing header is never overwritten.
    pub fn add_without_calc(&self, block: BlockHeader) -> NodeResult<bool> {
        if block.hash.is_empty() {
            return Err(NodeError::Integrity("empty block hash".into()));
        }
        let mut state = self.state.write().expect("resolver lock poisoned");
        let exists = state.blocks.contains_key(&block.hash);
        if !exists {
            state.blocks.insert(block.hash.clone(), block);
        }
        Ok(exists)
    }

    pub fn remove_block(&self, block: &BlockHeader) -> NodeResult<()> {
        if block.hash.is_empty() {
            return Err(NodeError::Integrity("empty block hash".into()));
        }
        let mut state = self.state.write().expect("resolver lock poisoned");
        state.blocks.remove(&block.hash);
        Ok(())
    }

    /// Assigns block numbers along the parent chain ending at `last_hash`.
    ///
    /// Unnumbered headers are collected while walking towards the genesis;
    /// if the walk reaches a numbered header the collected ones receive
    /// ascending numbers and join the canonical vector, and the tip's new
    /// number is returned. If the walk dangles on a missing parent every
    /// tentative assignment is rolled back and 0 is returned.
    pub fn calc_blockchain(&self, last_hash: &str) -> NodeResult<u64> {
        if last_hash.is_empty() {
            return Err(NodeError::Integrity("empty block hash".into()));
        }
        let mut state = self.state.write().expect("resolver lock poisoned");
        if !state.blocks.contains_key(last_hash) {
            return Err(NodeError::Integrity(format!(
                "hash {last_hash} does not append to blockchain"
            )));
        }

        // Tentatively number the walked headers with their distance from the
        // tip; the final numbers are computed once the anchor is known.
        let mut processed: Vec<String> = Vec::new();
        let mut current = last_hash.to_string();
        let mut distance = 0u64;
        let anchor_number = loop {
            let header = state.blocks.get_mut(&current).expect("walked hash exists");
            if let Some(number) = header.block_number {
                break Some(number);
            }
            header.block_number = Some(distance);
            processed.push(current.clone());
            distance += 1;

            let prev_hash = header.prev_hash.clone();
            if prev_hash.is_empty() {
                return Err(NodeError::Integrity("empty parent hash".into()));
            }
            if !state.blocks.contains_key(&prev_hash) {
                break None;
            }
            current = prev_hash;
        };

        match anchor_number {
            Some(anchor) => {
                let tip_number = distance + anchor;
                for hash in processed.iter().rev() {
                    let next_number = state.hashes.len() as u64;
                    let header = state.blocks.get_mut(hash).expect("walked hash exists");
                    let number = tip_number - header.block_number.expect("tentative number");
                    if number != next_number {
                        return Err(NodeError::Integrity(format!(
                            "block {hash} numbered {number}, expected {next_number}"
                        )));
                    }
                    header.block_number = Some(number);
                    state.hashes.push(hash.clone());
                }
                Ok(tip_number)
            }
            None => {
                for hash in &processed {
                    let header = state.blocks.get_mut(hash).expect("walked hash exists");
                    header.block_number = None;
                }
                Ok(0)
            }
        }
    }

    /// Insert plus numbering; a header that fails to number is removed
    /// again.
    pub fn add_block(&self, block: BlockHeader) -> NodeResult<u64> {
        let hash = block.hash.clone();
        let existed = self.add_without_calc(block)?;
        if existed {
            return Err(NodeError::Integrity(format!("block {hash} already exists")));
        }
        match self.calc_blockchain(&hash) {
            Ok(number) => Ok(number),
            Err(err) => {
                let mut state = self.state.write().expect("resolver lock poisoned");
                state.blocks.remove(&hash);
                Err(err)
            }
        }
    }

    pub fn get_block_by_hash(&self, hash: &str) -> Option<BlockHeader> {
        let state = self.state.read().expect("resolver lock poisoned");
        state.blocks.get(hash).cloned()
    }

    pub fn get_block_by_number(&self, number: u64) -> Option<BlockHeader> {
        let state = self.state.read().expect("resolver lock poisoned");
        let hash = state.hashes.get(number as usize)?;
        state.blocks.get(hash).cloned()
    }

    pub fn get_last_block(&self) -> BlockHeader {
        let state = self.state.read().expect("resolver lock poisoned");
        let hash = state.hashes.last().expect("genesis always present");
        state.blocks.get(hash).cloned().expect("numbered hash exists")
    }

    /// Count of numbered blocks, genesis excluded.
    pub fn count_blocks(&self) -> u64 {
        let state = self.state.read().expect("resolver lock poisoned");
        (state.hashes.len() - 1) as u64
    }

    pub fn clear(&self) {
        let mut state = self.state.write().expect("resolver lock poisoned");
        *state = ChainState::with_genesis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(hash: &str, prev: &str) -> BlockHeader {
        BlockHeader {
            hash: hash.to_string(),
            prev_hash: prev.to_string(),
            ..BlockHeader::default()
        }
    }

    #[test]
    fn genesis_is_installed() {
        let chain = BlockChain::new();
        assert_eq!(chain.count_blocks(), 0);
        let genesis = chain.get_block_by_number(0).unwrap();
        assert_eq!(genesis.hash, GENESIS_BLOCK_HASH);
        assert_eq!(chain.get_last_block().hash, GENESIS_BLOCK_HASH);
    }

    #[test]
    fn sequential_numbering() {
        let chain = BlockChain::new();
        assert_eq!(chain.add_block(header("h1", GENESIS_BLOCK_HASH)).unwrap(), 1);
        assert_eq!(chain.add_block(header("h2", "h1")).unwrap(), 2);
        assert_eq!(chain.add_block(header("h3", "h2")).unwrap(), 3);

        assert_eq!(chain.count_blocks(), 3);
        assert_eq!(chain.get_block_by_number(2).unwrap().hash, "h2");
        assert_eq!(chain.get_block_by_hash("h3").unwrap().block_number, Some(3));
    }

    #[test]
    fn out_of_order_arrival_numbers_lazily() {
        let chain = BlockChain::new();
        // Children first: nothing can be numbered yet.
        assert!(!chain.add_without_calc(header("h3", "h2")).unwrap());
        assert!(!chain.add_without_calc(header("h2", "h1")).unwrap());
        assert_eq!(chain.calc_blockchain("h3").unwrap(), 0);
        assert_eq!(chain.count_blocks(), 0);
        assert_eq!(chain.get_block_by_hash("h3").unwrap().block_number, None);

        // The missing link arrives; the whole chain numbers at once.
        assert!(!chain.add_without_calc(header("h1", GENESIS_BLOCK_HASH)).unwrap());
        assert_eq!(chain.calc_blockchain("h3").unwrap(), 3);
        for (number, hash) in [(1, "h1"), (2, "h2"), (3, "h3")] {
            assert_eq!(chain.get_block_by_number(number).unwrap().hash, hash);
        }
    }

    #[test]
    fn fork_keeps_first_numbered_branch() {
        let chain = BlockChain::new();
        chain.add_block(header("h1", GENESIS_BLOCK_HASH)).unwrap();
        chain.add_block(header("h2", "h1")).unwrap();

        assert_eq!(chain.add_block(header("h3a", "h2")).unwrap(), 3);
        // The competing tip is admitted to the map but stays pending.
        assert!(!chain.add_without_calc(header("h3b", "h2")).unwrap());
        assert_eq!(chain.get_block_by_number(3).unwrap().hash, "h3a");
        assert_eq!(chain.get_block_by_hash("h3b").unwrap().block_number, None);
        assert_eq!(chain.count_blocks(), 3);
    }

    #[test]
    fn dangling_block_rolls_back() {
        let chain = BlockChain::new();
        chain.add_block(header("h1", GENESIS_BLOCK_HASH)).unwrap();

        let count_before = chain.count_blocks();
        assert_eq!(chain.add_block(header("x", "unknown-parent")).unwrap(), 0);
        assert_eq!(chain.count_blocks(), count_before);
        // The rolled-back header stays pending in the map.
        assert_eq!(chain.get_block_by_hash("x").unwrap().block_number, None);
    }

    #[test]
    fn duplicate_add_block_is_refused() {
        let chain = BlockChain::new();
        chain.add_block(header("h1", GENESIS_BLOCK_HASH)).unwrap();
        assert!(matches!(
            chain.add_block(header("h1", GENESIS_BLOCK_HASH)),
            Err(NodeError::Integrity(_))
        ));
        assert_eq!(chain.count_blocks(), 1);
    }

    #[test]
    fn clear_reinstalls_genesis() {
        let chain = BlockChain::new();
        chain.add_block(header("h1", GENESIS_BLOCK_HASH)).unwrap();
        chain.clear();
        assert_eq!(chain.count_blocks(), 0);
        assert!(chain.get_block_by_hash("h1").is_none());
        assert!(chain.get_block_by_hash(GENESIS_BLOCK_HASH).is_some());
    }
}
