//! Bounded in-memory caches, indexed twice: by key for lookups and by an
//! attribute (the block number as a string) for eviction. Dropping an
//! attribute removes every entry inserted under it, so the cache holds a
//! sliding window of the last N blocks.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use torrent_node_types::TransactionInfo;

struct CacheState<K, V> {
    map: HashMap<K, V>,
    attributes: HashMap<String, Vec<K>>,
}

pub struct AttributeCache<K, V> {
    state: RwLock<CacheState<K, V>>,
}

impl<K, V> Default for AttributeCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> AttributeCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState {
                map: HashMap::new(),
                attributes: HashMap::new(),
            }),
        }
    }

    pub fn add_value(&self, key: K, attribute: &str, value: V) {
        let mut state = self.state.write().expect("cache lock poisoned");
        state
            .attributes
            .entry(attribute.to_string())
            .or_default()
            .push(key.clone());
        // First insert wins; a re-inserted key keeps its original value.
        state.map.entry(key).or_insert(value);
    }

    pub fn get_value(&self, key: &K) -> Option<V> {
        let state = self.state.read().expect("cache lock poisoned");
        state.map.get(key).cloned()
    }

    pub fn remove(&self, attribute: &str) {
        let mut state = self.state.write().expect("cache lock poisoned");
        let Some(keys) = state.attributes.remove(attribute) else {
            return;
        };
        for key in keys {
            state.map.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        let state = self.state.read().expect("cache lock poisoned");
        state.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The caches the warmer worker maintains and the query surface reads.
pub struct AllCaches {
    pub max_count_elements_block_cache: usize,
    pub max_count_elements_txs_cache: usize,
    /// Block hash (hex) -> shared dump bytes.
    pub block_dump_cache: AttributeCache<String, Arc<Vec<u8>>>,
    /// Transaction hash -> parsed transaction.
    pub txs_cache: AttributeCache<Vec<u8>, TransactionInfo>,
}

impl AllCaches {
    pub fn new(max_blocks: usize, max_txs_blocks: usize) -> Self {
        Self {
            max_count_elements_block_cache: max_blocks,
            max_count_elements_txs_cache: max_txs_blocks,
            block_dump_cache: AttributeCache::new(),
            txs_cache: AttributeCache::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_by_attribute_drops_whole_block() {
        let cache: AttributeCache<String, u32> = AttributeCache::new();
        cache.add_value("a".into(), "10", 1);
        cache.add_value("b".into(), "10", 2);
        cache.add_value("c".into(), "11", 3);

        cache.remove("10");
        assert_eq!(cache.get_value(&"a".to_string()), None);
        assert_eq!(cache.get_value(&"b".to_string()), None);
        assert_eq!(cache.get_value(&"c".to_string()), Some(3));
        assert_eq!(cache.len(), 1);

        // Removing an unknown attribute is a no-op.
        cache.remove("99");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn first_insert_wins() {
        let cache: AttributeCache<String, u32> = AttributeCache::new();
        cache.add_value("a".into(), "1", 1);
        cache.add_value("a".into(), "2", 2);
        assert_eq!(cache.get_value(&"a".to_string()), Some(1));
    }
}
