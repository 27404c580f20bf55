//! Per-node shard lifecycle (spec.md §4.3 "A data node owns zero or more
//! shard copies"): a shard is an `(index_name, shard_id)` key pointing at
//! one boxed [`super::engine::IndexEngine`], created on `CreateShard` and
//! torn down on `DeleteShard`. Tracked behind a concurrent map keyed per
//! shard rather than one lock around everything.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::engine::memory::MemoryEngine;
use super::engine::IndexEngine;
use searchdog_stats::ShardCounts;

pub type ShardKey = (String, u32);

pub struct ShardEntry {
    pub engine: Arc<dyn IndexEngine>,
    pub counts: Mutex<ShardCounts>,
}

impl ShardEntry {
    fn new() -> Self {
        Self {
            engine: Arc::new(MemoryEngine::new()),
            counts: Mutex::new(ShardCounts::default()),
        }
    }
}

#[derive(Default)]
pub struct ShardManager {
    shards: DashMap<ShardKey, Arc<ShardEntry>>,
}

impl ShardManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: re-creating an already-owned shard just returns the
    /// existing engine untouched, matching spec.md §5 "idempotent retries"
    /// for operations the coordinator may reissue after a timeout.
    pub fn create(&self, index: &str, shard_id: u32) -> Arc<ShardEntry> {
        self.shards
            .entry((index.to_string(), shard_id))
            .or_insert_with(|| Arc::new(ShardEntry::new()))
            .clone()
    }

    pub fn delete(&self, index: &str, shard_id: u32) -> bool {
        self.shards.remove(&(index.to_string(), shard_id)).is_some()
    }

    pub fn get(&self, index: &str, shard_id: u32) -> Option<Arc<ShardEntry>> {
        self.shards.get(&(index.to_string(), shard_id)).map(|e| e.clone())
    }

    pub fn contains(&self, index: &str, shard_id: u32) -> bool {
        self.shards.contains_key(&(index.to_string(), shard_id))
    }

    pub fn shard_count(&self) -> u32 {
        self.shards.len() as u32
    }

    pub fn total_counts(&self) -> ShardCounts {
        self.shards
            .iter()
            .map(|e| *e.value().counts.lock())
            .fold(ShardCounts::default(), |a, b| a + b)
    }

    /// Per-shard counts for the metrics endpoint (spec.md §4.7), labeled by
    /// `(index, shard_id)` rather than summed across the node.
    pub fn snapshot_counts(&self) -> Vec<(ShardKey, ShardCounts)> {
        self.shards.iter().map(|e| (e.key().clone(), *e.value().counts.lock())).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_create_is_idempotent() {
        let manager = ShardManager::new();
        let a = manager.create("products", 0);
        let b = manager.create("products", 0);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_delete_removes_shard() {
        let manager = ShardManager::new();
        manager.create("products", 0);
        assert!(manager.delete("products", 0));
        assert!(manager.get("products", 0).is_none());
        assert!(!manager.delete("products", 0));
    }
}
