//! Result cache (spec.md §4.2.2): keyed on (index, query fingerprint,
//! cluster-state version), bounded by TTL and capacity. Only
//! [`super::planner::QueryPlan::cacheable`] requests ever reach this.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use super::executor::SearchOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    index: String,
    fingerprint: String,
    cluster_version: u64,
}

struct Entry {
    outcome: SearchOutcome,
    inserted_at: Instant,
}

pub struct ResultCache {
    entries: DashMap<CacheKey, Entry>,
    ttl: std::time::Duration,
    capacity: usize,
    enabled: bool,
}

/// Deterministic fingerprint of everything that affects a search result:
/// the serialized query tree, filter expression bytes, requested
/// aggregations and the page window, so two syntactically different but
/// semantically identical request bodies still share a cache entry.
pub fn fingerprint(query_json: &[u8], filter_expr: Option<&[u8]>, aggs_json: &[u8], from: usize, size: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query_json);
    hasher.update(filter_expr.unwrap_or_default());
    hasher.update(aggs_json);
    hasher.update(from.to_le_bytes());
    hasher.update(size.to_le_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

impl ResultCache {
    pub fn new(config: &searchdog_config::ResultCache) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: config.ttl(),
            capacity: config.capacity,
            enabled: config.enabled,
        }
    }

    pub fn get(&self, index: &str, fingerprint: &str, cluster_version: u64) -> Option<SearchOutcome> {
        if !self.enabled {
            return None;
        }
        let key = CacheKey { index: index.to_string(), fingerprint: fingerprint.to_string(), cluster_version };
        let entry = self.entries.get(&key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some(entry.outcome.clone())
    }

    pub fn put(&self, index: &str, fingerprint: &str, cluster_version: u64, outcome: SearchOutcome) {
        if !self.enabled {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.evict_one();
        }
        let key = CacheKey { index: index.to_string(), fingerprint: fingerprint.to_string(), cluster_version };
        self.entries.insert(key, Entry { outcome, inserted_at: Instant::now() });
    }

    /// Drops an arbitrary expired-or-oldest entry to make room. `DashMap`
    /// doesn't track insertion order across shards cheaply, so this is a
    /// single-pass oldest-of-sample eviction rather than true LRU.
    fn evict_one(&self) {
        let oldest = self.entries.iter().min_by_key(|e| e.inserted_at).map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    /// Drops every entry stamped with a cluster-state version older than
    /// `current_version`, called after the watch loop advances the cache
    /// (spec.md §4.2.2 key includes cluster-state-version: a stale entry is
    /// never served, but this keeps the map from growing unbounded across
    /// many state transitions).
    pub fn evict_stale(&self, current_version: u64) {
        self.entries.retain(|key, _| key.cluster_version == current_version);
    }
}

pub type SharedResultCache = Arc<ResultCache>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint(b"{}", None, b"[]", 0, 10);
        let b = fingerprint(b"{}", None, b"[]", 0, 10);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_differs_on_page_window() {
        let a = fingerprint(b"{}", None, b"[]", 0, 10);
        let b = fingerprint(b"{}", None, b"[]", 10, 10);
        assert_ne!(a, b);
    }

    #[test]
    fn test_disabled_cache_never_returns_hits() {
        let cfg = searchdog_config::ResultCache { enabled: false, ttl_ms: 5000, capacity: 10 };
        let cache = ResultCache::new(&cfg);
        cache.put(
            "products",
            "fp",
            1,
            SearchOutcome {
                hits: vec![],
                total: 0,
                aggs: vec![],
                partial: false,
                took_ms: 0,
                shards_total: 1,
                shards_successful: 1,
                shards_failed: 0,
            },
        );
        assert!(cache.get("products", "fp", 1).is_none());
    }
}
