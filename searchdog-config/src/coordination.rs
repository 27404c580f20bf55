use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Coordination-tier tuning (spec.md §4.2, §4.2.2 "result cache", §4.2.3
/// routing retries, §5 admission control).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Coordination {
    /// Upper bound on requests admitted concurrently before `429`/
    /// `ResourceExhausted` (spec.md §5 "Backpressure").
    #[serde(default = "Coordination::default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Upper bound on concurrent per-shard dispatches within one bulk
    /// request (spec.md §4.2.3 "Bulk writes").
    #[serde(default = "Coordination::default_bulk_shard_concurrency")]
    pub bulk_shard_concurrency: usize,

    /// Deadline given to each shard in a fan-out, milliseconds, unless the
    /// client's own deadline is tighter (spec.md §4.2.4, §5).
    #[serde(default = "Coordination::default_shard_deadline_ms")]
    pub shard_deadline_ms: u64,

    #[serde(default)]
    pub result_cache: ResultCache,

    #[serde(default)]
    pub retry: Retry,
}

impl Coordination {
    fn default_max_concurrent_requests() -> usize {
        2_048
    }
    fn default_bulk_shard_concurrency() -> usize {
        32
    }
    fn default_shard_deadline_ms() -> u64 {
        10_000
    }

    pub fn shard_deadline(&self) -> Duration {
        Duration::from_millis(self.shard_deadline_ms)
    }
}

impl Default for Coordination {
    fn default() -> Self {
        Self {
            max_concurrent_requests: Self::default_max_concurrent_requests(),
            bulk_shard_concurrency: Self::default_bulk_shard_concurrency(),
            shard_deadline_ms: Self::default_shard_deadline_ms(),
            result_cache: ResultCache::default(),
            retry: Retry::default(),
        }
    }
}

/// TTL + capacity-bounded cache keyed on (index, query fingerprint,
/// cluster-state version) (spec.md §4.2.2).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ResultCache {
    #[serde(default = "ResultCache::default_enabled")]
    pub enabled: bool,
    #[serde(default = "ResultCache::default_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "ResultCache::default_capacity")]
    pub capacity: usize,
}

impl ResultCache {
    fn default_enabled() -> bool {
        true
    }
    fn default_ttl_ms() -> u64 {
        5_000
    }
    fn default_capacity() -> usize {
        10_000
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            ttl_ms: Self::default_ttl_ms(),
            capacity: Self::default_capacity(),
        }
    }
}

/// Retry budget for a routing mismatch (`WrongShard`, spec.md §4.4).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Retry {
    #[serde(default = "Retry::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "Retry::default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Retry {
    fn default_max_retries() -> u32 {
        3
    }
    fn default_backoff_base_ms() -> u64 {
        20
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            backoff_base_ms: Self::default_backoff_base_ms(),
        }
    }
}
