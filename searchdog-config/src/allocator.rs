use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tuning for the shard allocator (spec.md §4.1 "Allocator").
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Allocator {
    /// How often the leader re-runs the allocator even without a triggering
    /// event, as a safety net against missed triggers.
    #[serde(default = "Allocator::default_rebalance_interval_ms")]
    pub rebalance_interval_ms: u64,
}

impl Allocator {
    fn default_rebalance_interval_ms() -> u64 {
        60_000
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self {
            rebalance_interval_ms: Self::default_rebalance_interval_ms(),
        }
    }
}
