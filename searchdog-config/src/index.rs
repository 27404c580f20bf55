use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Defaults applied to `CreateIndex` when a client omits them (spec.md §3
/// "Index").
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct IndexDefaults {
    #[serde(default = "IndexDefaults::default_num_shards")]
    pub num_shards: u32,
    #[serde(default = "IndexDefaults::default_num_replicas")]
    pub num_replicas: u32,
    #[serde(default = "IndexDefaults::default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

impl IndexDefaults {
    fn default_num_shards() -> u32 {
        5
    }
    fn default_num_replicas() -> u32 {
        1
    }
    fn default_refresh_interval_ms() -> u64 {
        1_000
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

impl Default for IndexDefaults {
    fn default() -> Self {
        Self {
            num_shards: Self::default_num_shards(),
            num_replicas: Self::default_num_replicas(),
            refresh_interval_ms: Self::default_refresh_interval_ms(),
        }
    }
}
