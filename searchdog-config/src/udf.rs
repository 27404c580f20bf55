use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Sandboxed-UDF runtime tuning (spec.md §4.5.2).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Udf {
    /// Default wall-time budget for a call that doesn't override it,
    /// milliseconds. _Default:_ 5,000 (spec.md §4.5.2).
    #[serde(default = "Udf::default_wall_time_ms")]
    pub default_wall_time_ms: u64,

    /// Default peak memory budget, in 64KiB wasm pages.
    #[serde(default = "Udf::default_memory_pages")]
    pub default_memory_pages: u32,

    /// Default maximum concurrent instances per module.
    #[serde(default = "Udf::default_max_concurrent_instances")]
    pub default_max_concurrent_instances: u32,

    /// Directory holding registered module bytecode, keyed by content hash.
    #[serde(default = "Udf::default_module_dir")]
    pub module_dir: PathBuf,

    /// Policy applied when a UDF call errors while filtering
    /// (spec.md §7 "UDF errors ... configurable per query").
    #[serde(default)]
    pub error_policy: ErrorPolicy,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Treat a failing document as a non-match (spec.md §7 default).
    #[default]
    NonMatch,
    /// Abort the shard-local query and surface the error.
    Fail,
}

impl Udf {
    fn default_wall_time_ms() -> u64 {
        5_000
    }
    fn default_memory_pages() -> u32 {
        256
    }
    fn default_max_concurrent_instances() -> u32 {
        16
    }
    fn default_module_dir() -> PathBuf {
        PathBuf::from("./data/udf-modules")
    }

    pub fn default_wall_time(&self) -> Duration {
        Duration::from_millis(self.default_wall_time_ms)
    }
}

impl Default for Udf {
    fn default() -> Self {
        Self {
            default_wall_time_ms: Self::default_wall_time_ms(),
            default_memory_pages: Self::default_memory_pages(),
            default_max_concurrent_instances: Self::default_max_concurrent_instances(),
            module_dir: Self::default_module_dir(),
            error_policy: ErrorPolicy::default(),
        }
    }
}
