use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-call and per-module resource limits (spec.md §3 "UDF", §4.5.2
/// "Resource limits"). The runtime enforces wall-time via an
/// epoch-interruption deadline and memory/table growth via
/// `wasmtime::ResourceLimiter`. `stack_depth` is declarative only: recursion
/// is actually bounded by the host's engine-wide native wasm stack limit
/// (`wasmtime::Config::max_wasm_stack`, not a per-`ResourceLimiter` hook —
/// wasmtime has none for stack depth), so this field isn't individually
/// enforced per module.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall-time budget for a single call. Default 5s per spec.md §4.5.2.
    #[serde(with = "duration_ms")]
    pub wall_time: Duration,
    /// Peak memory, in 64KiB wasm pages.
    pub memory_pages: u32,
    /// Declared recursion guard; see struct docs — not independently enforced.
    pub stack_depth: u32,
    /// Maximum number of concurrently executing instances of this module.
    pub max_concurrent_instances: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            wall_time: Duration::from_secs(5),
            memory_pages: 256, // 16 MiB
            stack_depth: 1024,
            max_concurrent_instances: 16,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
