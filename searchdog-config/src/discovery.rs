use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Node registration, heartbeat and discovery cadence (spec.md §4.6).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Discovery {
    /// `host:port` of one or more control-tier nodes used to bootstrap.
    #[serde(default)]
    pub control_peers: Vec<String>,

    /// Heartbeat interval, milliseconds. _Default:_ 10,000 (spec.md §4.6).
    #[serde(default = "Discovery::default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Missed heartbeats before a node is marked `failed`. _Default:_ 3.
    #[serde(default = "Discovery::default_heartbeat_failure_threshold")]
    pub heartbeat_failure_threshold: u32,

    /// How often a coordination node polls the control tier for newly
    /// joined data nodes. _Default:_ 30,000ms (spec.md §4.2.4).
    #[serde(default = "Discovery::default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,
}

impl Discovery {
    fn default_heartbeat_interval_ms() -> u64 {
        10_000
    }

    fn default_heartbeat_failure_threshold() -> u32 {
        3
    }

    fn default_discovery_interval_ms() -> u64 {
        30_000
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }
}

impl Default for Discovery {
    fn default() -> Self {
        Self {
            control_peers: Vec::new(),
            heartbeat_interval_ms: Self::default_heartbeat_interval_ms(),
            heartbeat_failure_threshold: Self::default_heartbeat_failure_threshold(),
            discovery_interval_ms: Self::default_discovery_interval_ms(),
        }
    }
}
