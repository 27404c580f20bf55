use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Replicated-log consensus tuning for the control tier (spec.md §4.1
/// "Consensus contract").
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Consensus {
    /// Lower bound of the randomized election timeout, milliseconds.
    #[serde(default = "Consensus::default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,

    /// Upper bound of the randomized election timeout, milliseconds.
    #[serde(default = "Consensus::default_election_timeout_max_ms")]
    pub election_timeout_max_ms: u64,

    /// How often the leader sends `AppendEntries` heartbeats when idle.
    #[serde(default = "Consensus::default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Initial backoff after a failed `AppendEntries` RPC.
    #[serde(default = "Consensus::default_append_backoff_base_ms")]
    pub append_backoff_base_ms: u64,

    /// Backoff ceiling.
    #[serde(default = "Consensus::default_append_backoff_max_ms")]
    pub append_backoff_max_ms: u64,

    /// Number of committed log entries between snapshots.
    #[serde(default = "Consensus::default_snapshot_every_entries")]
    pub snapshot_every_entries: u64,
}

impl Consensus {
    fn default_election_timeout_min_ms() -> u64 {
        150
    }
    fn default_election_timeout_max_ms() -> u64 {
        300
    }
    fn default_heartbeat_interval_ms() -> u64 {
        50
    }
    fn default_append_backoff_base_ms() -> u64 {
        10
    }
    fn default_append_backoff_max_ms() -> u64 {
        2_000
    }
    fn default_snapshot_every_entries() -> u64 {
        10_000
    }

    pub fn election_timeout_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.election_timeout_min_ms),
            Duration::from_millis(self.election_timeout_max_ms),
        )
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for Consensus {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: Self::default_election_timeout_min_ms(),
            election_timeout_max_ms: Self::default_election_timeout_max_ms(),
            heartbeat_interval_ms: Self::default_heartbeat_interval_ms(),
            append_backoff_base_ms: Self::default_append_backoff_base_ms(),
            append_backoff_max_ms: Self::default_append_backoff_max_ms(),
            snapshot_every_entries: Self::default_snapshot_every_entries(),
        }
    }
}
