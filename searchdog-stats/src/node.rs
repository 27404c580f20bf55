use serde::{Deserialize, Serialize};

/// Control-tier view of one node's liveness (spec.md §3 "Node").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NodeCounts {
    pub heartbeats_received: u64,
    pub heartbeats_missed: u64,
}
