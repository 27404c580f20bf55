//! Cluster state entities (spec.md §3 "Entities") and the snapshot type the
//! state machine produces. This is the in-memory, Rust-native shape the
//! control tier actually mutates; `searchdog-proto::common` types are a
//! wire projection of it, converted at the gRPC boundary only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use searchdog_udf_sdk::UdfMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Control,
    Coordination,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Joining,
    Active,
    Failed,
    Leaving,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub role: NodeRole,
    pub host: String,
    pub grpc_port: u16,
    pub status: NodeStatus,
    /// `Instant` doesn't serialize; the control tier keeps this field
    /// process-local and never ships it to a follower, which instead
    /// derives its own `last_heartbeat` from the wall-clock time the
    /// `RegisterNode`/`NodeHeartbeat` command was applied.
    #[serde(skip, default = "Instant::now")]
    pub last_heartbeat: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardRole {
    Primary,
    Replica,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardState {
    Unassigned,
    Initializing,
    Started,
    Relocating,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardInfo {
    pub index_name: String,
    pub shard_id: u32,
    pub role: ShardRole,
    pub assigned_node_id: Option<String>,
    pub state: ShardState,
}

impl ShardInfo {
    pub fn query_eligible(&self) -> bool {
        self.state == ShardState::Started
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingField {
    pub name: String,
    pub field_type: String,
    pub analyzer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub num_shards: u32,
    pub num_replicas: u32,
    pub mappings: Vec<MappingField>,
    pub refresh_interval: Duration,
}

/// Authoritative description of the cluster (spec.md §3 "Cluster State"):
/// nodes, indices, shards and UDFs plus a monotonic `version`, advanced
/// exactly once per applied command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterState {
    pub version: u64,
    pub nodes: BTreeMap<String, NodeInfo>,
    pub indices: BTreeMap<String, IndexInfo>,
    /// Keyed by (index_name, shard_id, role-discriminated node) so a
    /// primary and its replicas coexist under the same (index, shard_id).
    pub shards: Vec<ShardInfo>,
    pub udfs: BTreeMap<(String, String), UdfMetadata>,
}

impl ClusterState {
    pub fn shards_for(&self, index: &str, shard_id: u32) -> Vec<&ShardInfo> {
        self.shards
            .iter()
            .filter(|s| s.index_name == index && s.shard_id == shard_id)
            .collect()
    }

    pub fn primary_for(&self, index: &str, shard_id: u32) -> Option<&ShardInfo> {
        self.shards
            .iter()
            .find(|s| s.index_name == index && s.shard_id == shard_id && s.role == ShardRole::Primary)
    }

    pub fn started_copies(&self, index: &str, shard_id: u32) -> Vec<&ShardInfo> {
        self.shards_for(index, shard_id)
            .into_iter()
            .filter(|s| s.query_eligible())
            .collect()
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeInfo> {
        self.nodes.get(node_id)
    }

    pub fn active_data_nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes
            .values()
            .filter(|n| n.role == NodeRole::Data && n.status == NodeStatus::Active)
    }

    pub fn index(&self, name: &str) -> Option<&IndexInfo> {
        self.indices.get(name)
    }

    pub fn udf(&self, name: &str, version: &str) -> Option<&UdfMetadata> {
        if version == "latest" {
            self.udfs
                .iter()
                .filter(|((n, _), _)| n == name)
                .max_by(|((_, a), _), ((_, b), _)| {
                    semver_key(a).cmp(&semver_key(b))
                })
                .map(|(_, meta)| meta)
        } else {
            self.udfs.get(&(name.to_string(), version.to_string()))
        }
    }
}

fn semver_key(version: &str) -> (u64, u64, u64) {
    semver::Version::parse(version)
        .map(|v| (v.major, v.minor, v.patch))
        .unwrap_or((0, 0, 0))
}

#[cfg(test)]
mod test {
    use super::*;

    fn shard(index: &str, id: u32, role: ShardRole, node: &str, state: ShardState) -> ShardInfo {
        ShardInfo {
            index_name: index.into(),
            shard_id: id,
            role,
            assigned_node_id: Some(node.into()),
            state,
        }
    }

    #[test]
    fn test_started_copies_excludes_unassigned() {
        let mut state = ClusterState::default();
        state.shards.push(shard(
            "products",
            0,
            ShardRole::Primary,
            "data-1",
            ShardState::Started,
        ));
        state.shards.push(shard(
            "products",
            0,
            ShardRole::Replica,
            "data-2",
            ShardState::Initializing,
        ));
        let started = state.started_copies("products", 0);
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].assigned_node_id.as_deref(), Some("data-1"));
    }

    #[test]
    fn test_udf_latest_picks_highest_semver() {
        let mut state = ClusterState::default();
        for v in ["1.0.0", "1.2.0", "1.10.0"] {
            state.udfs.insert(
                ("price_in_range".into(), v.into()),
                UdfMetadata {
                    name: "price_in_range".into(),
                    version: v.into(),
                    language: "wasm".into(),
                    params: vec![],
                    return_type: searchdog_udf_sdk::ParamType::Bool,
                    capabilities: vec![],
                    limits: Default::default(),
                    content_hash: "deadbeef".into(),
                },
            );
        }
        let latest = state.udf("price_in_range", "latest").unwrap();
        assert_eq!(latest.version, "1.10.0");
    }
}
