//! Conversions between the in-process [`super::state`] types and the wire
//! projection in `searchdog-proto::common`. Kept in one place so the gRPC
//! service and the coordination-tier cache share exactly one mapping.

use std::time::{SystemTime, UNIX_EPOCH};

use super::state::{
    ClusterState, IndexInfo, MappingField, NodeInfo, NodeRole, NodeStatus, ShardInfo, ShardRole,
    ShardState,
};
use searchdog_proto::common;
use searchdog_udf_sdk::{ParamSpec, ParamType, UdfMetadata};

impl From<NodeRole> for common::NodeRole {
    fn from(r: NodeRole) -> Self {
        match r {
            NodeRole::Control => common::NodeRole::Control,
            NodeRole::Coordination => common::NodeRole::Coordination,
            NodeRole::Data => common::NodeRole::Data,
        }
    }
}

impl From<common::NodeRole> for NodeRole {
    fn from(r: common::NodeRole) -> Self {
        match r {
            common::NodeRole::Control => NodeRole::Control,
            common::NodeRole::Coordination => NodeRole::Coordination,
            common::NodeRole::Data => NodeRole::Data,
            common::NodeRole::Unspecified => NodeRole::Data,
        }
    }
}

impl From<NodeStatus> for common::NodeStatus {
    fn from(s: NodeStatus) -> Self {
        match s {
            NodeStatus::Joining => common::NodeStatus::Joining,
            NodeStatus::Active => common::NodeStatus::Active,
            NodeStatus::Failed => common::NodeStatus::Failed,
            NodeStatus::Leaving => common::NodeStatus::Leaving,
        }
    }
}

impl From<common::NodeStatus> for NodeStatus {
    fn from(s: common::NodeStatus) -> Self {
        match s {
            common::NodeStatus::Joining => NodeStatus::Joining,
            common::NodeStatus::Active => NodeStatus::Active,
            common::NodeStatus::Failed => NodeStatus::Failed,
            common::NodeStatus::Leaving => NodeStatus::Leaving,
            common::NodeStatus::Unspecified => NodeStatus::Joining,
        }
    }
}

impl From<ShardRole> for common::ShardRole {
    fn from(r: ShardRole) -> Self {
        match r {
            ShardRole::Primary => common::ShardRole::Primary,
            ShardRole::Replica => common::ShardRole::Replica,
        }
    }
}

impl From<common::ShardRole> for ShardRole {
    fn from(r: common::ShardRole) -> Self {
        match r {
            common::ShardRole::Replica => ShardRole::Replica,
            _ => ShardRole::Primary,
        }
    }
}

impl From<ShardState> for common::ShardState {
    fn from(s: ShardState) -> Self {
        match s {
            ShardState::Unassigned => common::ShardState::Unassigned,
            ShardState::Initializing => common::ShardState::Initializing,
            ShardState::Started => common::ShardState::Started,
            ShardState::Relocating => common::ShardState::Relocating,
            ShardState::Failed => common::ShardState::Failed,
        }
    }
}

impl From<common::ShardState> for ShardState {
    fn from(s: common::ShardState) -> Self {
        match s {
            common::ShardState::Initializing => ShardState::Initializing,
            common::ShardState::Started => ShardState::Started,
            common::ShardState::Relocating => ShardState::Relocating,
            common::ShardState::Failed => ShardState::Failed,
            _ => ShardState::Unassigned,
        }
    }
}

fn param_type_code(t: ParamType) -> &'static str {
    match t {
        ParamType::Bool => "bool",
        ParamType::Int64 => "int64",
        ParamType::Float64 => "float64",
        ParamType::String => "string",
    }
}

fn param_type_from_code(s: &str) -> ParamType {
    match s {
        "bool" => ParamType::Bool,
        "int64" => ParamType::Int64,
        "float64" => ParamType::Float64,
        _ => ParamType::String,
    }
}

pub fn node_to_proto(n: &NodeInfo) -> common::NodeInfo {
    common::NodeInfo {
        node_id: n.node_id.clone(),
        role: common::NodeRole::from(n.role) as i32,
        host: n.host.clone(),
        grpc_port: n.grpc_port as u32,
        status: common::NodeStatus::from(n.status) as i32,
        last_heartbeat_unix_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0),
    }
}

pub fn shard_to_proto(s: &ShardInfo) -> common::ShardInfo {
    common::ShardInfo {
        index_name: s.index_name.clone(),
        shard_id: s.shard_id,
        role: common::ShardRole::from(s.role) as i32,
        assigned_node_id: s.assigned_node_id.clone().unwrap_or_default(),
        state: common::ShardState::from(s.state) as i32,
    }
}

pub fn index_to_proto(idx: &IndexInfo) -> common::IndexInfo {
    common::IndexInfo {
        name: idx.name.clone(),
        num_shards: idx.num_shards,
        num_replicas: idx.num_replicas,
        mappings: idx
            .mappings
            .iter()
            .map(|m| common::IndexMappingField {
                name: m.name.clone(),
                field_type: m.field_type.clone(),
                analyzer: m.analyzer.clone().unwrap_or_default(),
            })
            .collect(),
        refresh_interval_ms: idx.refresh_interval.as_millis() as u64,
    }
}

pub fn mapping_from_proto(m: &common::IndexMappingField) -> MappingField {
    MappingField {
        name: m.name.clone(),
        field_type: m.field_type.clone(),
        analyzer: if m.analyzer.is_empty() {
            None
        } else {
            Some(m.analyzer.clone())
        },
    }
}

pub fn udf_to_proto(u: &UdfMetadata) -> common::UdfMetadata {
    common::UdfMetadata {
        name: u.name.clone(),
        version: u.version.clone(),
        language: u.language.clone(),
        params: u
            .params
            .iter()
            .map(|p| common::UdfParamSpec {
                name: p.name.clone(),
                param_type: param_type_code(p.param_type).to_string(),
                optional: p.optional,
                default_json: p.default.as_ref().map(|d| serde_json::to_string(d).unwrap_or_default()),
            })
            .collect(),
        return_type: param_type_code(u.return_type).to_string(),
        capabilities: u.capabilities.iter().map(|c| c.to_string()).collect(),
        wall_time_ms: u.limits.wall_time.as_millis() as u64,
        memory_pages: u.limits.memory_pages,
        max_concurrent_instances: u.limits.max_concurrent_instances,
        content_hash: u.content_hash.clone(),
    }
}

pub fn udf_from_proto(u: &common::UdfMetadata, limits: searchdog_udf_sdk::ResourceLimits) -> UdfMetadata {
    UdfMetadata {
        name: u.name.clone(),
        version: u.version.clone(),
        language: u.language.clone(),
        params: u
            .params
            .iter()
            .map(|p| ParamSpec {
                name: p.name.clone(),
                param_type: param_type_from_code(&p.param_type),
                optional: p.optional,
                default: p
                    .default_json
                    .as_ref()
                    .and_then(|j| serde_json::from_str(j).ok()),
            })
            .collect(),
        return_type: param_type_from_code(&u.return_type),
        capabilities: u
            .capabilities
            .iter()
            .filter_map(|c| c.parse().ok())
            .collect(),
        limits,
        content_hash: u.content_hash.clone(),
    }
}

pub fn node_from_proto(n: &common::NodeInfo) -> NodeInfo {
    NodeInfo {
        node_id: n.node_id.clone(),
        role: common::NodeRole::try_from(n.role).unwrap_or(common::NodeRole::Data).into(),
        host: n.host.clone(),
        grpc_port: n.grpc_port as u16,
        status: common::NodeStatus::try_from(n.status).unwrap_or(common::NodeStatus::Joining).into(),
        last_heartbeat: std::time::Instant::now(),
    }
}

pub fn index_from_proto(idx: &common::IndexInfo) -> IndexInfo {
    IndexInfo {
        name: idx.name.clone(),
        num_shards: idx.num_shards,
        num_replicas: idx.num_replicas,
        mappings: idx.mappings.iter().map(mapping_from_proto).collect(),
        refresh_interval: std::time::Duration::from_millis(idx.refresh_interval_ms),
    }
}

pub fn shard_from_proto(s: &common::ShardInfo) -> ShardInfo {
    ShardInfo {
        index_name: s.index_name.clone(),
        shard_id: s.shard_id,
        role: common::ShardRole::try_from(s.role).unwrap_or(common::ShardRole::Primary).into(),
        assigned_node_id: if s.assigned_node_id.is_empty() {
            None
        } else {
            Some(s.assigned_node_id.clone())
        },
        state: common::ShardState::try_from(s.state).unwrap_or(common::ShardState::Unassigned).into(),
    }
}

/// Builds [`ResourceLimits`](searchdog_udf_sdk::ResourceLimits) from the
/// wire fields a `ClusterStateSnapshot` actually carries; `stack_depth`
/// isn't on the wire so this falls back to the SDK default for it.
pub fn udf_from_snapshot(u: &common::UdfMetadata) -> UdfMetadata {
    let limits = searchdog_udf_sdk::ResourceLimits {
        wall_time: std::time::Duration::from_millis(u.wall_time_ms),
        memory_pages: u.memory_pages,
        max_concurrent_instances: u.max_concurrent_instances,
        ..Default::default()
    };
    udf_from_proto(u, limits)
}

pub fn snapshot_from_proto(snap: &common::ClusterStateSnapshot) -> ClusterState {
    ClusterState {
        version: snap.version,
        nodes: snap
            .nodes
            .iter()
            .map(|n| (n.node_id.clone(), node_from_proto(n)))
            .collect(),
        indices: snap
            .indices
            .iter()
            .map(|i| (i.name.clone(), index_from_proto(i)))
            .collect(),
        shards: snap.shards.iter().map(shard_from_proto).collect(),
        udfs: snap
            .udfs
            .iter()
            .map(|u| ((u.name.clone(), u.version.clone()), udf_from_snapshot(u)))
            .collect(),
    }
}

pub fn state_to_snapshot(state: &ClusterState) -> common::ClusterStateSnapshot {
    common::ClusterStateSnapshot {
        version: state.version,
        nodes: state.nodes.values().map(node_to_proto).collect(),
        indices: state.indices.values().map(index_to_proto).collect(),
        shards: state.shards.iter().map(shard_to_proto).collect(),
        udfs: state.udfs.values().map(udf_to_proto).collect(),
    }
}
