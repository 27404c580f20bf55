//! The typed command log (spec.md §4.1 "State machine"). Each variant is
//! applied deterministically to [`ClusterState`]; replaying the same
//! command sequence on any replica produces byte-identical state, which is
//! the linearizability property §3's "Invariants" require.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::state::{
    ClusterState, IndexInfo, MappingField, NodeInfo, NodeRole, NodeStatus, ShardInfo, ShardRole,
    ShardState,
};
use crate::error::ErrorKind;
use searchdog_udf_sdk::UdfMetadata;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    RegisterNode {
        node_id: String,
        role: NodeRole,
        host: String,
        grpc_port: u16,
    },
    UnregisterNode {
        node_id: String,
    },
    NodeHeartbeat {
        node_id: String,
    },
    MarkNodeFailed {
        node_id: String,
    },
    CreateIndex {
        name: String,
        num_shards: u32,
        num_replicas: u32,
        mappings: Vec<MappingField>,
        refresh_interval_ms: u64,
    },
    DeleteIndex {
        name: String,
    },
    UpdateMapping {
        index: String,
        add_mappings: Vec<MappingField>,
    },
    UpdateIndexSettings {
        index: String,
        num_replicas: Option<u32>,
        refresh_interval_ms: Option<u64>,
    },
    AssignShard {
        index: String,
        shard_id: u32,
        node_id: String,
        role: ShardRole,
        state: ShardState,
    },
    UpdateShardState {
        index: String,
        shard_id: u32,
        node_id: String,
        state: ShardState,
    },
    RegisterUdf {
        metadata: UdfMetadata,
    },
    UnregisterUdf {
        name: String,
        version: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("index \"{0}\" already exists")]
    IndexExists(String),
    #[error("index \"{0}\" not found")]
    IndexNotFound(String),
    #[error("{0}")]
    Invalid(String),
}

impl ApplyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApplyError::IndexExists(_) => ErrorKind::Conflict,
            ApplyError::IndexNotFound(_) => ErrorKind::NotFound,
            ApplyError::Invalid(_) => ErrorKind::Validation,
        }
    }
}

/// Apply `command` to `state` in place, bumping `version` exactly once on
/// success (spec.md §3 "every mutation advances `version` exactly once").
/// A rejected command leaves `state` untouched and does not advance the
/// version — it never should have been committed to the log in the first
/// place, but the leader validates before proposing, so this is a belt and
/// braces check exercised mainly by tests.
pub fn apply(state: &mut ClusterState, command: &Command) -> Result<(), ApplyError> {
    match command {
        Command::RegisterNode {
            node_id,
            role,
            host,
            grpc_port,
        } => {
            state
                .nodes
                .entry(node_id.clone())
                .and_modify(|n| {
                    n.host = host.clone();
                    n.grpc_port = *grpc_port;
                    n.status = NodeStatus::Active;
                    n.last_heartbeat = Instant::now();
                })
                .or_insert_with(|| NodeInfo {
                    node_id: node_id.clone(),
                    role: *role,
                    host: host.clone(),
                    grpc_port: *grpc_port,
                    status: NodeStatus::Active,
                    last_heartbeat: Instant::now(),
                });
        }
        Command::UnregisterNode { node_id } => {
            state.nodes.remove(node_id);
            for shard in state.shards.iter_mut() {
                if shard.assigned_node_id.as_deref() == Some(node_id.as_str()) {
                    shard.state = ShardState::Unassigned;
                    shard.assigned_node_id = None;
                }
            }
        }
        Command::NodeHeartbeat { node_id } => {
            if let Some(node) = state.nodes.get_mut(node_id) {
                node.last_heartbeat = Instant::now();
                if node.status == NodeStatus::Failed {
                    node.status = NodeStatus::Active;
                }
            }
        }
        Command::MarkNodeFailed { node_id } => {
            if let Some(node) = state.nodes.get_mut(node_id) {
                node.status = NodeStatus::Failed;
            }
            for shard in state.shards.iter_mut() {
                if shard.assigned_node_id.as_deref() == Some(node_id.as_str()) {
                    shard.state = ShardState::Failed;
                }
            }
        }
        Command::CreateIndex {
            name,
            num_shards,
            num_replicas,
            mappings,
            refresh_interval_ms,
        } => {
            if state.indices.contains_key(name) {
                return Err(ApplyError::IndexExists(name.clone()));
            }
            if *num_shards == 0 {
                return Err(ApplyError::Invalid("num_shards must be at least 1".into()));
            }
            state.indices.insert(
                name.clone(),
                IndexInfo {
                    name: name.clone(),
                    num_shards: *num_shards,
                    num_replicas: *num_replicas,
                    mappings: mappings.clone(),
                    refresh_interval: Duration::from_millis(*refresh_interval_ms),
                },
            );
            for shard_id in 0..*num_shards {
                state.shards.push(ShardInfo {
                    index_name: name.clone(),
                    shard_id,
                    role: ShardRole::Primary,
                    assigned_node_id: None,
                    state: ShardState::Unassigned,
                });
                for _ in 0..*num_replicas {
                    state.shards.push(ShardInfo {
                        index_name: name.clone(),
                        shard_id,
                        role: ShardRole::Replica,
                        assigned_node_id: None,
                        state: ShardState::Unassigned,
                    });
                }
            }
        }
        Command::DeleteIndex { name } => {
            if state.indices.remove(name).is_none() {
                return Err(ApplyError::IndexNotFound(name.clone()));
            }
            state.shards.retain(|s| &s.index_name != name);
        }
        Command::UpdateMapping {
            index,
            add_mappings,
        } => {
            let idx = state
                .indices
                .get_mut(index)
                .ok_or_else(|| ApplyError::IndexNotFound(index.clone()))?;
            for field in add_mappings {
                if !idx.mappings.iter().any(|m| m.name == field.name) {
                    idx.mappings.push(field.clone());
                }
            }
        }
        Command::UpdateIndexSettings {
            index,
            num_replicas,
            refresh_interval_ms,
        } => {
            let idx = state
                .indices
                .get_mut(index)
                .ok_or_else(|| ApplyError::IndexNotFound(index.clone()))?;
            if let Some(replicas) = num_replicas {
                idx.num_replicas = *replicas;
            }
            if let Some(ms) = refresh_interval_ms {
                idx.refresh_interval = Duration::from_millis(*ms);
            }
        }
        Command::AssignShard {
            index,
            shard_id,
            node_id,
            role,
            state: new_state,
        } => {
            if !state.indices.contains_key(index) {
                return Err(ApplyError::IndexNotFound(index.clone()));
            }
            if let Some(existing) = state.shards.iter_mut().find(|s| {
                &s.index_name == index && s.shard_id == *shard_id && s.role == *role
                    && s.assigned_node_id.is_none()
            }) {
                existing.assigned_node_id = Some(node_id.clone());
                existing.state = *new_state;
            } else {
                state.shards.push(ShardInfo {
                    index_name: index.clone(),
                    shard_id: *shard_id,
                    role: *role,
                    assigned_node_id: Some(node_id.clone()),
                    state: *new_state,
                });
            }
        }
        Command::UpdateShardState {
            index,
            shard_id,
            node_id,
            state: new_state,
        } => {
            if let Some(shard) = state.shards.iter_mut().find(|s| {
                &s.index_name == index
                    && s.shard_id == *shard_id
                    && s.assigned_node_id.as_deref() == Some(node_id.as_str())
            }) {
                shard.state = *new_state;
            }
        }
        Command::RegisterUdf { metadata } => {
            state
                .udfs
                .insert((metadata.name.clone(), metadata.version.clone()), metadata.clone());
        }
        Command::UnregisterUdf { name, version } => {
            state.udfs.remove(&(name.clone(), version.clone()));
        }
    }
    state.version += 1;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_create_index_allocates_shards_unassigned() {
        let mut state = ClusterState::default();
        apply(
            &mut state,
            &Command::CreateIndex {
                name: "products".into(),
                num_shards: 3,
                num_replicas: 1,
                mappings: vec![],
                refresh_interval_ms: 1000,
            },
        )
        .unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(state.shards.len(), 6);
        assert!(state.shards.iter().all(|s| s.state == ShardState::Unassigned));
    }

    #[test]
    fn test_create_index_duplicate_rejected() {
        let mut state = ClusterState::default();
        let cmd = Command::CreateIndex {
            name: "products".into(),
            num_shards: 1,
            num_replicas: 0,
            mappings: vec![],
            refresh_interval_ms: 1000,
        };
        apply(&mut state, &cmd).unwrap();
        let err = apply(&mut state, &cmd).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(state.version, 1);
    }

    #[test]
    fn test_unregister_node_frees_its_shards() {
        let mut state = ClusterState::default();
        apply(
            &mut state,
            &Command::CreateIndex {
                name: "products".into(),
                num_shards: 1,
                num_replicas: 0,
                mappings: vec![],
                refresh_interval_ms: 1000,
            },
        )
        .unwrap();
        apply(
            &mut state,
            &Command::AssignShard {
                index: "products".into(),
                shard_id: 0,
                node_id: "data-1".into(),
                role: ShardRole::Primary,
                state: ShardState::Started,
            },
        )
        .unwrap();
        apply(
            &mut state,
            &Command::UnregisterNode {
                node_id: "data-1".into(),
            },
        )
        .unwrap();
        assert_eq!(state.shards[0].state, ShardState::Unassigned);
        assert!(state.shards[0].assigned_node_id.is_none());
    }
}
