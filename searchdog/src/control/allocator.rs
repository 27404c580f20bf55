//! The deterministic shard allocator (spec.md §4.1 "Allocator"). Runs on
//! the leader only, after any state change that might leave shards
//! unassigned: node failure, index creation, node add.
//!
//! Rules, applied in order:
//! 1. every primary must be assigned;
//! 2. no two replicas of the same (index, shard_id) on the same node;
//! 3. prefer balancing shard count per node;
//! 4. prefer spreading an index's shards across distinct nodes.

use std::collections::HashMap;

use super::command::Command;
use super::state::{ClusterState, NodeRole, NodeStatus, ShardRole, ShardState};

/// One allocation decision the caller should `propose()` as an
/// `AssignShard` command. The allocator itself never mutates state; it
/// only computes what commands *should* be proposed next, keeping it a
/// pure function of `(state, policy)` as spec.md §4.1 requires.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub index: String,
    pub shard_id: u32,
    pub role: ShardRole,
    pub node_id: String,
}

pub fn plan(state: &ClusterState) -> Vec<Assignment> {
    let live_nodes: Vec<String> = state
        .nodes
        .values()
        .filter(|n| n.role == NodeRole::Data && n.status == NodeStatus::Active)
        .map(|n| n.node_id.clone())
        .collect();
    if live_nodes.is_empty() {
        return Vec::new();
    }

    let mut shard_count: HashMap<String, u32> = live_nodes.iter().map(|n| (n.clone(), 0)).collect();
    for shard in &state.shards {
        if let Some(node) = &shard.assigned_node_id {
            if shard.state != ShardState::Failed && shard.state != ShardState::Unassigned {
                *shard_count.entry(node.clone()).or_insert(0) += 1;
            }
        }
    }

    let mut plans = Vec::new();

    // Unassigned shards are grouped by index so rule 4 (spread an index's
    // shards across distinct nodes) can be applied within the group as we
    // go, using the running `shard_count` as the tie-breaker for rule 3.
    let mut by_index: HashMap<&str, Vec<&super::state::ShardInfo>> = HashMap::new();
    for shard in &state.shards {
        if shard.assigned_node_id.is_none() || shard.state == ShardState::Failed {
            by_index.entry(shard.index_name.as_str()).or_default().push(shard);
        }
    }

    for (_index, mut shards) in by_index {
        // Primaries before replicas: rule 1 ("every primary must be
        // assigned") takes priority when capacity is tight.
        shards.sort_by_key(|s| match s.role {
            ShardRole::Primary => 0,
            ShardRole::Replica => 1,
        });

        let mut used_nodes_for_index: HashMap<u32, Vec<String>> = HashMap::new();

        for shard in shards {
            let already_on: Vec<String> = used_nodes_for_index
                .get(&shard.shard_id)
                .cloned()
                .unwrap_or_default();

            let chosen = live_nodes
                .iter()
                .filter(|n| !already_on.contains(n)) // rule 2
                .min_by_key(|n| shard_count.get(*n).copied().unwrap_or(0)) // rule 3
                .cloned();

            if let Some(node_id) = chosen {
                *shard_count.entry(node_id.clone()).or_insert(0) += 1;
                used_nodes_for_index
                    .entry(shard.shard_id)
                    .or_default()
                    .push(node_id.clone());
                plans.push(Assignment {
                    index: shard.index_name.clone(),
                    shard_id: shard.shard_id,
                    role: shard.role,
                    node_id,
                });
            }
            // If no node qualifies (e.g. fewer live nodes than replicas),
            // the shard stays unassigned until capacity grows; a future
            // allocator run will retry it.
        }
    }

    plans
}

impl Assignment {
    pub fn into_command(self, state: ShardState) -> Command {
        Command::AssignShard {
            index: self.index,
            shard_id: self.shard_id,
            node_id: self.node_id,
            role: self.role,
            state,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::control::command::apply;
    use crate::control::state::{NodeInfo, NodeRole as SNodeRole, NodeStatus as SNodeStatus};
    use std::time::Instant;

    fn active_data_node(state: &mut ClusterState, id: &str) {
        state.nodes.insert(
            id.into(),
            NodeInfo {
                node_id: id.into(),
                role: SNodeRole::Data,
                host: "127.0.0.1".into(),
                grpc_port: 7400,
                status: SNodeStatus::Active,
                last_heartbeat: Instant::now(),
            },
        );
    }

    #[test]
    fn test_primaries_assigned_before_replicas_spread_across_nodes() {
        let mut state = ClusterState::default();
        apply(
            &mut state,
            &Command::CreateIndex {
                name: "products".into(),
                num_shards: 2,
                num_replicas: 1,
                mappings: vec![],
                refresh_interval_ms: 1000,
            },
        )
        .unwrap();
        active_data_node(&mut state, "data-1");
        active_data_node(&mut state, "data-2");

        let plans = plan(&state);
        assert_eq!(plans.len(), 4); // 2 primaries + 2 replicas

        for shard_id in 0..2 {
            let nodes: Vec<&str> = plans
                .iter()
                .filter(|p| p.shard_id == shard_id)
                .map(|p| p.node_id.as_str())
                .collect();
            assert_eq!(nodes.len(), 2);
            assert_ne!(nodes[0], nodes[1], "replica must not share a node with its primary");
        }
    }

    #[test]
    fn test_no_live_nodes_yields_no_assignments() {
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
        assert!(plan(&state).is_empty());
    }

    #[test]
    fn test_balances_shard_count_across_nodes() {
        let mut state = ClusterState::default();
        apply(
            &mut state,
            &Command::CreateIndex {
                name: "a".into(),
                num_shards: 4,
                num_replicas: 0,
                mappings: vec![],
                refresh_interval_ms: 1000,
            },
        )
        .unwrap();
        active_data_node(&mut state, "data-1");
        active_data_node(&mut state, "data-2");

        let plans = plan(&state);
        let on_1 = plans.iter().filter(|p| p.node_id == "data-1").count();
        let on_2 = plans.iter().filter(|p| p.node_id == "data-2").count();
        assert_eq!(on_1, 2);
        assert_eq!(on_2, 2);
    }
}
