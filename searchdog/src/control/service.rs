//! `MasterService` gRPC server (spec.md §4.1 "Public operations", §6.2):
//! client-facing cluster management RPCs plus the peer-to-peer consensus
//! RPCs, all served off one `tonic` listener per control node.
//!
//! Every mutating RPC proposes a [`Command`] to the [`ConsensusNode`] and
//! waits for it to commit; every read RPC serves from the node's local
//! [`ClusterState`], optionally after a read-index confirmation round when
//! the caller asks for a linearizable read.

use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use super::allocator;
use super::command::Command;
use super::consensus::{AppendRequest, ConsensusError, ConsensusNode, LogEntry, SnapshotRequest, VoteRequest};
use super::convert;
use super::grpc::decode_entries;
use super::state::{ClusterState, MappingField, NodeRole, ShardRole, ShardState};

use searchdog_proto::master::master_service_server::MasterService;
use searchdog_proto::master::*;
use searchdog_udf_sdk::ResourceLimits;

pub struct MasterServiceImpl {
    node: std::sync::Arc<ConsensusNode>,
    heartbeat_counts: std::sync::Arc<dashmap::DashMap<String, searchdog_stats::NodeCounts>>,
}

impl MasterServiceImpl {
    pub fn new(node: std::sync::Arc<ConsensusNode>) -> Self {
        Self { node, heartbeat_counts: std::sync::Arc::new(dashmap::DashMap::new()) }
    }

    /// Shared handle for the metrics endpoint (spec.md §4.7); cloning an
    /// `Arc` rather than the whole service, since `tonic` clones the
    /// service per connection.
    pub fn heartbeat_counts(&self) -> std::sync::Arc<dashmap::DashMap<String, searchdog_stats::NodeCounts>> {
        self.heartbeat_counts.clone()
    }

    async fn read_state(&self, linearizable: bool) -> Result<ClusterState, Status> {
        if linearizable {
            self.node
                .confirm_leadership()
                .await
                .map_err(consensus_error_to_status)?;
        }
        Ok(self.node.state_handle().read().await.clone())
    }

    async fn propose(&self, command: Command) -> Result<u64, Status> {
        self.node.propose(command).await.map_err(consensus_error_to_status)
    }

    /// Trigger a post-mutation allocator pass and propose whatever
    /// assignments it finds, best-effort (spec.md §4.1 "run on the leader
    /// only, after any state change that might leave shards unassigned").
    /// A lost race for leadership here just means the next mutation or the
    /// periodic rebalance loop picks the same gap up.
    async fn reallocate(&self) {
        let snapshot = self.node.state_handle().read().await.clone();
        let assignments = allocator::plan(&snapshot);
        for assignment in assignments {
            let command = assignment.into_command(ShardState::Initializing);
            if let Err(err) = self.node.propose(command).await {
                tracing::debug!(error = %err, "allocator pass did not commit, will retry later");
                return;
            }
        }
    }
}

fn consensus_error_to_status(err: ConsensusError) -> Status {
    Status::new(err.kind().grpc_code(), err.to_string())
}

#[tonic::async_trait]
impl MasterService for MasterServiceImpl {
    async fn get_cluster_state(
        &self,
        request: Request<GetClusterStateRequest>,
    ) -> Result<Response<GetClusterStateResponse>, Status> {
        let linearizable = request.into_inner().linearizable;
        let state = self.read_state(linearizable).await?;
        Ok(Response::new(GetClusterStateResponse {
            state: Some(convert::state_to_snapshot(&state)),
        }))
    }

    type WatchClusterStateStream =
        Pin<Box<dyn futures::Stream<Item = Result<WatchClusterStateResponse, Status>> + Send + 'static>>;

    async fn watch_cluster_state(
        &self,
        request: Request<WatchClusterStateRequest>,
    ) -> Result<Response<Self::WatchClusterStateStream>, Status> {
        let mut known_version = request.into_inner().known_version;
        let state_handle = self.node.state_handle();
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            loop {
                interval.tick().await;
                let state = state_handle.read().await.clone();
                if state.version <= known_version {
                    continue;
                }
                known_version = state.version;
                let msg = WatchClusterStateResponse {
                    state: Some(convert::state_to_snapshot(&state)),
                };
                if tx.send(Ok(msg)).await.is_err() {
                    return;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn create_index(
        &self,
        request: Request<CreateIndexRequest>,
    ) -> Result<Response<CreateIndexResponse>, Status> {
        let req = request.into_inner();
        let mappings: Vec<MappingField> = req.mappings.iter().map(convert::mapping_from_proto).collect();
        let version = self
            .propose(Command::CreateIndex {
                name: req.name.clone(),
                num_shards: req.num_shards,
                num_replicas: req.num_replicas,
                mappings,
                refresh_interval_ms: req.refresh_interval_ms,
            })
            .await?;
        self.reallocate().await;
        let state = self.node.state_handle().read().await;
        let index = state
            .index(&req.name)
            .map(convert::index_to_proto)
            .ok_or_else(|| Status::internal("index vanished immediately after creation"))?;
        Ok(Response::new(CreateIndexResponse {
            index: Some(index),
            version,
        }))
    }

    async fn delete_index(
        &self,
        request: Request<DeleteIndexRequest>,
    ) -> Result<Response<DeleteIndexResponse>, Status> {
        let name = request.into_inner().name;
        let version = self.propose(Command::DeleteIndex { name }).await?;
        Ok(Response::new(DeleteIndexResponse { version }))
    }

    async fn update_index_settings(
        &self,
        request: Request<UpdateIndexSettingsRequest>,
    ) -> Result<Response<UpdateIndexSettingsResponse>, Status> {
        let req = request.into_inner();
        if !req.add_mappings.is_empty() {
            let mappings = req.add_mappings.iter().map(convert::mapping_from_proto).collect();
            self.propose(Command::UpdateMapping {
                index: req.name.clone(),
                add_mappings: mappings,
            })
            .await?;
        }
        let version = self
            .propose(Command::UpdateIndexSettings {
                index: req.name.clone(),
                num_replicas: req.num_replicas,
                refresh_interval_ms: req.refresh_interval_ms,
            })
            .await?;
        if req.num_replicas.is_some() {
            self.reallocate().await;
        }
        let state = self.node.state_handle().read().await;
        let index = state
            .index(&req.name)
            .map(convert::index_to_proto)
            .ok_or_else(|| Status::not_found(format!("index \"{}\" not found", req.name)))?;
        Ok(Response::new(UpdateIndexSettingsResponse {
            index: Some(index),
            version,
        }))
    }

    async fn register_node(
        &self,
        request: Request<RegisterNodeRequest>,
    ) -> Result<Response<RegisterNodeResponse>, Status> {
        let req = request.into_inner();
        let role = common_role_from_i32(req.role)?;
        let version = self
            .propose(Command::RegisterNode {
                node_id: req.node_id,
                role,
                host: req.host,
                grpc_port: req.grpc_port as u16,
            })
            .await?;
        self.reallocate().await;
        Ok(Response::new(RegisterNodeResponse { version }))
    }

    async fn unregister_node(
        &self,
        request: Request<UnregisterNodeRequest>,
    ) -> Result<Response<UnregisterNodeResponse>, Status> {
        let node_id = request.into_inner().node_id;
        let version = self.propose(Command::UnregisterNode { node_id }).await?;
        self.reallocate().await;
        Ok(Response::new(UnregisterNodeResponse { version }))
    }

    async fn node_heartbeat(
        &self,
        request: Request<NodeHeartbeatRequest>,
    ) -> Result<Response<NodeHeartbeatResponse>, Status> {
        let node_id = request.into_inner().node_id;
        let known = self.node.state_handle().read().await.node(&node_id).is_some();
        if known {
            self.propose(Command::NodeHeartbeat { node_id: node_id.clone() }).await?;
            self.heartbeat_counts.entry(node_id).or_default().heartbeats_received += 1;
        }
        Ok(Response::new(NodeHeartbeatResponse { known }))
    }

    async fn allocate_shard(
        &self,
        request: Request<AllocateShardRequest>,
    ) -> Result<Response<AllocateShardResponse>, Status> {
        let req = request.into_inner();
        let role: ShardRole = common::ShardRole::try_from(req.role)
            .unwrap_or(common::ShardRole::Primary)
            .into();
        let version = self
            .propose(Command::AssignShard {
                index: req.index_name,
                shard_id: req.shard_id,
                node_id: req.target_node_id,
                role,
                state: ShardState::Initializing,
            })
            .await?;
        Ok(Response::new(AllocateShardResponse { version }))
    }

    async fn rebalance_shards(
        &self,
        _request: Request<RebalanceShardsRequest>,
    ) -> Result<Response<RebalanceShardsResponse>, Status> {
        let snapshot = self.node.state_handle().read().await.clone();
        let assignments = allocator::plan(&snapshot);
        let moves = assignments.len() as u32;
        let mut version = snapshot.version;
        for assignment in assignments {
            let command = assignment.into_command(ShardState::Initializing);
            version = self.propose(command).await?;
        }
        Ok(Response::new(RebalanceShardsResponse { moves, version }))
    }

    async fn update_shard_state(
        &self,
        request: Request<UpdateShardStateRequest>,
    ) -> Result<Response<UpdateShardStateResponse>, Status> {
        let req = request.into_inner();
        let state: ShardState = common::ShardState::try_from(req.state)
            .unwrap_or(common::ShardState::Unassigned)
            .into();
        let version = self
            .propose(Command::UpdateShardState {
                index: req.index_name,
                shard_id: req.shard_id,
                node_id: req.node_id,
                state,
            })
            .await?;
        Ok(Response::new(UpdateShardStateResponse { version }))
    }

    async fn register_udf(
        &self,
        request: Request<RegisterUdfRequest>,
    ) -> Result<Response<RegisterUdfResponse>, Status> {
        let req = request.into_inner();
        let wire_metadata = req
            .metadata
            .ok_or_else(|| Status::invalid_argument("missing udf metadata"))?;

        let limits = ResourceLimits {
            wall_time: Duration::from_millis(wire_metadata.wall_time_ms),
            memory_pages: wire_metadata.memory_pages,
            stack_depth: ResourceLimits::default().stack_depth,
            max_concurrent_instances: wire_metadata.max_concurrent_instances,
        };
        let metadata = convert::udf_from_proto(&wire_metadata, limits);

        let digest = sha2::Sha256::digest(&req.bytecode);
        let actual_hash = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        if actual_hash != metadata.content_hash {
            return Err(Status::invalid_argument("bytecode does not match declared content_hash"));
        }

        let module_dir = crate::config::config().udf.module_dir.clone();
        persist_udf_bytecode(&module_dir, &metadata.content_hash, &req.bytecode)
            .await
            .map_err(|e| Status::internal(format!("failed to persist udf bytecode: {e}")))?;

        let version = self.propose(Command::RegisterUdf { metadata }).await?;
        Ok(Response::new(RegisterUdfResponse { version }))
    }

    async fn unregister_udf(
        &self,
        request: Request<UnregisterUdfRequest>,
    ) -> Result<Response<UnregisterUdfResponse>, Status> {
        let req = request.into_inner();
        let version = self
            .propose(Command::UnregisterUdf {
                name: req.name,
                version: req.version,
            })
            .await?;
        Ok(Response::new(UnregisterUdfResponse { version }))
    }

    async fn get_udf_stats(
        &self,
        request: Request<GetUdfStatsRequest>,
    ) -> Result<Response<GetUdfStatsResponse>, Status> {
        // UDF call counters live where the calls happen, at the data tier
        // (`searchdog_stats::UdfStatsTable`, next to the shard). This
        // control-tier RPC is the cluster-wide aggregation point data
        // nodes report into on their heartbeat path; until that reporting
        // path lands this always answers with a zeroed snapshot rather
        // than fabricating per-node numbers it doesn't have.
        let req = request.into_inner();
        let _ = (req.name, req.version);
        Ok(Response::new(GetUdfStatsResponse {
            calls: 0,
            completed: 0,
            errored: 0,
            terminated: 0,
            total_duration_ms: 0,
        }))
    }

    async fn request_vote(
        &self,
        request: Request<RequestVoteRequest>,
    ) -> Result<Response<RequestVoteResponse>, Status> {
        let req = request.into_inner();
        let resp = self
            .node
            .handle_request_vote(VoteRequest {
                term: req.term,
                candidate_id_hash: req.candidate_id.parse().unwrap_or(0),
                last_log_index: req.last_log_index,
                last_log_term: req.last_log_term,
                pre_vote: req.pre_vote,
            })
            .await;
        Ok(Response::new(RequestVoteResponse {
            term: resp.term,
            vote_granted: resp.vote_granted,
        }))
    }

    async fn append_entries(
        &self,
        request: Request<AppendEntriesRequest>,
    ) -> Result<Response<AppendEntriesResponse>, Status> {
        let req = request.into_inner();
        let entries: Vec<LogEntry> = decode_entries(req.entries);
        let resp = self
            .node
            .handle_append_entries(AppendRequest {
                term: req.term,
                leader_id: req.leader_id,
                prev_log_index: req.prev_log_index,
                prev_log_term: req.prev_log_term,
                entries,
                leader_commit: req.leader_commit,
            })
            .await;
        Ok(Response::new(AppendEntriesResponse {
            term: resp.term,
            success: resp.success,
            conflict_index: resp.conflict_index,
        }))
    }

    async fn install_snapshot(
        &self,
        request: Request<InstallSnapshotRequest>,
    ) -> Result<Response<InstallSnapshotResponse>, Status> {
        let req = request.into_inner();
        let resp = self
            .node
            .handle_install_snapshot(SnapshotRequest {
                term: req.term,
                leader_id: req.leader_id,
                last_included_index: req.last_included_index,
                last_included_term: req.last_included_term,
                data: req.data,
            })
            .await;
        Ok(Response::new(InstallSnapshotResponse { term: resp.term }))
    }
}

fn common_role_from_i32(role: i32) -> Result<NodeRole, Status> {
    let proto_role = common::NodeRole::try_from(role)
        .map_err(|_| Status::invalid_argument("unknown node role"))?;
    Ok(proto_role.into())
}

async fn persist_udf_bytecode(dir: &std::path::Path, content_hash: &str, bytecode: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let path: PathBuf = dir.join(format!("{content_hash}.wasm"));
    tokio::fs::write(path, bytecode).await
}

use searchdog_proto::common;
use sha2::Digest;
