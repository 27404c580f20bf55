//! Control tier (spec.md §4.1): cluster-state consensus, the deterministic
//! shard allocator, and the `MasterService` gRPC surface that both clients
//! and peer control nodes reach it through.
//!
//! [`consensus`] and [`command`] are the state machine; [`allocator`] is
//! the pure placement function the leader runs after any change that might
//! leave a shard unassigned; [`state`] and [`convert`] are the in-process
//! entities and their wire projection; [`grpc`] is the peer
//! [`consensus::Transport`]; [`service`] is the public RPC surface.

pub mod allocator;
pub mod command;
pub mod consensus;
pub mod convert;
pub mod grpc;
pub mod service;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Server;

use consensus::ConsensusNode;
use searchdog_config::{Config, Discovery};
use searchdog_proto::master::master_service_server::MasterServiceServer;
use service::MasterServiceImpl;
use state::NodeStatus;

/// Start one control node: bring up consensus timers, the periodic
/// rebalance loop (spec.md §2 "rebalance interval"), and the `MasterService`
/// listener. Runs until the process is asked to shut down.
pub async fn run(config: Arc<Config>, node_id: String) -> anyhow::Result<()> {
    let peers = config.discovery.control_peers.clone();
    let transport = Arc::new(grpc::GrpcTransport::new());
    let node = ConsensusNode::new(node_id, peers, config.consensus.clone(), transport);

    tokio::spawn(node.clone().run_election_timer());
    tokio::spawn(node.clone().run_heartbeat_timer());
    tokio::spawn(run_rebalance_loop(node.clone(), config.allocator.rebalance_interval_ms));
    tokio::spawn(run_liveness_loop(node.clone(), config.discovery.clone()));

    let addr: SocketAddr = format!("{}:{}", config.general.host, config.general.grpc_port).parse()?;
    let service = MasterServiceImpl::new(node);

    let metrics_addr: SocketAddr = format!("{}:{}", config.general.host, config.general.metrics_port).parse()?;
    let metrics_source = Arc::new(crate::metrics::MetricsSource::Control { heartbeats: service.heartbeat_counts() });
    tokio::spawn(crate::metrics::serve(metrics_source, metrics_addr));

    tracing::info!(%addr, "control tier listening");
    Server::builder()
        .add_service(MasterServiceServer::new(service))
        .serve(addr)
        .await?;
    Ok(())
}

/// Periodically re-run the allocator even without an intervening mutation,
/// so a shard left unassigned because no node had capacity at the time
/// gets picked up once capacity frees (spec.md §4.1 "Allocator").
async fn run_rebalance_loop(node: Arc<ConsensusNode>, interval_ms: u64) {
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1_000)));
    loop {
        interval.tick().await;
        if !node.is_leader().await {
            continue;
        }
        let snapshot = node.state_handle().read().await.clone();
        for assignment in allocator::plan(&snapshot) {
            let command = assignment.into_command(state::ShardState::Initializing);
            if let Err(err) = node.propose(command).await {
                tracing::debug!(error = %err, "periodic rebalance pass stopped early");
                break;
            }
        }
    }
}

/// Failure detection (spec.md §4.6 "missed heartbeats before a node is
/// marked failed"): only the leader proposes `MarkNodeFailed`, since
/// proposing is a no-op on a follower anyway and this avoids every replica
/// independently racing to propose the same command.
async fn run_liveness_loop(node: Arc<ConsensusNode>, discovery: Discovery) {
    let check_interval = discovery.heartbeat_interval().max(Duration::from_millis(1_000));
    let stale_after = check_interval * discovery.heartbeat_failure_threshold.max(1);
    let mut interval = tokio::time::interval(check_interval);
    loop {
        interval.tick().await;
        if !node.is_leader().await {
            continue;
        }
        let snapshot = node.state_handle().read().await.clone();
        for n in snapshot.nodes.values() {
            if n.status == NodeStatus::Failed {
                continue;
            }
            if n.last_heartbeat.elapsed() >= stale_after {
                tracing::warn!(node_id = %n.node_id, "node missed heartbeats, marking failed");
                if let Err(err) = node
                    .propose(command::Command::MarkNodeFailed {
                        node_id: n.node_id.clone(),
                    })
                    .await
                {
                    tracing::debug!(error = %err, "failed to propose MarkNodeFailed");
                }
            }
        }
    }
}
