//! Data tier (spec.md §4.3): owns shard copies, runs the sandboxed UDF
//! runtime and expression evaluator next to them, and serves `DataService`.
//!
//! [`engine`] is the `IndexEngine` contract plus the in-memory reference
//! implementation; [`shard`] is the per-node shard map; [`translate`] is the
//! wire/engine boundary; [`grpc`] is the public RPC surface.

pub mod engine;
pub mod grpc;
pub mod shard;
pub mod translate;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tonic::transport::{Channel, Endpoint};

use grpc::DataServiceImpl;
use searchdog_config::Config;
use searchdog_proto::common::NodeRole as WireNodeRole;
use searchdog_proto::data::data_service_server::DataServiceServer;
use searchdog_proto::master::master_service_client::MasterServiceClient;
use searchdog_proto::master::{NodeHeartbeatRequest, RegisterNodeRequest};
use searchdog_stats::UdfStatsTable;
use shard::ShardManager;

use crate::udf::sandbox::UdfRuntime;

/// Start one data node: register with the control tier, keep heartbeating
/// it (spec.md §4.6 "Failure detection"), run the UDF epoch ticker, and
/// serve `DataService`. Runs until the process is asked to shut down.
pub async fn run(config: Arc<Config>, node_id: String) -> anyhow::Result<()> {
    let shards = Arc::new(ShardManager::new());
    let udf_runtime = Arc::new(UdfRuntime::new(UdfStatsTable::new())?);
    tokio::spawn(UdfRuntime::run_epoch_ticker(udf_runtime.engine()));

    if let Some(control_peer) = config.discovery.control_peers.first().cloned() {
        tokio::spawn(run_registration_loop(
            control_peer,
            node_id.clone(),
            config.general.host.clone(),
            config.general.grpc_port,
            config.discovery.heartbeat_interval_ms,
        ));
    } else {
        tracing::warn!("no control_peers configured; data node will not register with the cluster");
    }

    let metrics_addr: SocketAddr = format!("{}:{}", config.general.host, config.general.metrics_port).parse()?;
    let metrics_source = Arc::new(crate::metrics::MetricsSource::Data {
        node_id: node_id.clone(),
        shards: shards.clone(),
        udf: udf_runtime.clone(),
    });
    tokio::spawn(crate::metrics::serve(metrics_source, metrics_addr));

    let addr: SocketAddr = format!("{}:{}", config.general.host, config.general.grpc_port).parse()?;
    let service = DataServiceImpl::new(shards, udf_runtime, node_id);
    tracing::info!(%addr, "data tier listening");
    tonic::transport::Server::builder()
        .add_service(DataServiceServer::new(service))
        .serve(addr)
        .await?;
    Ok(())
}

/// Register once, then heartbeat on [`Discovery::heartbeat_interval_ms`]
/// forever, reconnecting if the control peer drops (spec.md §4.6).
async fn run_registration_loop(control_peer: String, node_id: String, host: String, grpc_port: u16, heartbeat_interval_ms: u64) {
    let endpoint = match Endpoint::from_shared(format!("http://{control_peer}")) {
        Ok(e) => e,
        Err(err) => {
            tracing::error!(%err, "invalid control peer address");
            return;
        }
    };

    loop {
        match connect_and_register(&endpoint, &node_id, &host, grpc_port).await {
            Ok(mut client) => {
                let mut interval = tokio::time::interval(Duration::from_millis(heartbeat_interval_ms.max(1_000)));
                loop {
                    interval.tick().await;
                    let resp = client
                        .node_heartbeat(NodeHeartbeatRequest { node_id: node_id.clone() })
                        .await;
                    match resp {
                        Ok(r) if r.into_inner().known => {}
                        _ => break,
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register with control tier, retrying");
            }
        }
        tokio::time::sleep(Duration::from_millis(heartbeat_interval_ms.max(1_000))).await;
    }
}

async fn connect_and_register(
    endpoint: &Endpoint,
    node_id: &str,
    host: &str,
    grpc_port: u16,
) -> anyhow::Result<MasterServiceClient<Channel>> {
    let mut client = MasterServiceClient::connect(endpoint.clone()).await?;
    client
        .register_node(RegisterNodeRequest {
            node_id: node_id.to_string(),
            role: WireNodeRole::Data as i32,
            host: host.to_string(),
            grpc_port: grpc_port as u32,
        })
        .await?;
    tracing::info!(%node_id, "registered with control tier");
    Ok(client)
}
