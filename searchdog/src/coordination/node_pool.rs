//! Data-node connection pool and discovery loop (spec.md §4.2.4 "Continuous
//! data-node discovery" / §4.6): lazily-connected, cached `DataService`
//! clients per node id, refreshed from the [`super::cache::ClusterStateCache`]
//! on a fixed interval (default 30s) so newly joined data nodes become
//! routable within one discovery cycle. Mirrors [`crate::control::grpc::
//! GrpcTransport`]'s cached-client-per-peer shape.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tonic::transport::Channel;

use super::cache::ClusterStateCache;
use searchdog_proto::data::data_service_client::DataServiceClient;

#[derive(Default)]
pub struct NodePool {
    clients: DashMap<String, DataServiceClient<Channel>>,
}

impl NodePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing connection, or `None` if the node hasn't been dialed yet
    /// (the discovery loop will pick it up on its next tick).
    pub fn get(&self, node_id: &str) -> Option<DataServiceClient<Channel>> {
        self.clients.get(node_id).map(|c| c.clone())
    }

    async fn connect(&self, node_id: &str, host: &str, grpc_port: u16) {
        match DataServiceClient::connect(format!("http://{host}:{grpc_port}")).await {
            Ok(client) => {
                self.clients.insert(node_id.to_string(), client);
            }
            Err(err) => {
                tracing::debug!(%node_id, %err, "failed to dial data node, will retry next discovery tick");
            }
        }
    }

    fn retain_live(&self, live_ids: &[String]) {
        self.clients.retain(|id, _| live_ids.contains(id));
    }
}

/// Poll the cache for the active data-node set every `interval` and open
/// any missing `DataService` connections (spec.md §4.6: "Newly registered
/// data nodes become routable by coordinators within one discovery cycle").
pub async fn run_discovery_loop(cache: Arc<ClusterStateCache>, pool: Arc<NodePool>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let state = cache.current();
        let live: Vec<String> = state.active_data_nodes().map(|n| n.node_id.clone()).collect();
        for node in state.active_data_nodes() {
            if pool.get(&node.node_id).is_none() {
                pool.connect(&node.node_id, &node.host, node.grpc_port).await;
            }
        }
        pool.retain_live(&live);
    }
}
