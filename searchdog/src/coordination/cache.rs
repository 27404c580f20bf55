//! Cluster-state cache (spec.md §4.2 "Cluster-state cache"): single-writer
//! watch loop, many-reader snapshot pointer. Reuses [`crate::control::state`]
//! and [`crate::control::convert`] directly rather than re-declaring the
//! entities, per `convert.rs`'s own doc comment: "the gRPC service and the
//! coordination-tier cache share exactly one mapping."

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tonic::transport::{Channel, Endpoint};

use crate::control::convert::snapshot_from_proto;
use crate::control::state::ClusterState;
use searchdog_proto::master::master_service_client::MasterServiceClient;
use searchdog_proto::master::{GetClusterStateRequest, WatchClusterStateRequest};

/// Readers snapshot a pointer to the current state and never partial-read
/// a mutation (spec.md §5 "Shared-resource policy"); the watch loop is the
/// sole writer.
pub struct ClusterStateCache {
    state: ArcSwap<ClusterState>,
}

impl Default for ClusterStateCache {
    fn default() -> Self {
        Self {
            state: ArcSwap::new(Arc::new(ClusterState::default())),
        }
    }
}

impl ClusterStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Arc<ClusterState> {
        self.state.load_full()
    }

    fn store(&self, snapshot: ClusterState) {
        let version = snapshot.version;
        self.state.store(Arc::new(snapshot));
        tracing::debug!(version, "cluster state cache updated");
    }

    /// One-shot refresh via `GetClusterState`, used after a data node
    /// reports `WrongShard` (spec.md §4.4: "the coordinator refreshes its
    /// cache from the control tier before retrying").
    pub async fn refresh_now(&self, client: &mut MasterServiceClient<Channel>) -> anyhow::Result<()> {
        let resp = client
            .get_cluster_state(GetClusterStateRequest { linearizable: false })
            .await?
            .into_inner();
        if let Some(state) = resp.state {
            self.store(snapshot_from_proto(&state));
        }
        Ok(())
    }
}

/// Subscribe to `WatchClusterState` on `control_peer` forever, falling back
/// to polling `GetClusterState` on `poll_interval` if the stream breaks
/// (spec.md §4.2 "falling back to periodic polling if the stream breaks").
pub async fn run_watch_loop(control_peer: String, cache: Arc<ClusterStateCache>, poll_interval: Duration) {
    let endpoint = match Endpoint::from_shared(format!("http://{control_peer}")) {
        Ok(e) => e,
        Err(err) => {
            tracing::error!(%err, "invalid control peer address for cluster-state watch");
            return;
        }
    };

    loop {
        match MasterServiceClient::connect(endpoint.clone()).await {
            Ok(mut client) => {
                let known_version = cache.current().version;
                match client
                    .watch_cluster_state(WatchClusterStateRequest { known_version })
                    .await
                {
                    Ok(resp) => {
                        let mut stream = resp.into_inner();
                        loop {
                            match stream.message().await {
                                Ok(Some(msg)) => {
                                    if let Some(state) = msg.state {
                                        cache.store(snapshot_from_proto(&state));
                                    }
                                }
                                Ok(None) => {
                                    tracing::warn!("cluster-state watch stream closed, falling back to polling");
                                    break;
                                }
                                Err(err) => {
                                    tracing::warn!(%err, "cluster-state watch stream error, falling back to polling");
                                    break;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%err, "failed to open cluster-state watch stream, polling instead");
                        poll_once(&mut client, &cache).await;
                    }
                }
                // Whether the stream just broke or never opened, keep this
                // connection warm for a polling fallback round before
                // trying to re-open the stream.
                poll_once(&mut client, &cache).await;
            }
            Err(err) => {
                tracing::warn!(%err, "failed to connect to control tier for cluster-state watch");
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}

async fn poll_once(client: &mut MasterServiceClient<Channel>, cache: &Arc<ClusterStateCache>) {
    if let Err(err) = cache.refresh_now(client).await {
        tracing::warn!(%err, "cluster-state poll failed");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_cache_is_empty_at_version_zero() {
        let cache = ClusterStateCache::new();
        assert_eq!(cache.current().version, 0);
    }
}
