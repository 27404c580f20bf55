//! Coordination tier (spec.md §4.2): the stateless query-routing layer
//! clients and the REST surface talk to. Holds no durable state of its own
//! — [`cache`] mirrors the control tier's cluster state, [`node_pool`]
//! keeps `DataService` connections warm, and [`executor`] fans requests
//! out to the data tier and merges the results back.
//!
//! [`dsl`] parses the OpenSearch/Elasticsearch-compatible query DSL;
//! [`planner`] decides push-down and cacheability; [`routing`] resolves
//! index/shard to node; [`merge`] reduces per-shard partials; [`result_cache`]
//! memoizes cacheable searches; [`rest`] is the public HTTP surface.

pub mod cache;
pub mod dsl;
pub mod executor;
pub mod merge;
pub mod node_pool;
pub mod planner;
pub mod rest;
pub mod result_cache;
pub mod routing;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use searchdog_config::Config;

use cache::ClusterStateCache;
use executor::Executor;
use node_pool::NodePool;
use rest::AppState;
use result_cache::ResultCache;

/// Start one coordination node: bring the cluster-state watch and
/// data-node discovery loops up, then serve the REST API. Runs until the
/// process is asked to shut down.
pub async fn run(config: Arc<Config>, node_id: String) -> anyhow::Result<()> {
    let cache = Arc::new(ClusterStateCache::new());
    let pool = Arc::new(NodePool::new());

    if let Some(control_peer) = config.discovery.control_peers.first().cloned() {
        tokio::spawn(cache::run_watch_loop(control_peer, cache.clone(), config.discovery.discovery_interval()));
        tokio::spawn(node_pool::run_discovery_loop(cache.clone(), pool.clone(), config.discovery.discovery_interval()));
    } else {
        tracing::warn!("no control_peers configured; coordination node will serve against an empty cluster state");
    }

    let executor = Arc::new(Executor::new(cache.clone(), pool.clone(), config.coordination.clone()));
    let result_cache = Arc::new(ResultCache::new(&config.coordination.result_cache));

    let state = Arc::new(AppState::new(config.clone(), cache, pool, executor, result_cache));
    let addr: SocketAddr = format!("{}:{}", config.general.host, config.general.http_port).parse()?;

    let metrics_addr: SocketAddr = format!("{}:{}", config.general.host, config.general.metrics_port).parse()?;
    let metrics_source = Arc::new(crate::metrics::MetricsSource::Coordination { node_id, counts: state.counts_handle() });
    tokio::spawn(crate::metrics::serve(metrics_source, metrics_addr));

    tokio::spawn(run_cache_eviction_loop(state.clone()));

    rest::serve(state, addr).await?;
    Ok(())
}

/// Drops result-cache entries stamped with a stale cluster-state version on
/// the same cadence as the watch loop polls, so a long-lived coordinator
/// doesn't accumulate entries for versions nobody will ever ask for again.
async fn run_cache_eviction_loop(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        ticker.tick().await;
        let version = state.cache.current().version;
        state.result_cache.evict_stale(version);
    }
}
