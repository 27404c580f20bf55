//! SearchDog: a distributed full-text search and analytics cluster
//! speaking an OpenSearch/Elasticsearch-compatible REST and query-DSL
//! surface, built from three independently-scaled node roles (spec.md §2).
//!
//! [`control`] runs cluster-state consensus and the shard allocator;
//! [`coordination`] is the stateless query-routing layer clients talk to;
//! [`data`] owns shard copies and the sandboxed UDF runtime next to them.
//! [`config`] and [`sighup`] are process-wide plumbing shared by all three.

pub mod config;
pub mod control;
pub mod coordination;
pub mod data;
pub mod error;
pub mod metrics;
pub mod sighup;
pub mod udf;

use std::sync::Arc;

use searchdog_config::{Config, NodeRole};

/// Run one node of whichever role `config.general.role` names, until the
/// process is asked to shut down. Each tier's `run` is otherwise
/// independent; this just dispatches and, on Unix, arms the `SIGHUP`
/// reload handler alongside it.
pub async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    let node_id = config
        .general
        .node_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let reload_task = tokio::spawn(run_sighup_listener());

    let tier: std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>> = match config.general.role {
        NodeRole::Control => Box::pin(control::run(config, node_id)),
        NodeRole::Coordination => Box::pin(coordination::run(config, node_id)),
        NodeRole::Data => Box::pin(data::run(config, node_id)),
    };

    tokio::select! {
        result = tier => result,
        _ = reload_task => Ok(()),
    }
}

/// Reloads the hot-reloadable subset of configuration on `SIGHUP`
/// (SPEC_FULL.md §1.3). A no-op outside Unix, same as `Sighup::listen`.
async fn run_sighup_listener() {
    let Ok(mut sighup) = sighup::Sighup::new() else {
        return;
    };
    loop {
        sighup.listen().await;
        match config::reload_from_disk() {
            Ok(()) => tracing::info!("configuration reloaded"),
            Err(err) => tracing::error!(%err, "failed to reload configuration"),
        }
    }
}
