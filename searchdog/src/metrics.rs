//! OpenMetrics text endpoint (spec.md §4.7), one per node regardless of
//! role. A raw-`hyper` GET-only server built around a per-node
//! [`MetricsSource`], since control/coordination/data counters each live on
//! their own in-process state rather than a shared global registry.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use dashmap::DashMap;

use searchdog_stats::render::{render_coordination, render_node, render_shard, render_udf};
use searchdog_stats::{CoordinationCounts, NodeCounts};

use crate::data::shard::ShardManager;
use crate::udf::sandbox::UdfRuntime;

pub enum MetricsSource {
    Control { heartbeats: Arc<DashMap<String, NodeCounts>> },
    Coordination { node_id: String, counts: Arc<parking_lot::Mutex<CoordinationCounts>> },
    Data { node_id: String, shards: Arc<ShardManager>, udf: Arc<UdfRuntime> },
}

impl MetricsSource {
    fn render(&self) -> String {
        match self {
            MetricsSource::Control { heartbeats } => heartbeats
                .iter()
                .map(|e| render_node(e.key(), e.value()))
                .collect::<Vec<_>>()
                .join("\n"),
            MetricsSource::Coordination { node_id, counts } => render_coordination(node_id, &counts.lock()),
            MetricsSource::Data { node_id, shards, udf } => {
                let mut sections = Vec::new();
                for ((index, shard_id), counts) in shards.snapshot_counts() {
                    sections.push(render_shard(node_id, &index, shard_id, &counts));
                }
                for ((name, version), counts) in udf.stats().snapshot() {
                    sections.push(render_udf(&name, &version, &counts));
                }
                sections.join("\n")
            }
        }
    }
}

async fn handle(source: Arc<MetricsSource>, _req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let body = source.render();
    let response = Response::builder()
        .header(hyper::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("metrics unavailable"))));
    Ok(response)
}

pub async fn serve(source: Arc<MetricsSource>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "OpenMetrics endpoint listening");
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let source = source.clone();
        tokio::task::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service_fn(move |req| handle(source.clone(), req))).await {
                tracing::debug!(%err, "metrics connection closed");
            }
        });
    }
}
