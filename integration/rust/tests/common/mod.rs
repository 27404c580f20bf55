use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use searchdog_config::{Config, NodeRole};

/// A single-control, single-coordination, single-data node cluster running
/// in-process on loopback, torn down when the test process exits. Mirrors
/// the one-process-per-role layout spec.md §2 describes, just collapsed
/// into tokio tasks instead of separate binaries.
pub struct Cluster {
    pub http_addr: String,
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

impl Cluster {
    /// Boots control, coordination and data nodes and waits for the
    /// coordination REST API to answer `_cluster/health`.
    pub async fn start() -> Self {
        let data_dir = tempfile::tempdir().unwrap().keep();

        let control_grpc = free_port();
        let coordination_http = free_port();
        let coordination_metrics = free_port();
        let control_metrics = free_port();
        let data_grpc = free_port();
        let data_metrics = free_port();

        let control_peer = format!("127.0.0.1:{control_grpc}");

        let mut control_cfg = Config::default();
        control_cfg.general.role = NodeRole::Control;
        control_cfg.general.host = "127.0.0.1".into();
        control_cfg.general.grpc_port = control_grpc;
        control_cfg.general.metrics_port = control_metrics;
        control_cfg.general.data_dir = data_dir.join("control");

        let mut coordination_cfg = Config::default();
        coordination_cfg.general.role = NodeRole::Coordination;
        coordination_cfg.general.host = "127.0.0.1".into();
        coordination_cfg.general.http_port = coordination_http;
        coordination_cfg.general.metrics_port = coordination_metrics;
        coordination_cfg.discovery.control_peers = vec![control_peer.clone()];
        coordination_cfg.discovery.discovery_interval_ms = 200;

        let mut data_cfg = Config::default();
        data_cfg.general.role = NodeRole::Data;
        data_cfg.general.host = "127.0.0.1".into();
        data_cfg.general.grpc_port = data_grpc;
        data_cfg.general.metrics_port = data_metrics;
        data_cfg.general.data_dir = data_dir.join("data");
        data_cfg.discovery.control_peers = vec![control_peer];
        data_cfg.discovery.heartbeat_interval_ms = 200;

        tokio::spawn(searchdog::control::run(Arc::new(control_cfg), "control-1".into()));
        tokio::spawn(searchdog::data::run(Arc::new(data_cfg), "data-1".into()));
        tokio::spawn(searchdog::coordination::run(Arc::new(coordination_cfg), "coordination-1".into()));

        let http_addr = format!("http://127.0.0.1:{coordination_http}");
        wait_for_health(&http_addr).await;
        // Give the discovery loop a couple of ticks to pick up the data node
        // before a test tries to create an index.
        tokio::time::sleep(Duration::from_millis(500)).await;

        Cluster { http_addr }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.http_addr, path.trim_start_matches('/'))
    }
}

async fn wait_for_health(http_addr: &str) {
    let client = reqwest::Client::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if tokio::time::Instant::now() > deadline {
            panic!("coordination node never became healthy at {http_addr}");
        }
        let resp = client.get(format!("{http_addr}/_cluster/health")).send().await;
        if matches!(resp, Ok(r) if r.status().is_success()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
