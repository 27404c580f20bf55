use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The role a node plays (spec.md §2 "System Overview"). A process is
/// exactly one role; multi-role test clusters run one process per role.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Control,
    Coordination,
    Data,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeRole::Control => "control",
            NodeRole::Coordination => "coordination",
            NodeRole::Data => "data",
        };
        write!(f, "{s}")
    }
}

/// General settings relevant to a node's own identity and bind addresses.
///
/// **Note:** `node_id`, `role`, `host` and `data_dir` cannot be changed at
/// runtime; everything else in this file can be hot-reloaded via `SIGHUP`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct General {
    /// Stable for the life of the process. Generated on first start and
    /// persisted to `data_dir/node_id` if not set explicitly.
    #[serde(default)]
    pub node_id: Option<String>,

    pub role: NodeRole,

    /// Interface to bind the gRPC (and, for coordination nodes, REST)
    /// listener to.
    #[serde(default = "General::default_host")]
    pub host: String,

    /// Port for the internal `MasterService`/`DataService` gRPC listener.
    #[serde(default = "General::default_grpc_port")]
    pub grpc_port: u16,

    /// Port for the client-facing REST API (coordination nodes only).
    #[serde(default = "General::default_http_port")]
    pub http_port: u16,

    /// Port for the OpenMetrics text endpoint.
    #[serde(default = "General::default_metrics_port")]
    pub metrics_port: u16,

    /// Number of Tokio worker threads. `0` uses the current-thread runtime.
    #[serde(default = "General::default_workers")]
    pub workers: usize,

    /// Data directory: consensus log + snapshots on a control node, shard
    /// directories on a data node. Unused by coordination nodes.
    #[serde(default = "General::default_data_dir")]
    pub data_dir: std::path::PathBuf,
}

impl General {
    fn default_host() -> String {
        "0.0.0.0".into()
    }

    fn default_grpc_port() -> u16 {
        7400
    }

    fn default_http_port() -> u16 {
        9200
    }

    fn default_metrics_port() -> u16 {
        9600
    }

    fn default_workers() -> usize {
        2
    }

    fn default_data_dir() -> std::path::PathBuf {
        std::path::PathBuf::from("./data")
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            node_id: None,
            role: NodeRole::Coordination,
            host: Self::default_host(),
            grpc_port: Self::default_grpc_port(),
            http_port: Self::default_http_port(),
            metrics_port: Self::default_metrics_port(),
            workers: Self::default_workers(),
            data_dir: Self::default_data_dir(),
        }
    }
}
