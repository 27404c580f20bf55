use std::fmt;

use crate::{CoordinationCounts, NodeCounts, ShardCounts, UdfCounts};

/// One OpenMetrics text-format line, rendered by joining per-subsystem
/// `Display` impls rather than a templating engine.
pub struct Metric<'a> {
    pub name: &'a str,
    pub labels: Vec<(&'a str, String)>,
    pub value: f64,
}

impl fmt::Display for Metric<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.labels.is_empty() {
            write!(f, "{{")?;
            for (i, (k, v)) in self.labels.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{k}=\"{v}\"")?;
            }
            write!(f, "}}")?;
        }
        write!(f, " {}", self.value)
    }
}

pub fn render_coordination(node_id: &str, counts: &CoordinationCounts) -> String {
    let labels = || vec![("node_id", node_id.to_string())];
    [
        Metric { name: "searchdog_requests_total", labels: labels(), value: counts.requests as f64 },
        Metric { name: "searchdog_requests_rejected_total", labels: labels(), value: counts.requests_rejected as f64 },
        Metric { name: "searchdog_searches_total", labels: labels(), value: counts.searches as f64 },
        Metric { name: "searchdog_bulk_requests_total", labels: labels(), value: counts.bulk_requests as f64 },
        Metric { name: "searchdog_partial_responses_total", labels: labels(), value: counts.partial_responses as f64 },
        Metric { name: "searchdog_failed_responses_total", labels: labels(), value: counts.failed_responses as f64 },
        Metric { name: "searchdog_cache_hits_total", labels: labels(), value: counts.cache_hits as f64 },
        Metric { name: "searchdog_cache_misses_total", labels: labels(), value: counts.cache_misses as f64 },
        Metric { name: "searchdog_wrong_shard_retries_total", labels: labels(), value: counts.wrong_shard_retries as f64 },
    ]
    .iter()
    .map(|m| m.to_string())
    .collect::<Vec<_>>()
    .join("\n")
}

pub fn render_shard(node_id: &str, index: &str, shard_id: u32, counts: &ShardCounts) -> String {
    let labels = || {
        vec![
            ("node_id", node_id.to_string()),
            ("index", index.to_string()),
            ("shard_id", shard_id.to_string()),
        ]
    };
    [
        Metric { name: "searchdog_shard_docs_indexed_total", labels: labels(), value: counts.docs_indexed as f64 },
        Metric { name: "searchdog_shard_docs_deleted_total", labels: labels(), value: counts.docs_deleted as f64 },
        Metric { name: "searchdog_shard_searches_total", labels: labels(), value: counts.searches as f64 },
        Metric { name: "searchdog_shard_udf_filter_errors_total", labels: labels(), value: counts.udf_filter_errors as f64 },
    ]
    .iter()
    .map(|m| m.to_string())
    .collect::<Vec<_>>()
    .join("\n")
}

pub fn render_udf(name: &str, version: &str, counts: &UdfCounts) -> String {
    let labels = || vec![("name", name.to_string()), ("version", version.to_string())];
    [
        Metric { name: "searchdog_udf_calls_total", labels: labels(), value: counts.calls as f64 },
        Metric { name: "searchdog_udf_completed_total", labels: labels(), value: counts.completed as f64 },
        Metric { name: "searchdog_udf_errored_total", labels: labels(), value: counts.errored as f64 },
        Metric { name: "searchdog_udf_terminated_total", labels: labels(), value: counts.terminated as f64 },
    ]
    .iter()
    .map(|m| m.to_string())
    .collect::<Vec<_>>()
    .join("\n")
}

pub fn render_node(node_id: &str, counts: &NodeCounts) -> String {
    let labels = || vec![("node_id", node_id.to_string())];
    [
        Metric { name: "searchdog_node_heartbeats_received_total", labels: labels(), value: counts.heartbeats_received as f64 },
        Metric { name: "searchdog_node_heartbeats_missed_total", labels: labels(), value: counts.heartbeats_missed as f64 },
    ]
    .iter()
    .map(|m| m.to_string())
    .collect::<Vec<_>>()
    .join("\n")
}
