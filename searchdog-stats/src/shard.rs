use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::time::Duration;

/// Per-shard counters, updated by a data node after each operation
/// (spec.md §4.3 "Public operations").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ShardCounts {
    pub docs_indexed: u64,
    pub docs_deleted: u64,
    pub searches: u64,
    pub counts: u64,
    pub refreshes: u64,
    pub flushes: u64,
    pub udf_filter_errors: u64,
    pub expr_filter_evaluations: u64,
    pub search_time: Duration,
    pub index_time: Duration,
}

impl Add for ShardCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            docs_indexed: self.docs_indexed + rhs.docs_indexed,
            docs_deleted: self.docs_deleted + rhs.docs_deleted,
            searches: self.searches + rhs.searches,
            counts: self.counts + rhs.counts,
            refreshes: self.refreshes + rhs.refreshes,
            flushes: self.flushes + rhs.flushes,
            udf_filter_errors: self.udf_filter_errors + rhs.udf_filter_errors,
            expr_filter_evaluations: self.expr_filter_evaluations + rhs.expr_filter_evaluations,
            search_time: self.search_time + rhs.search_time,
            index_time: self.index_time + rhs.index_time,
        }
    }
}
