use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::time::Duration;

/// Coordination-node counters (spec.md §4.2).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CoordinationCounts {
    pub requests: u64,
    pub requests_rejected: u64,
    pub searches: u64,
    pub bulk_requests: u64,
    pub partial_responses: u64,
    pub failed_responses: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub wrong_shard_retries: u64,
    pub request_time: Duration,
}

impl Add for CoordinationCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            requests: self.requests + rhs.requests,
            requests_rejected: self.requests_rejected + rhs.requests_rejected,
            searches: self.searches + rhs.searches,
            bulk_requests: self.bulk_requests + rhs.bulk_requests,
            partial_responses: self.partial_responses + rhs.partial_responses,
            failed_responses: self.failed_responses + rhs.failed_responses,
            cache_hits: self.cache_hits + rhs.cache_hits,
            cache_misses: self.cache_misses + rhs.cache_misses,
            wrong_shard_retries: self.wrong_shard_retries + rhs.wrong_shard_retries,
            request_time: self.request_time + rhs.request_time,
        }
    }
}
