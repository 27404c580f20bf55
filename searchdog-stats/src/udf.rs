use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::sync::Arc;
use std::time::Duration;

/// Per-(name, version) UDF call counters (spec.md §4.5.2 "Statistics": "The
/// runtime counts calls, total duration, and errors per UDF").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UdfCounts {
    pub calls: u64,
    pub completed: u64,
    pub errored: u64,
    pub terminated: u64,
    pub total_duration: Duration,
}

impl Add for UdfCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            calls: self.calls + rhs.calls,
            completed: self.completed + rhs.completed,
            errored: self.errored + rhs.errored,
            terminated: self.terminated + rhs.terminated,
            total_duration: self.total_duration + rhs.total_duration,
        }
    }
}

/// Registry-wide UDF statistics, read-only outside the runtime (spec.md
/// §4.5.2: "exposes them via the control tier (read-only)").
#[derive(Debug, Clone, Default)]
pub struct UdfStatsTable {
    inner: Arc<DashMap<(String, String), UdfCounts>>,
}

impl UdfStatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completed(&self, name: &str, version: &str, duration: Duration) {
        let mut entry = self.inner.entry((name.to_string(), version.to_string())).or_default();
        entry.calls += 1;
        entry.completed += 1;
        entry.total_duration += duration;
    }

    pub fn record_errored(&self, name: &str, version: &str, duration: Duration) {
        let mut entry = self.inner.entry((name.to_string(), version.to_string())).or_default();
        entry.calls += 1;
        entry.errored += 1;
        entry.total_duration += duration;
    }

    pub fn record_terminated(&self, name: &str, version: &str, duration: Duration) {
        let mut entry = self.inner.entry((name.to_string(), version.to_string())).or_default();
        entry.calls += 1;
        entry.terminated += 1;
        entry.total_duration += duration;
    }

    pub fn get(&self, name: &str, version: &str) -> UdfCounts {
        self.inner
            .get(&(name.to_string(), version.to_string()))
            .map(|c| *c)
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<((String, String), UdfCounts)> {
        self.inner
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_records_by_name_and_version() {
        let table = UdfStatsTable::new();
        table.record_completed("price_in_range", "1.0.0", Duration::from_micros(50));
        table.record_errored("price_in_range", "1.0.0", Duration::from_micros(5));
        table.record_completed("price_in_range", "2.0.0", Duration::from_micros(20));

        let v1 = table.get("price_in_range", "1.0.0");
        assert_eq!(v1.calls, 2);
        assert_eq!(v1.completed, 1);
        assert_eq!(v1.errored, 1);

        let v2 = table.get("price_in_range", "2.0.0");
        assert_eq!(v2.calls, 1);

        assert_eq!(table.snapshot().len(), 2);
    }
}
