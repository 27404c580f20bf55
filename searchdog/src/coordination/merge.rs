//! Result merging (spec.md §4.2.4 "Result Merger"): k-way hit merge across
//! shard responses and per-kind aggregation reduction. Grounded on
//! [`crate::data::engine::memory::compute_agg`] for what each shard partial
//! contains, and reusing its `hll_insert`/`hll_estimate`/`percentile_of`
//! helpers directly rather than re-deriving the sketch math.
//!
//! `AggResult.name` on the wire is always the *field name* the shard
//! aggregated over (see `compute_agg`'s `name` binding), not the caller's
//! requested aggregation name from the `aggs` clause of the query DSL —
//! the data tier only ever sees one `AggRequest.spec_json` per slot and
//! never threads the request-level name through. Callers of
//! [`merge_all`] therefore pass the requested names in request order and
//! get them re-attached to the merged result in that same order.

use std::cmp::Ordering;
use std::collections::HashMap;

use searchdog_proto::common;

use crate::data::engine::memory::{hll_estimate, percentile_of};
use crate::data::engine::AggSpec;

const HLL_M: usize = 64;
const PERCENTILE_SAMPLE_CAP: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub struct MergedHit {
    pub shard_id: u32,
    pub doc_id: String,
    pub score: f64,
    pub source_json: Vec<u8>,
}

/// Merges per-shard top-`size` hit lists into one globally ranked page.
/// Shards already sorted their own hits by score descending; this does a
/// straightforward k-way merge by score, breaking ties on
/// `(shard_id, doc_id)` for a total order stable across identical reruns
/// (spec.md §4.2.4 "ties are broken deterministically").
pub fn merge_hits(per_shard: Vec<(u32, Vec<common::Hit>)>, from: usize, size: usize) -> Vec<MergedHit> {
    let mut all: Vec<MergedHit> = per_shard
        .into_iter()
        .flat_map(|(shard_id, hits)| {
            hits.into_iter().map(move |h| MergedHit {
                shard_id,
                doc_id: h.doc_id,
                score: h.score,
                source_json: h.source_json,
            })
        })
        .collect();

    all.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.shard_id.cmp(&b.shard_id))
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });

    all.into_iter().skip(from).take(size).collect()
}

/// Merges the per-shard `AggResult` lists for one request into the final
/// client-facing results, re-keying each by the caller's requested name
/// (`requested` is `(name, spec)` in the same order the request was sent
/// to every shard, so each shard's `aggs[i]` lines up positionally).
pub fn merge_all(requested: &[(String, AggSpec)], per_shard: Vec<Vec<common::AggResult>>) -> Vec<common::AggResult> {
    let mut merged = Vec::with_capacity(requested.len());
    for (i, (name, spec)) in requested.iter().enumerate() {
        let parts: Vec<&common::AggResult> = per_shard
            .iter()
            .filter_map(|shard_aggs| shard_aggs.get(i))
            .collect();
        if parts.is_empty() {
            continue;
        }
        let mut result = merge_one(spec, parts);
        result.name = name.clone();
        merged.push(result);
    }
    merged
}

fn merge_one(spec: &AggSpec, parts: Vec<&common::AggResult>) -> common::AggResult {
    match spec {
        AggSpec::Terms { size, .. } => merge_bucketed(parts, Some(*size as usize), true),
        AggSpec::Histogram { .. } | AggSpec::DateHistogram { .. } | AggSpec::Range { .. } | AggSpec::Filters { .. } => {
            merge_bucketed(parts, None, false)
        }
        AggSpec::Stats { .. } | AggSpec::ExtendedStats { .. } => merge_stats(parts),
        AggSpec::Avg { .. } => merge_stats(parts),
        AggSpec::Sum { .. } => merge_stats(parts),
        AggSpec::Min { .. } => merge_stats(parts),
        AggSpec::Max { .. } => merge_stats(parts),
        AggSpec::ValueCount { .. } => merge_stats(parts),
        AggSpec::Cardinality { .. } => merge_cardinality(parts),
        AggSpec::Percentiles { percents, .. } => merge_percentiles(parts, percents),
    }
}

/// Sums `doc_count` for matching bucket keys across shards. `terms`
/// re-sorts by the merged count and truncates to the final `size`
/// (bounded error controlled shard-side by `shard_size`, spec.md §4.2.4);
/// the other bucketed kinds keep the deterministic key ordering the
/// shards already agree on (histogram bucket boundaries, range order,
/// filter declaration order) so `sort_by_count` is false for them.
fn merge_bucketed(parts: Vec<&common::AggResult>, size: Option<usize>, sort_by_count: bool) -> common::AggResult {
    let kind = parts.first().map(|p| p.kind.clone()).unwrap_or_default();
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, u64> = HashMap::new();
    for part in &parts {
        for bucket in &part.buckets {
            if !counts.contains_key(&bucket.key) {
                order.push(bucket.key.clone());
            }
            *counts.entry(bucket.key.clone()).or_insert(0) += bucket.doc_count;
        }
    }

    let mut buckets: Vec<common::AggBucket> = order
        .into_iter()
        .map(|key| {
            let doc_count = counts[&key];
            common::AggBucket { key, doc_count, sub_aggs: Vec::new() }
        })
        .collect();

    if sort_by_count {
        buckets.sort_by(|a, b| b.doc_count.cmp(&a.doc_count).then_with(|| a.key.cmp(&b.key)));
    }
    if let Some(size) = size {
        buckets.truncate(size.max(1));
    }

    common::AggResult { kind, buckets, ..Default::default() }
}

fn merge_stats(parts: Vec<&common::AggResult>) -> common::AggResult {
    let kind = parts.first().map(|p| p.kind.clone()).unwrap_or_default();
    let count: u64 = parts.iter().map(|p| p.count).sum();
    let sum: f64 = parts.iter().map(|p| p.sum).sum();
    let sum_of_squares: f64 = parts.iter().map(|p| p.sum_of_squares).sum();
    let min = parts.iter().map(|p| p.min).fold(f64::INFINITY, f64::min);
    let max = parts.iter().map(|p| p.max).fold(f64::NEG_INFINITY, f64::max);
    common::AggResult {
        kind,
        count,
        sum,
        sum_of_squares,
        min: if count > 0 { min } else { 0.0 },
        max: if count > 0 { max } else { 0.0 },
        ..Default::default()
    }
}

/// Elementwise max of each shard's HyperLogLog register array (the
/// standard HLL union), then a fresh estimate from the merged registers
/// (spec.md §4.2.4 "cardinality merges by unioning sketches, never by
/// summing shard-local counts").
fn merge_cardinality(parts: Vec<&common::AggResult>) -> common::AggResult {
    let mut merged = [0u8; HLL_M];
    for part in &parts {
        for (i, &r) in part.sketch.iter().enumerate().take(HLL_M) {
            if r > merged[i] {
                merged[i] = r;
            }
        }
    }
    let estimate = hll_estimate(&merged);
    common::AggResult {
        kind: "cardinality".into(),
        count: estimate.round() as u64,
        sketch: merged.to_vec(),
        ..Default::default()
    }
}

/// Concatenates each shard's sorted percentile sample (re-sorting the
/// union), capped the same way the engine caps its own shard-local sample
/// (spec.md §9 open question: exact sketch algorithm is unspecified, an
/// approximate merge is acceptable), then recomputes every requested
/// percentile from the merged sample.
fn merge_percentiles(parts: Vec<&common::AggResult>, percents: &[f64]) -> common::AggResult {
    let mut values: Vec<f64> = Vec::new();
    for part in &parts {
        for chunk in part.sketch.chunks_exact(8) {
            let bytes: [u8; 8] = chunk.try_into().expect("chunks_exact(8)");
            values.push(f64::from_le_bytes(bytes));
        }
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    values.truncate(PERCENTILE_SAMPLE_CAP);

    let percentile_estimates = percents.iter().map(|p| (format!("{p}"), percentile_of(&values, *p))).collect();
    let sketch = values.iter().flat_map(|v| v.to_le_bytes()).collect();

    common::AggResult { kind: "percentiles".into(), sketch, percentile_estimates, ..Default::default() }
}

#[cfg(test)]
mod test {
    use super::*;

    fn hit(shard: u32, id: &str, score: f64) -> common::Hit {
        common::Hit { doc_id: id.into(), score, source_json: Vec::new() }
    }

    #[test]
    fn test_merge_hits_orders_by_score_desc() {
        let merged = merge_hits(vec![(0, vec![hit(0, "a", 1.0)]), (1, vec![hit(1, "b", 2.0)])], 0, 10);
        assert_eq!(merged[0].doc_id, "b");
        assert_eq!(merged[1].doc_id, "a");
    }

    #[test]
    fn test_merge_hits_breaks_ties_by_shard_then_doc_id() {
        let merged = merge_hits(
            vec![(1, vec![hit(1, "z", 1.0)]), (0, vec![hit(0, "a", 1.0)])],
            0,
            10,
        );
        assert_eq!(merged[0].doc_id, "a");
        assert_eq!(merged[1].doc_id, "z");
    }

    #[test]
    fn test_merge_hits_respects_from_and_size() {
        let hits = (0..5).map(|i| hit(0, &i.to_string(), 5.0 - i as f64)).collect();
        let merged = merge_hits(vec![(0, hits)], 2, 2);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].doc_id, "2");
    }

    #[test]
    fn test_merge_stats_sums_across_shards() {
        let a = common::AggResult { kind: "stats".into(), count: 2, sum: 10.0, min: 1.0, max: 9.0, ..Default::default() };
        let b = common::AggResult { kind: "stats".into(), count: 3, sum: 15.0, min: 0.5, max: 7.0, ..Default::default() };
        let merged = merge_stats(vec![&a, &b]);
        assert_eq!(merged.count, 5);
        assert_eq!(merged.sum, 25.0);
        assert_eq!(merged.min, 0.5);
        assert_eq!(merged.max, 9.0);
    }

    #[test]
    fn test_merge_bucketed_terms_sums_and_truncates() {
        let a = common::AggResult {
            kind: "terms".into(),
            buckets: vec![
                common::AggBucket { key: "red".into(), doc_count: 3, sub_aggs: vec![] },
                common::AggBucket { key: "blue".into(), doc_count: 1, sub_aggs: vec![] },
            ],
            ..Default::default()
        };
        let b = common::AggResult {
            kind: "terms".into(),
            buckets: vec![common::AggBucket { key: "red".into(), doc_count: 2, sub_aggs: vec![] }],
            ..Default::default()
        };
        let merged = merge_bucketed(vec![&a, &b], Some(1), true);
        assert_eq!(merged.buckets.len(), 1);
        assert_eq!(merged.buckets[0].key, "red");
        assert_eq!(merged.buckets[0].doc_count, 5);
    }

    #[test]
    fn test_merge_all_rekeys_by_requested_name() {
        let requested = vec![("price_stats".to_string(), AggSpec::Stats { field: "price".into() })];
        let shard_a = vec![common::AggResult { name: "price".into(), kind: "stats".into(), count: 1, sum: 10.0, ..Default::default() }];
        let merged = merge_all(&requested, vec![shard_a]);
        assert_eq!(merged[0].name, "price_stats");
    }
}
