//! An in-memory reference [`IndexEngine`] (spec.md §6.5 is an external
//! collaborator contract; this is the zero-dependency implementation of it
//! used by tests and by the `memory` engine backend so the rest of the data
//! tier has something real to drive without embedding an actual search
//! library). BM25-ish scoring, a hand-rolled inverted index per field, and
//! the full aggregation-partial shape spec.md §4.2.4 expects shard-local
//! results to carry.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde_json::Value as Json;

use super::{Analyzer, AggBucket, AggPartial, AggSpec, Document, EngineError, Hit, Predicate, Query, SearchResult};

const K1: f64 = 1.2;
const B: f64 = 0.75;
/// Register count for the cardinality sketch: a small power of two keeps
/// the engine cheap while giving a documented ~1/sqrt(HLL_M) relative error
/// (spec.md §9 "the exact sketching algorithms ... are not fixed here; the
/// error-bound contract is").
const HLL_M: usize = 64;
/// Cap on the percentile reservoir sample kept per shard; merging
/// concatenates two shards' samples and re-trims to this bound.
const PERCENTILE_SAMPLE_CAP: usize = 512;

#[derive(Debug, Clone)]
struct DocEntry {
    source: Document,
    version: u64,
    tokens: HashMap<String, Vec<String>>,
}

fn tokenize_source(source: &Document) -> HashMap<String, Vec<String>> {
    let mut tokens = HashMap::new();
    for (field, value) in source.iter() {
        let text = match value {
            Json::String(s) => s.clone(),
            Json::Number(n) => n.to_string(),
            Json::Bool(b) => b.to_string(),
            _ => continue,
        };
        tokens.insert(field.clone(), Analyzer::Standard.tokenize(&text));
    }
    tokens
}

#[derive(Debug, Default)]
struct Inner {
    /// Durable store: every acknowledged write lands here immediately
    /// (spec.md §4.3 "Writes are durable once acknowledged").
    committed: HashMap<String, DocEntry>,
    /// Snapshot search/aggregate operate over; replaced wholesale on
    /// `refresh()` (spec.md §4.3 "Refresh model").
    visible: HashMap<String, DocEntry>,
    next_version: u64,
}

pub struct MemoryEngine {
    inner: RwLock<Inner>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

// --- term statistics over the visible snapshot --------------------------

struct Stats<'a> {
    visible: &'a HashMap<String, DocEntry>,
}

impl<'a> Stats<'a> {
    fn total_docs(&self) -> usize {
        self.visible.len().max(1)
    }

    fn doc_freq(&self, field: &str, term: &str) -> usize {
        self.visible
            .values()
            .filter(|d| d.tokens.get(field).map(|t| t.iter().any(|x| x == term)).unwrap_or(false))
            .count()
    }

    fn avg_len(&self, field: &str) -> f64 {
        let lens: Vec<usize> = self
            .visible
            .values()
            .filter_map(|d| d.tokens.get(field).map(|t| t.len()))
            .collect();
        if lens.is_empty() {
            1.0
        } else {
            lens.iter().sum::<usize>() as f64 / lens.len() as f64
        }
    }

    fn bm25_term(&self, field: &str, term: &str, tokens: &[String]) -> f64 {
        let tf = tokens.iter().filter(|t| *t == term).count();
        if tf == 0 {
            return 0.0;
        }
        let n = self.total_docs() as f64;
        let df = self.doc_freq(field, term) as f64;
        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
        let dl = tokens.len() as f64;
        let avgdl = self.avg_len(field).max(1.0);
        idf * (tf as f64 * (K1 + 1.0)) / (tf as f64 + K1 * (1.0 - B + B * dl / avgdl))
    }
}

fn json_as_token(value: &Json) -> Option<String> {
    match value {
        Json::String(s) => Some(s.to_lowercase()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn field_as_f64(source: &Document, field: &str) -> Option<f64> {
    source.get(field).and_then(|v| v.as_f64())
}

fn levenshtein(a: &str, b: &str) -> u32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<u32> = (0..=b.len() as u32).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut cur = vec![0u32; b.len() + 1];
        cur[0] = i as u32 + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        prev = cur;
    }
    prev[b.len()]
}

fn glob_match(pattern: &str, text: &str) -> bool {
    fn rec(p: &[char], t: &[char]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some('*') => rec(&p[1..], t) || (!t.is_empty() && rec(p, &t[1..])),
            Some('?') => !t.is_empty() && rec(&p[1..], &t[1..]),
            Some(c) => !t.is_empty() && *c == t[0] && rec(&p[1..], &t[1..]),
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    rec(&p, &t)
}

/// Evaluate `query` against one document, returning its contribution to
/// score or `None` if it does not match at all.
fn eval(query: &Query, doc_id: &str, entry: &DocEntry, stats: &Stats, predicate: &Option<Predicate>) -> Option<f64> {
    if let Some(pred) = predicate {
        if !pred(doc_id, &entry.source) {
            return None;
        }
    }
    eval_query(query, entry, stats)
}

fn eval_query(query: &Query, entry: &DocEntry, stats: &Stats) -> Option<f64> {
    match query {
        Query::MatchAll => Some(1.0),
        Query::Term { field, value } => {
            if let Some(raw) = entry.source.get(field) {
                if raw == value {
                    return Some(1.0);
                }
            }
            let term = json_as_token(value)?;
            let tokens = entry.tokens.get(field)?;
            if tokens.iter().any(|t| t == &term) {
                Some(stats.bm25_term(field, &term, tokens).max(0.01))
            } else {
                None
            }
        }
        Query::Match { field, text } => {
            let tokens = entry.tokens.get(field)?;
            let query_terms = Analyzer::Standard.tokenize(text);
            let mut score = 0.0;
            let mut matched = false;
            for term in &query_terms {
                let s = stats.bm25_term(field, term, tokens);
                if s > 0.0 {
                    matched = true;
                    score += s;
                }
            }
            matched.then_some(score.max(0.01))
        }
        Query::Phrase { field, text } => {
            let tokens = entry.tokens.get(field)?;
            let query_terms = Analyzer::Standard.tokenize(text);
            if query_terms.is_empty() {
                return None;
            }
            let found = tokens.windows(query_terms.len()).any(|w| w == query_terms.as_slice());
            if found {
                let score: f64 = query_terms.iter().map(|t| stats.bm25_term(field, t, tokens)).sum();
                Some(score.max(0.01))
            } else {
                None
            }
        }
        Query::Prefix { field, value } => {
            let tokens = entry.tokens.get(field)?;
            tokens.iter().any(|t| t.starts_with(value.as_str())).then_some(1.0)
        }
        Query::Wildcard { field, pattern } => {
            let tokens = entry.tokens.get(field)?;
            tokens.iter().any(|t| glob_match(pattern, t)).then_some(1.0)
        }
        Query::Fuzzy { field, value, fuzziness } => {
            let tokens = entry.tokens.get(field)?;
            tokens
                .iter()
                .any(|t| levenshtein(t, value) <= *fuzziness)
                .then_some(1.0)
        }
        Query::Range { field, gte, gt, lte, lt } => {
            let value = field_as_f64(&entry.source, field)?;
            if let Some(b) = gte {
                if value < *b {
                    return None;
                }
            }
            if let Some(b) = gt {
                if value <= *b {
                    return None;
                }
            }
            if let Some(b) = lte {
                if value > *b {
                    return None;
                }
            }
            if let Some(b) = lt {
                if value >= *b {
                    return None;
                }
            }
            Some(1.0)
        }
        Query::Bool {
            must,
            should,
            filter,
            must_not,
            minimum_should_match,
        } => {
            for q in must_not {
                if eval_query(q, entry, stats).is_some() {
                    return None;
                }
            }
            let mut score = 0.0;
            for q in must {
                match eval_query(q, entry, stats) {
                    Some(s) => score += s,
                    None => return None,
                }
            }
            for q in filter {
                eval_query(q, entry, stats)?;
            }
            let should_matches: Vec<f64> = should.iter().filter_map(|q| eval_query(q, entry, stats)).collect();
            let required_should = if *minimum_should_match > 0 {
                *minimum_should_match as usize
            } else if must.is_empty() && filter.is_empty() && !should.is_empty() {
                1
            } else {
                0
            };
            if should_matches.len() < required_should {
                return None;
            }
            score += should_matches.iter().sum::<f64>();
            if must.is_empty() && filter.is_empty() && should.is_empty() {
                return Some(1.0);
            }
            Some(score.max(0.01))
        }
    }
}

fn matching_docs<'a>(
    visible: &'a HashMap<String, DocEntry>,
    query: &Query,
    predicate: &Option<Predicate>,
) -> Vec<(&'a str, &'a DocEntry, f64)> {
    let stats = Stats { visible };
    let mut out = Vec::new();
    for (id, entry) in visible.iter() {
        if let Some(score) = eval(query, id, entry, &stats, predicate) {
            out.push((id.as_str(), entry, score));
        }
    }
    out
}

// --- cardinality sketch (simplified HyperLogLog) -------------------------

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub fn hll_insert(registers: &mut [u8; HLL_M], value: &str) {
    let h = fnv1a(value.as_bytes());
    let bucket = (h as usize) & (HLL_M - 1);
    let rest = h >> HLL_M.trailing_zeros();
    let rho = (rest.trailing_zeros() as u8) + 1;
    if rho > registers[bucket] {
        registers[bucket] = rho;
    }
}

pub fn hll_estimate(registers: &[u8]) -> f64 {
    let m = registers.len() as f64;
    let sum: f64 = registers.iter().map(|&r| 2f64.powi(-(r as i32))).sum();
    let alpha = 0.7213 / (1.0 + 1.079 / m);
    alpha * m * m / sum
}

fn field_to_string(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compute_agg(
    spec: &AggSpec,
    docs: &[(&str, &DocEntry, f64)],
    visible: &HashMap<String, DocEntry>,
    predicate: &Option<Predicate>,
) -> AggPartial {
    let name = match spec {
        AggSpec::Terms { field, .. } => field.clone(),
        AggSpec::Histogram { field, .. } => field.clone(),
        AggSpec::DateHistogram { field, .. } => field.clone(),
        AggSpec::Range { field, .. } => field.clone(),
        AggSpec::Filters { .. } => "filters".to_string(),
        AggSpec::Stats { field }
        | AggSpec::ExtendedStats { field }
        | AggSpec::Avg { field }
        | AggSpec::Sum { field }
        | AggSpec::Min { field }
        | AggSpec::Max { field }
        | AggSpec::ValueCount { field }
        | AggSpec::Cardinality { field }
        | AggSpec::Percentiles { field, .. } => field.clone(),
    };

    match spec {
        AggSpec::Terms { field, size: _, shard_size } => {
            let mut counts: HashMap<String, u64> = HashMap::new();
            for (_, entry, _) in docs {
                if let Some(v) = entry.source.get(field) {
                    *counts.entry(field_to_string(v)).or_insert(0) += 1;
                }
            }
            let mut buckets: Vec<AggBucket> = counts
                .into_iter()
                .map(|(key, doc_count)| AggBucket { key, doc_count, sub_aggs: Vec::new() })
                .collect();
            buckets.sort_by(|a, b| b.doc_count.cmp(&a.doc_count).then(a.key.cmp(&b.key)));
            buckets.truncate((*shard_size).max(1) as usize);
            AggPartial { name, kind: "terms".into(), buckets, ..Default::default() }
        }
        AggSpec::Histogram { field, interval } => {
            let mut counts: BTreeMap<i64, u64> = BTreeMap::new();
            for (_, entry, _) in docs {
                if let Some(v) = field_as_f64(&entry.source, field) {
                    let bucket = (v / interval).floor() as i64;
                    *counts.entry(bucket).or_insert(0) += 1;
                }
            }
            let buckets = counts
                .into_iter()
                .map(|(b, doc_count)| AggBucket {
                    key: format!("{}", b as f64 * interval),
                    doc_count,
                    sub_aggs: Vec::new(),
                })
                .collect();
            AggPartial { name, kind: "histogram".into(), buckets, ..Default::default() }
        }
        AggSpec::DateHistogram { field, interval_ms } => {
            let mut counts: BTreeMap<i64, u64> = BTreeMap::new();
            for (_, entry, _) in docs {
                if let Some(v) = field_as_f64(&entry.source, field) {
                    let bucket = (v as i64) / (*interval_ms as i64).max(1);
                    *counts.entry(bucket).or_insert(0) += 1;
                }
            }
            let buckets = counts
                .into_iter()
                .map(|(b, doc_count)| AggBucket {
                    key: format!("{}", b * (*interval_ms as i64)),
                    doc_count,
                    sub_aggs: Vec::new(),
                })
                .collect();
            AggPartial { name, kind: "date_histogram".into(), buckets, ..Default::default() }
        }
        AggSpec::Range { field, ranges } => {
            let buckets = ranges
                .iter()
                .map(|(from, to)| {
                    let doc_count = docs
                        .iter()
                        .filter(|(_, entry, _)| {
                            field_as_f64(&entry.source, field)
                                .map(|v| from.map(|f| v >= f).unwrap_or(true) && to.map(|t| v < t).unwrap_or(true))
                                .unwrap_or(false)
                        })
                        .count() as u64;
                    AggBucket {
                        key: format!("{}-{}", from.map(|v| v.to_string()).unwrap_or_default(), to.map(|v| v.to_string()).unwrap_or_default()),
                        doc_count,
                        sub_aggs: Vec::new(),
                    }
                })
                .collect();
            AggPartial { name, kind: "range".into(), buckets, ..Default::default() }
        }
        AggSpec::Filters { filters } => {
            let stats = Stats { visible };
            let buckets = filters
                .iter()
                .map(|(key, query)| {
                    let doc_count = docs
                        .iter()
                        .filter(|(id, entry, _)| eval(query, id, entry, &stats, predicate).is_some())
                        .count() as u64;
                    AggBucket { key: key.clone(), doc_count, sub_aggs: Vec::new() }
                })
                .collect();
            AggPartial { name, kind: "filters".into(), buckets, ..Default::default() }
        }
        AggSpec::Stats { field } | AggSpec::ExtendedStats { field } => {
            let values: Vec<f64> = docs.iter().filter_map(|(_, e, _)| field_as_f64(&e.source, field)).collect();
            let kind = if matches!(spec, AggSpec::ExtendedStats { .. }) { "extended_stats" } else { "stats" };
            stats_partial(name, kind, &values)
        }
        AggSpec::Avg { field } => {
            let values: Vec<f64> = docs.iter().filter_map(|(_, e, _)| field_as_f64(&e.source, field)).collect();
            let mut p = stats_partial(name, "avg", &values);
            p.kind = "avg".into();
            p
        }
        AggSpec::Sum { field } => {
            let values: Vec<f64> = docs.iter().filter_map(|(_, e, _)| field_as_f64(&e.source, field)).collect();
            let mut p = stats_partial(name, "sum", &values);
            p.kind = "sum".into();
            p
        }
        AggSpec::Min { field } => {
            let values: Vec<f64> = docs.iter().filter_map(|(_, e, _)| field_as_f64(&e.source, field)).collect();
            let mut p = stats_partial(name, "min", &values);
            p.kind = "min".into();
            p
        }
        AggSpec::Max { field } => {
            let values: Vec<f64> = docs.iter().filter_map(|(_, e, _)| field_as_f64(&e.source, field)).collect();
            let mut p = stats_partial(name, "max", &values);
            p.kind = "max".into();
            p
        }
        AggSpec::ValueCount { field } => {
            let values: Vec<f64> = docs.iter().filter_map(|(_, e, _)| field_as_f64(&e.source, field)).collect();
            let mut p = stats_partial(name, "value_count", &values);
            p.kind = "value_count".into();
            p
        }
        AggSpec::Cardinality { field } => {
            let mut registers = [0u8; HLL_M];
            for (_, entry, _) in docs {
                if let Some(v) = entry.source.get(field) {
                    hll_insert(&mut registers, &field_to_string(v));
                }
            }
            AggPartial {
                name,
                kind: "cardinality".into(),
                sketch: registers.to_vec(),
                count: hll_estimate(&registers).round() as u64,
                ..Default::default()
            }
        }
        AggSpec::Percentiles { field, percents } => {
            let mut values: Vec<f64> = docs.iter().filter_map(|(_, e, _)| field_as_f64(&e.source, field)).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap());
            values.truncate(PERCENTILE_SAMPLE_CAP);
            let estimates = percents
                .iter()
                .map(|p| (format!("{p}"), percentile_of(&values, *p)))
                .collect();
            let sketch = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            AggPartial { name, kind: "percentiles".into(), sketch, percentile_estimates: estimates, ..Default::default() }
        }
    }
}

fn stats_partial(name: String, kind: &str, values: &[f64]) -> AggPartial {
    let count = values.len() as u64;
    let sum: f64 = values.iter().sum();
    let sum_of_squares: f64 = values.iter().map(|v| v * v).sum();
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    AggPartial {
        name,
        kind: kind.into(),
        count,
        sum,
        sum_of_squares,
        min: if count > 0 { min } else { 0.0 },
        max: if count > 0 { max } else { 0.0 },
        ..Default::default()
    }
}

pub fn percentile_of(sorted: &[f64], percent: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (percent / 100.0) * (sorted.len() as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

impl super::IndexEngine for MemoryEngine {
    fn add_document(&self, doc_id: &str, source: Document) -> Result<u64, EngineError> {
        let mut inner = self.inner.write();
        inner.next_version += 1;
        let version = inner.next_version;
        let tokens = tokenize_source(&source);
        inner.committed.insert(doc_id.to_string(), DocEntry { source, version, tokens });
        Ok(version)
    }

    fn delete_document(&self, doc_id: &str) -> Result<bool, EngineError> {
        let mut inner = self.inner.write();
        let found = inner.committed.remove(doc_id).is_some();
        inner.visible.remove(doc_id);
        Ok(found)
    }

    fn get_document(&self, doc_id: &str) -> Result<Option<(Document, u64)>, EngineError> {
        let inner = self.inner.read();
        Ok(inner.committed.get(doc_id).map(|e| (e.source.clone(), e.version)))
    }

    fn commit(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn refresh(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.write();
        inner.visible = inner.committed.clone();
        Ok(())
    }

    fn flush(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn doc_count(&self) -> u64 {
        self.inner.read().visible.len() as u64
    }

    fn search(
        &self,
        query: &Query,
        predicate: Option<Predicate>,
        from: usize,
        size: usize,
    ) -> Result<SearchResult, EngineError> {
        let inner = self.inner.read();
        let mut matches = matching_docs(&inner.visible, query, &predicate);
        matches.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(b.0)));
        let total = matches.len() as u64;
        let hits = matches
            .into_iter()
            .skip(from)
            .take(size)
            .map(|(id, entry, score)| Hit {
                doc_id: id.to_string(),
                score,
                source: entry.source.clone(),
            })
            .collect();
        Ok(SearchResult { hits, total })
    }

    fn count(&self, query: &Query, predicate: Option<Predicate>) -> Result<u64, EngineError> {
        let inner = self.inner.read();
        Ok(matching_docs(&inner.visible, query, &predicate).len() as u64)
    }

    fn aggregate(
        &self,
        query: &Query,
        predicate: Option<Predicate>,
        specs: &[AggSpec],
    ) -> Result<Vec<AggPartial>, EngineError> {
        let inner = self.inner.read();
        let docs = matching_docs(&inner.visible, query, &predicate);
        Ok(specs.iter().map(|s| compute_agg(s, &docs, &inner.visible, &predicate)).collect())
    }
}

#[cfg(test)]
mod test {
    use super::super::IndexEngine;
    use super::*;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        json.as_object().unwrap().clone()
    }

    fn engine_with_prices() -> MemoryEngine {
        let engine = MemoryEngine::new();
        for price in (10..=100).step_by(10) {
            engine
                .add_document(&format!("p{price}"), doc(json!({"title": "widget", "price": price})))
                .unwrap();
        }
        engine.refresh().unwrap();
        engine
    }

    #[test]
    fn test_s1_term_query_finds_document() {
        let engine = MemoryEngine::new();
        engine
            .add_document("laptop-001", doc(json!({"title": "Dell XPS 15 Laptop", "price": 1299.99})))
            .unwrap();
        engine.refresh().unwrap();
        let result = engine
            .search(
                &Query::Term { field: "title".into(), value: json!("laptop") },
                None,
                0,
                10,
            )
            .unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.hits[0].doc_id, "laptop-001");
    }

    #[test]
    fn test_s2_range_bool_filter() {
        let engine = engine_with_prices();
        let query = Query::Bool {
            must: vec![],
            should: vec![],
            filter: vec![Query::Range {
                field: "price".into(),
                gte: Some(20.0),
                gt: None,
                lte: Some(50.0),
                lt: None,
            }],
            must_not: vec![],
            minimum_should_match: 0,
        };
        let result = engine.search(&query, None, 0, 100).unwrap();
        assert_eq!(result.total, 4);
        let mut prices: Vec<i64> = result
            .hits
            .iter()
            .map(|h| h.source.get("price").unwrap().as_i64().unwrap())
            .collect();
        prices.sort();
        assert_eq!(prices, vec![20, 30, 40, 50]);
    }

    #[test]
    fn test_single_doc_ranks_first() {
        let engine = MemoryEngine::new();
        engine.add_document("only", doc(json!({"title": "unique needle"}))).unwrap();
        engine.add_document("other", doc(json!({"title": "hay"}))).unwrap();
        engine.refresh().unwrap();
        let result = engine
            .search(&Query::Match { field: "title".into(), text: "needle".into() }, None, 0, 10)
            .unwrap();
        assert_eq!(result.hits[0].doc_id, "only");
    }

    #[test]
    fn test_terms_and_sum_agg_matches_manual_computation() {
        let engine = MemoryEngine::new();
        for (customer, amount) in [("a", 10.0), ("a", 5.0), ("b", 7.0)] {
            engine
                .add_document(
                    &format!("{customer}-{amount}"),
                    doc(json!({"customer_id": customer, "amount": amount})),
                )
                .unwrap();
        }
        engine.refresh().unwrap();
        let specs = vec![AggSpec::Terms { field: "customer_id".into(), size: 10, shard_size: 10 }];
        let partials = engine.aggregate(&Query::MatchAll, None, &specs).unwrap();
        let terms = &partials[0];
        let a_bucket = terms.buckets.iter().find(|b| b.key == "a").unwrap();
        assert_eq!(a_bucket.doc_count, 2);
    }

    #[test]
    fn test_refresh_gates_visibility() {
        let engine = MemoryEngine::new();
        engine.add_document("x", doc(json!({"title": "fresh"}))).unwrap();
        let result = engine.search(&Query::MatchAll, None, 0, 10).unwrap();
        assert_eq!(result.total, 0, "unrefreshed write must not be searchable yet");
        engine.refresh().unwrap();
        let result = engine.search(&Query::MatchAll, None, 0, 10).unwrap();
        assert_eq!(result.total, 1);
    }

    #[test]
    fn test_get_document_reads_durable_store_without_refresh() {
        let engine = MemoryEngine::new();
        let version = engine.add_document("x", doc(json!({"title": "fresh"}))).unwrap();
        let (source, got_version) = engine.get_document("x").unwrap().unwrap();
        assert_eq!(got_version, version);
        assert_eq!(source.get("title").unwrap(), "fresh");
    }

    #[test]
    fn test_predicate_excludes_documents() {
        let engine = engine_with_prices();
        let predicate: Predicate = std::sync::Arc::new(|_id, source| {
            source.get("price").and_then(|v| v.as_i64()).map(|p| p > 50).unwrap_or(false)
        });
        let result = engine.search(&Query::MatchAll, Some(predicate), 0, 100).unwrap();
        assert_eq!(result.total, 5);
    }
}
