//! The `IndexEngine` contract (spec.md §6.5): the sole interface the data
//! tier relies on, treating the actual single-node text-search engine as an
//! external collaborator never embedded directly, only ever spoken to
//! through this trait. [`memory`] is an in-process reference implementation
//! satisfying the contract for tests and the zero-dependency demo path.

pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;

/// A document as the engine sees it: an opaque id plus a flat-ish JSON
/// source object (spec.md §3 "Document").
pub type Document = serde_json::Map<String, Json>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("document not found")]
    NotFound,
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Internal(String),
}

/// The translated internal query tree (spec.md §4.2.1 leaf variants plus
/// the `bool` compound), shipped to the engine with coordinator-internal
/// state already stripped out (spec.md §4.3 "Translations leak no
/// coordinator-internal state").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Query {
    MatchAll,
    Term {
        field: String,
        value: Json,
    },
    Match {
        field: String,
        text: String,
    },
    Phrase {
        field: String,
        text: String,
    },
    Range {
        field: String,
        gte: Option<f64>,
        gt: Option<f64>,
        lte: Option<f64>,
        lt: Option<f64>,
    },
    Prefix {
        field: String,
        value: String,
    },
    Wildcard {
        field: String,
        pattern: String,
    },
    Fuzzy {
        field: String,
        value: String,
        fuzziness: u32,
    },
    Bool {
        must: Vec<Query>,
        should: Vec<Query>,
        filter: Vec<Query>,
        must_not: Vec<Query>,
        minimum_should_match: u32,
    },
}

impl Default for Query {
    fn default() -> Self {
        Query::MatchAll
    }
}

/// A per-document predicate the caller wraps around the engine's own
/// candidate iteration, used to plug expression and UDF evaluation in
/// without the engine understanding either (spec.md §6.5 "optional
/// per-document predicate callback").
pub type Predicate = Arc<dyn Fn(&str, &Document) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub doc_id: String,
    pub score: f64,
    pub source: Document,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub hits: Vec<Hit>,
    pub total: u64,
}

/// One aggregation request against a query's matching set (spec.md §4.2.4).
/// `shard_size` lets the coordinator ask a shard-local `terms` aggregation
/// for a larger candidate set than the final merged `size`, bounding merge
/// error for high-cardinality fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggSpec {
    Terms { field: String, size: u32, shard_size: u32 },
    Histogram { field: String, interval: f64 },
    DateHistogram { field: String, interval_ms: u64 },
    Range { field: String, ranges: Vec<(Option<f64>, Option<f64>)> },
    Filters { filters: Vec<(String, Query)> },
    Stats { field: String },
    ExtendedStats { field: String },
    Avg { field: String },
    Sum { field: String },
    Min { field: String },
    Max { field: String },
    ValueCount { field: String },
    Cardinality { field: String },
    Percentiles { field: String, percents: Vec<f64> },
}

impl AggSpec {
    pub fn sub_aggs_slot(&self) -> bool {
        true
    }
}

/// Shard-local partial result in a shape uniform across every aggregation
/// kind, so the coordinator can merge without understanding the engine
/// (spec.md §4.2.4: "the data tier returns shard-local partials in a
/// uniform shape").
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AggBucket {
    pub key: String,
    pub doc_count: u64,
    pub sub_aggs: Vec<AggPartial>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AggPartial {
    pub name: String,
    pub kind: String,
    pub buckets: Vec<AggBucket>,
    pub count: u64,
    pub sum: f64,
    pub sum_of_squares: f64,
    pub min: f64,
    pub max: f64,
    /// Opaque mergeable sketch bytes for `cardinality`/`percentiles`.
    pub sketch: Vec<u8>,
    pub percentile_estimates: HashMap<String, f64>,
}

/// A named analyzer selectable in mappings (spec.md §6.5 "Analyzers").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analyzer {
    Standard,
    Keyword,
    Whitespace,
}

impl Analyzer {
    pub fn by_name(name: &str) -> Self {
        match name {
            "keyword" => Analyzer::Keyword,
            "whitespace" => Analyzer::Whitespace,
            _ => Analyzer::Standard,
        }
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        match self {
            Analyzer::Keyword => vec![text.to_string()],
            Analyzer::Whitespace => text.split_whitespace().map(str::to_string).collect(),
            Analyzer::Standard => text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }
}

/// The single-node text-search engine contract (spec.md §6.5). One
/// instance is owned per shard; the data tier never reaches inside it
/// beyond this interface.
pub trait IndexEngine: Send + Sync {
    fn add_document(&self, doc_id: &str, source: Document) -> Result<u64, EngineError>;
    fn delete_document(&self, doc_id: &str) -> Result<bool, EngineError>;
    fn get_document(&self, doc_id: &str) -> Result<Option<(Document, u64)>, EngineError>;
    fn commit(&self) -> Result<(), EngineError>;
    fn refresh(&self) -> Result<(), EngineError>;
    fn flush(&self) -> Result<(), EngineError>;
    fn doc_count(&self) -> u64;

    fn search(
        &self,
        query: &Query,
        predicate: Option<Predicate>,
        from: usize,
        size: usize,
    ) -> Result<SearchResult, EngineError>;

    fn count(&self, query: &Query, predicate: Option<Predicate>) -> Result<u64, EngineError>;

    fn aggregate(
        &self,
        query: &Query,
        predicate: Option<Predicate>,
        specs: &[AggSpec],
    ) -> Result<Vec<AggPartial>, EngineError>;
}
