//! Wire <-> engine conversions for the data tier (spec.md §4.3
//! "Translations leak no coordinator-internal state"). The coordinator
//! already produces [`super::engine::Query`]/[`super::engine::AggSpec`]
//! values and ships them JSON-encoded in `query_json`/`spec_json`; this
//! module is the deserialization boundary plus the engine-partial to
//! wire-`AggResult` projection, the data-tier analogue of
//! `control::convert`.

use super::engine::{AggBucket, AggPartial, AggSpec, Document, EngineError, Query};
use searchdog_proto::common;

pub fn query_from_json(bytes: &[u8]) -> Result<Query, EngineError> {
    if bytes.is_empty() {
        return Ok(Query::MatchAll);
    }
    serde_json::from_slice(bytes).map_err(|e| EngineError::Invalid(format!("invalid query_json: {e}")))
}

pub fn agg_spec_from_json(bytes: &[u8]) -> Result<AggSpec, EngineError> {
    serde_json::from_slice(bytes).map_err(|e| EngineError::Invalid(format!("invalid agg spec_json: {e}")))
}

pub fn document_from_bytes(bytes: &[u8]) -> Result<Document, EngineError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| EngineError::Invalid(format!("invalid source_json: {e}")))?;
    value
        .as_object()
        .cloned()
        .ok_or_else(|| EngineError::Invalid("document source must be a JSON object".into()))
}

pub fn document_to_bytes(doc: &Document) -> Vec<u8> {
    serde_json::to_vec(doc).unwrap_or_default()
}

pub fn bucket_to_proto(bucket: &AggBucket) -> common::AggBucket {
    common::AggBucket {
        key: bucket.key.clone(),
        doc_count: bucket.doc_count,
        sub_aggs: bucket.sub_aggs.iter().map(partial_to_proto).collect(),
    }
}

pub fn partial_to_proto(partial: &AggPartial) -> common::AggResult {
    common::AggResult {
        name: partial.name.clone(),
        kind: partial.kind.clone(),
        buckets: partial.buckets.iter().map(bucket_to_proto).collect(),
        count: partial.count,
        sum: partial.sum,
        sum_of_squares: partial.sum_of_squares,
        min: partial.min,
        max: partial.max,
        sketch: partial.sketch.clone(),
        percentile_estimates: partial.percentile_estimates.clone(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_query_json_is_match_all() {
        assert_eq!(query_from_json(&[]).unwrap(), Query::MatchAll);
    }

    #[test]
    fn test_query_roundtrips_through_json() {
        let query = Query::Term { field: "title".into(), value: json!("laptop") };
        let bytes = serde_json::to_vec(&query).unwrap();
        assert_eq!(query_from_json(&bytes).unwrap(), query);
    }

    #[test]
    fn test_document_from_bytes_rejects_non_object() {
        let bytes = serde_json::to_vec(&json!([1, 2, 3])).unwrap();
        assert!(document_from_bytes(&bytes).is_err());
    }
}
