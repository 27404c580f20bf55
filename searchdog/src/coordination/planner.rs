//! Query planner (spec.md §4.2.2): turns a [`super::dsl::ParsedSearch`]
//! into a push-down decision plus bookkeeping the executor and result
//! cache need — complexity score, cacheability, and whether a `wasm_udf`
//! filter can run shard-side or must fall back to the coordination tier.

use searchdog_udf_sdk::{Capability, ResourceLimits, UdfMetadata};

use crate::data::engine::{AggSpec, Query};

use super::dsl::ParsedSearch;

/// Sandbox budget a data node is willing to push a UDF filter into,
/// mirrored from `searchdog-config`'s UDF limits rather than duplicated
/// here; the planner only needs the two numbers it compares against.
#[derive(Debug, Clone, Copy)]
pub struct PushdownBudget {
    pub max_wall_time_ms: u64,
    pub max_memory_pages: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdfPlacement {
    /// No `wasm_udf` filter on this request.
    None,
    /// Pushed down; the data tier evaluates it per candidate document.
    PushedDown,
    /// Runs in the coordination tier after fetching candidates, because
    /// it declares a capability beyond `read_document` or its resource
    /// class exceeds the data tier's sandbox budget.
    CoordinatorSide,
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub complexity: u32,
    pub cacheable: bool,
    pub udf_placement: UdfPlacement,
}

/// Scores `1` per leaf query node, `1` per aggregation, `2` per `expr`
/// filter (evaluated per document) and `4` per pushed UDF filter
/// (sandboxed call overhead dominates); used for admission-control
/// logging, not as a hard limit.
fn score_query(query: &Query) -> u32 {
    match query {
        Query::MatchAll => 0,
        Query::Bool { must, should, filter, must_not, .. } => {
            1 + [must, should, filter, must_not].iter().map(|g| g.iter().map(score_query).sum::<u32>()).sum::<u32>()
        }
        _ => 1,
    }
}

fn score_agg(spec: &AggSpec) -> u32 {
    match spec {
        AggSpec::Filters { filters } => 1 + filters.iter().map(|(_, q)| score_query(q)).sum::<u32>(),
        _ => 1,
    }
}

/// Decides where a `wasm_udf` filter runs (spec.md §4.2.2 "UDF filters
/// that declare only `read_document` capability and whose resource class
/// fits the data tier's sandbox budget are pushed down; otherwise, they
/// run in the coordination tier after fetching candidates").
pub fn place_udf(meta: Option<&UdfMetadata>, budget: PushdownBudget) -> UdfPlacement {
    let Some(meta) = meta else {
        return UdfPlacement::CoordinatorSide;
    };
    let capability_fits = meta.capabilities.iter().all(|c| *c == Capability::ReadDocument);
    let resource_fits = fits_budget(&meta.limits, budget);
    if capability_fits && resource_fits {
        UdfPlacement::PushedDown
    } else {
        UdfPlacement::CoordinatorSide
    }
}

fn fits_budget(limits: &ResourceLimits, budget: PushdownBudget) -> bool {
    limits.wall_time <= std::time::Duration::from_millis(budget.max_wall_time_ms) && limits.memory_pages <= budget.max_memory_pages
}

pub fn plan(parsed: &ParsedSearch, udf_meta: Option<&UdfMetadata>, budget: PushdownBudget) -> QueryPlan {
    let mut complexity = score_query(&parsed.query);
    complexity += parsed.aggs.iter().map(|(_, spec)| score_agg(spec)).sum::<u32>();
    if parsed.filter_expr.is_some() {
        complexity += 2;
    }

    let udf_placement = if parsed.udf_filter.is_some() {
        complexity += 4;
        place_udf(udf_meta, budget)
    } else {
        UdfPlacement::None
    };

    // spec.md §4.2.2: "cacheable only for queries with no UDFs and no `from > 0`".
    let cacheable = parsed.udf_filter.is_none() && parsed.from == 0;

    QueryPlan { complexity, cacheable, udf_placement }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coordination::dsl::parse_search;
    use serde_json::json;

    fn budget() -> PushdownBudget {
        PushdownBudget { max_wall_time_ms: 50, max_memory_pages: 16 }
    }

    #[test]
    fn test_plain_term_query_has_low_complexity_and_is_cacheable() {
        let parsed = parse_search(&json!({"query": {"term": {"field": "status", "value": "ok"}}})).unwrap();
        let plan = plan(&parsed, None, budget());
        assert!(plan.cacheable);
        assert_eq!(plan.udf_placement, UdfPlacement::None);
    }

    #[test]
    fn test_from_greater_than_zero_is_not_cacheable() {
        let parsed = parse_search(&json!({"query": {"match_all": {}}, "from": 10})).unwrap();
        let plan = plan(&parsed, None, budget());
        assert!(!plan.cacheable);
    }

    #[test]
    fn test_udf_missing_metadata_falls_back_coordinator_side() {
        let parsed = parse_search(&json!({
            "query": {"bool": {"filter": [{"wasm_udf": {"name": "missing", "params": {}}}]}}
        }))
        .unwrap();
        let plan = plan(&parsed, None, budget());
        assert_eq!(plan.udf_placement, UdfPlacement::CoordinatorSide);
        assert!(!plan.cacheable);
    }
}
