//! Strict JSON Query DSL parser (spec.md §4.2.1): turns the client's
//! request body into [`crate::data::engine::Query`] /
//! [`crate::data::engine::AggSpec`] trees plus the two extension fields
//! the wire protocol carries out-of-band (`filter_expression`,
//! `udf_request`, spec.md §6.2). Unknown fields, wrong types and missing
//! required fields all produce a [`DslError`] with a path into the input,
//! never a panic.
//!
//! The exact client-facing JSON shape for each clause isn't pinned down by
//! spec.md beyond "the JSON Query DSL" and the leaf/compound variant names;
//! the grammar below (documented per clause) is this implementation's
//! concrete choice, recorded in `DESIGN.md`.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::data::engine::{AggSpec, Query};
use searchdog_proto::expr_wire::{BinOp, Expr, Func, Literal, UnOp};
use searchdog_udf_sdk::Value as UdfValue;

#[derive(Debug, Clone, PartialEq)]
pub struct DslError {
    pub path: String,
    pub message: String,
}

impl DslError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into() }
    }
}

impl std::fmt::Display for DslError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Policy for a pushed-down UDF filter when a per-document call errors,
/// mirroring `searchdog_config::udf::ErrorPolicy` at the DSL boundary
/// (spec.md §7 "a UDF error during filtering ... is configurable").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    NonMatch,
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UdfFilter {
    pub name: String,
    pub version: String,
    pub params: HashMap<String, UdfValue>,
    pub on_error: OnError,
}

/// Everything the parser extracts from one `_search` (or `_count`) body.
/// `filter_expr` and `udf_filter` are hoisted out of any `bool.filter`
/// clause because the wire protocol carries them as separate optional
/// `SearchRequest` fields (spec.md §6.2), not as part of `query_json`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedSearch {
    pub query: Query,
    pub filter_expr: Option<Expr>,
    pub udf_filter: Option<UdfFilter>,
    pub aggs: Vec<(String, AggSpec)>,
    pub from: usize,
    pub size: usize,
}

pub fn parse_search(body: &Json) -> Result<ParsedSearch, DslError> {
    let obj = body.as_object().ok_or_else(|| DslError::new("$", "request body must be a JSON object"))?;
    check_known_fields(obj, &["query", "from", "size", "sort", "aggs"], "$")?;

    let mut parsed = ParsedSearch {
        from: read_usize(obj, "from", 0, "$.from")?,
        size: read_usize(obj, "size", 10, "$.size")?,
        ..Default::default()
    };

    let (query, hoisted_expr, hoisted_udf) = match obj.get("query") {
        Some(q) => parse_query(q, "$.query")?,
        None => (Query::MatchAll, None, None),
    };
    parsed.query = query;
    parsed.filter_expr = hoisted_expr;
    parsed.udf_filter = hoisted_udf;

    if let Some(aggs) = obj.get("aggs") {
        let aggs_obj = aggs.as_object().ok_or_else(|| DslError::new("$.aggs", "must be an object"))?;
        for (name, spec) in aggs_obj {
            parsed.aggs.push((name.clone(), parse_agg(spec, &format!("$.aggs.{name}"))?));
        }
    }

    Ok(parsed)
}

pub fn parse_count(body: &Json) -> Result<(Query, Option<Expr>), DslError> {
    let obj = body.as_object().ok_or_else(|| DslError::new("$", "request body must be a JSON object"))?;
    check_known_fields(obj, &["query"], "$")?;
    match obj.get("query") {
        Some(q) => {
            let (query, expr, udf) = parse_query(q, "$.query")?;
            if udf.is_some() {
                return Err(DslError::new("$.query", "wasm_udf filters are not supported on _count"));
            }
            Ok((query, expr))
        }
        None => Ok((Query::MatchAll, None)),
    }
}

fn check_known_fields(obj: &serde_json::Map<String, Json>, known: &[&str], path: &str) -> Result<(), DslError> {
    for key in obj.keys() {
        if !known.contains(&key.as_str()) {
            return Err(DslError::new(format!("{path}.{key}"), "unknown field"));
        }
    }
    Ok(())
}

fn read_usize(obj: &serde_json::Map<String, Json>, key: &str, default: usize, path: &str) -> Result<usize, DslError> {
    match obj.get(key) {
        None => Ok(default),
        Some(Json::Number(n)) => n
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| DslError::new(path, "must be a non-negative integer")),
        Some(_) => Err(DslError::new(path, "must be a non-negative integer")),
    }
}

fn obj_field<'a>(v: &'a Json, key: &str, path: &str) -> Result<&'a Json, DslError> {
    v.get(key).ok_or_else(|| DslError::new(path, format!("missing required field \"{key}\"")))
}

fn as_str<'a>(v: &'a Json, path: &str) -> Result<&'a str, DslError> {
    v.as_str().ok_or_else(|| DslError::new(path, "must be a string"))
}

fn as_f64(v: &Json, path: &str) -> Result<f64, DslError> {
    v.as_f64().ok_or_else(|| DslError::new(path, "must be a number"))
}

/// Parses one query clause. Returns the clause as a [`Query`] where
/// representable, plus any `expr`/`wasm_udf` extension found anywhere in
/// the tree (spec.md §4.2.1 "Two extension variants ... `expr` ...
/// `wasm_udf`"), hoisted to the top because the wire protocol carries them
/// out of band. At most one of each is supported per request; a second
/// `expr` clause is folded in with a boolean AND rather than rejected,
/// since expressions compose associatively, while a second `wasm_udf`
/// clause is rejected (there's exactly one pushdown slot on the wire).
fn parse_query(v: &Json, path: &str) -> Result<(Query, Option<Expr>, Option<UdfFilter>), DslError> {
    let obj = v.as_object().ok_or_else(|| DslError::new(path, "must be a JSON object"))?;
    if obj.len() != 1 {
        return Err(DslError::new(path, "must have exactly one clause key"));
    }
    let (clause, body) = obj.iter().next().unwrap();
    let clause_path = format!("{path}.{clause}");

    match clause.as_str() {
        "match_all" => Ok((Query::MatchAll, None, None)),
        "term" => {
            let field = as_str(obj_field(body, "field", &clause_path)?, &format!("{clause_path}.field"))?.to_string();
            let value = obj_field(body, "value", &clause_path)?.clone();
            Ok((Query::Term { field, value }, None, None))
        }
        "match" => {
            let field = as_str(obj_field(body, "field", &clause_path)?, &format!("{clause_path}.field"))?.to_string();
            let text = as_str(obj_field(body, "query", &clause_path)?, &format!("{clause_path}.query"))?.to_string();
            Ok((Query::Match { field, text }, None, None))
        }
        "match_phrase" => {
            let field = as_str(obj_field(body, "field", &clause_path)?, &format!("{clause_path}.field"))?.to_string();
            let text = as_str(obj_field(body, "query", &clause_path)?, &format!("{clause_path}.query"))?.to_string();
            Ok((Query::Phrase { field, text }, None, None))
        }
        "range" => {
            let field = as_str(obj_field(body, "field", &clause_path)?, &format!("{clause_path}.field"))?.to_string();
            let bound = |key: &str| -> Result<Option<f64>, DslError> {
                match body.get(key) {
                    None | Some(Json::Null) => Ok(None),
                    Some(n) => Ok(Some(as_f64(n, &format!("{clause_path}.{key}"))?)),
                }
            };
            Ok((
                Query::Range { field, gte: bound("gte")?, gt: bound("gt")?, lte: bound("lte")?, lt: bound("lt")? },
                None,
                None,
            ))
        }
        "prefix" => {
            let field = as_str(obj_field(body, "field", &clause_path)?, &format!("{clause_path}.field"))?.to_string();
            let value = as_str(obj_field(body, "value", &clause_path)?, &format!("{clause_path}.value"))?.to_string();
            Ok((Query::Prefix { field, value }, None, None))
        }
        "wildcard" => {
            let field = as_str(obj_field(body, "field", &clause_path)?, &format!("{clause_path}.field"))?.to_string();
            let pattern = as_str(obj_field(body, "value", &clause_path)?, &format!("{clause_path}.value"))?.to_string();
            Ok((Query::Wildcard { field, pattern }, None, None))
        }
        "fuzzy" => {
            let field = as_str(obj_field(body, "field", &clause_path)?, &format!("{clause_path}.field"))?.to_string();
            let value = as_str(obj_field(body, "value", &clause_path)?, &format!("{clause_path}.value"))?.to_string();
            let fuzziness = body.get("fuzziness").and_then(Json::as_u64).unwrap_or(2) as u32;
            Ok((Query::Fuzzy { field, value, fuzziness }, None, None))
        }
        "bool" => parse_bool(body, &clause_path),
        "expr" => {
            let ast = obj_field(body, "ast", &clause_path)?;
            let expr = parse_expr(ast, &format!("{clause_path}.ast"))?;
            Ok((Query::MatchAll, Some(expr), None))
        }
        "wasm_udf" => {
            let udf = parse_udf_filter(body, &clause_path)?;
            Ok((Query::MatchAll, None, Some(udf)))
        }
        other => Err(DslError::new(clause_path, format!("unknown query clause \"{other}\""))),
    }
}

fn parse_bool(body: &Json, path: &str) -> Result<(Query, Option<Expr>, Option<UdfFilter>), DslError> {
    let obj = body.as_object().ok_or_else(|| DslError::new(path, "must be a JSON object"))?;
    check_known_fields(obj, &["must", "should", "filter", "must_not", "minimum_should_match"], path)?;

    let mut hoisted_expr: Option<Expr> = None;
    let mut hoisted_udf: Option<UdfFilter> = None;

    let mut parse_group = |key: &str| -> Result<Vec<Query>, DslError> {
        let Some(items) = obj.get(key) else { return Ok(Vec::new()) };
        let arr = items.as_array().ok_or_else(|| DslError::new(format!("{path}.{key}"), "must be an array"))?;
        let mut out = Vec::with_capacity(arr.len());
        for (i, item) in arr.iter().enumerate() {
            let item_path = format!("{path}.{key}[{i}]");
            let (q, expr, udf) = parse_query(item, &item_path)?;
            if let Some(e) = expr {
                hoisted_expr = Some(match hoisted_expr.take() {
                    Some(existing) => Expr::BinOp { op: BinOp::And, left: Box::new(existing), right: Box::new(e) },
                    None => e,
                });
            }
            if let Some(u) = udf {
                if hoisted_udf.is_some() {
                    return Err(DslError::new(item_path, "at most one wasm_udf filter is supported per query"));
                }
                hoisted_udf = Some(u);
            }
            if !(matches!(&q, Query::MatchAll) && (expr_like(item))) {
                out.push(q);
            }
        }
        Ok(out)
    };

    let must = parse_group("must")?;
    let should = parse_group("should")?;
    let filter = parse_group("filter")?;
    let must_not = parse_group("must_not")?;

    let minimum_should_match = match obj.get("minimum_should_match") {
        None => 0,
        Some(n) => n.as_u64().ok_or_else(|| DslError::new(format!("{path}.minimum_should_match"), "must be a non-negative integer"))? as u32,
    };

    Ok((Query::Bool { must, should, filter, must_not, minimum_should_match }, hoisted_expr, hoisted_udf))
}

/// Whether a clause JSON object is purely an `expr`/`wasm_udf` extension
/// (and so contributes nothing to the `Query` tree itself, only to the
/// hoisted fields) — used so `bool.filter: [{"expr": ...}]` doesn't leave
/// a spurious `MatchAll` clause sitting in the merged boolean tree.
fn expr_like(v: &Json) -> bool {
    v.as_object()
        .map(|o| o.len() == 1 && (o.contains_key("expr") || o.contains_key("wasm_udf")))
        .unwrap_or(false)
}

fn parse_udf_filter(body: &Json, path: &str) -> Result<UdfFilter, DslError> {
    let obj = body.as_object().ok_or_else(|| DslError::new(path, "must be a JSON object"))?;
    check_known_fields(obj, &["name", "version", "params", "on_error"], path)?;
    let name = as_str(obj_field(body, "name", path)?, &format!("{path}.name"))?.to_string();
    let version = match obj.get("version") {
        Some(v) => as_str(v, &format!("{path}.version"))?.to_string(),
        None => "latest".to_string(),
    };
    let mut params = HashMap::new();
    if let Some(p) = obj.get("params") {
        let p_obj = p.as_object().ok_or_else(|| DslError::new(format!("{path}.params"), "must be an object"))?;
        for (k, v) in p_obj {
            params.insert(k.clone(), UdfValue::from(v.clone()));
        }
    }
    let on_error = match obj.get("on_error") {
        None => OnError::NonMatch,
        Some(Json::String(s)) if s == "non_match" => OnError::NonMatch,
        Some(Json::String(s)) if s == "fail" => OnError::Fail,
        Some(_) => return Err(DslError::new(format!("{path}.on_error"), "must be \"non_match\" or \"fail\"")),
    };
    Ok(UdfFilter { name, version, params, on_error })
}

fn parse_expr(v: &Json, path: &str) -> Result<Expr, DslError> {
    let obj = v.as_object().ok_or_else(|| DslError::new(path, "must be a JSON object"))?;
    if obj.len() != 1 {
        return Err(DslError::new(path, "must have exactly one node key"));
    }
    let (kind, body) = obj.iter().next().unwrap();
    let node_path = format!("{path}.{kind}");

    match kind.as_str() {
        "const" => Ok(Expr::Const(json_to_literal(body))),
        "field" => Ok(Expr::Field(as_str(body, &node_path)?.to_string())),
        "binop" => {
            let op = binop_from_str(as_str(obj_field(body, "op", &node_path)?, &format!("{node_path}.op"))?, &format!("{node_path}.op"))?;
            let left = parse_expr(obj_field(body, "left", &node_path)?, &format!("{node_path}.left"))?;
            let right = parse_expr(obj_field(body, "right", &node_path)?, &format!("{node_path}.right"))?;
            Ok(Expr::BinOp { op, left: Box::new(left), right: Box::new(right) })
        }
        "unop" => {
            let op = unop_from_str(as_str(obj_field(body, "op", &node_path)?, &format!("{node_path}.op"))?, &format!("{node_path}.op"))?;
            let operand = parse_expr(obj_field(body, "operand", &node_path)?, &format!("{node_path}.operand"))?;
            Ok(Expr::UnOp { op, operand: Box::new(operand) })
        }
        "ternary" => {
            let cond = parse_expr(obj_field(body, "cond", &node_path)?, &format!("{node_path}.cond"))?;
            let if_true = parse_expr(obj_field(body, "if_true", &node_path)?, &format!("{node_path}.if_true"))?;
            let if_false = parse_expr(obj_field(body, "if_false", &node_path)?, &format!("{node_path}.if_false"))?;
            Ok(Expr::Ternary { cond: Box::new(cond), if_true: Box::new(if_true), if_false: Box::new(if_false) })
        }
        "call" => {
            let func = func_from_str(as_str(obj_field(body, "func", &node_path)?, &format!("{node_path}.func"))?, &format!("{node_path}.func"))?;
            let args_json = obj_field(body, "args", &node_path)?
                .as_array()
                .ok_or_else(|| DslError::new(format!("{node_path}.args"), "must be an array"))?;
            let args = args_json
                .iter()
                .enumerate()
                .map(|(i, a)| parse_expr(a, &format!("{node_path}.args[{i}]")))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::Call { func, args })
        }
        other => Err(DslError::new(node_path, format!("unknown expression node \"{other}\""))),
    }
}

fn json_to_literal(v: &Json) -> Literal {
    match v {
        Json::Null => Literal::Null,
        Json::Bool(b) => Literal::Bool(*b),
        Json::Number(n) => n.as_i64().map(Literal::Int64).unwrap_or_else(|| Literal::Float64(n.as_f64().unwrap_or(f64::NAN))),
        Json::String(s) => Literal::String(s.clone()),
        other => Literal::String(other.to_string()),
    }
}

fn binop_from_str(s: &str, path: &str) -> Result<BinOp, DslError> {
    Ok(match s {
        "add" => BinOp::Add,
        "sub" => BinOp::Sub,
        "mul" => BinOp::Mul,
        "div" => BinOp::Div,
        "eq" => BinOp::Eq,
        "ne" => BinOp::Ne,
        "lt" => BinOp::Lt,
        "le" => BinOp::Le,
        "gt" => BinOp::Gt,
        "ge" => BinOp::Ge,
        "and" => BinOp::And,
        "or" => BinOp::Or,
        other => return Err(DslError::new(path, format!("unknown binary operator \"{other}\""))),
    })
}

fn unop_from_str(s: &str, path: &str) -> Result<UnOp, DslError> {
    Ok(match s {
        "neg" => UnOp::Neg,
        "not" => UnOp::Not,
        other => return Err(DslError::new(path, format!("unknown unary operator \"{other}\""))),
    })
}

fn func_from_str(s: &str, path: &str) -> Result<Func, DslError> {
    Ok(match s {
        "abs" => Func::Abs,
        "sqrt" => Func::Sqrt,
        "min" => Func::Min,
        "max" => Func::Max,
        "sin" => Func::Sin,
        "cos" => Func::Cos,
        "tan" => Func::Tan,
        other => return Err(DslError::new(path, format!("unknown function \"{other}\""))),
    })
}

fn parse_agg(v: &Json, path: &str) -> Result<AggSpec, DslError> {
    let obj = v.as_object().ok_or_else(|| DslError::new(path, "must be a JSON object"))?;
    if obj.len() != 1 {
        return Err(DslError::new(path, "must have exactly one aggregation kind key"));
    }
    let (kind, body) = obj.iter().next().unwrap();
    let kind_path = format!("{path}.{kind}");
    let field = || -> Result<String, DslError> {
        Ok(as_str(obj_field(body, "field", &kind_path)?, &format!("{kind_path}.field"))?.to_string())
    };

    match kind.as_str() {
        "terms" => {
            let size = body.get("size").and_then(Json::as_u64).unwrap_or(10) as u32;
            let shard_size = body.get("shard_size").and_then(Json::as_u64).unwrap_or((size as u64) * 5) as u32;
            Ok(AggSpec::Terms { field: field()?, size, shard_size })
        }
        "histogram" => {
            let interval = as_f64(obj_field(body, "interval", &kind_path)?, &format!("{kind_path}.interval"))?;
            Ok(AggSpec::Histogram { field: field()?, interval })
        }
        "date_histogram" => {
            let interval_ms = obj_field(body, "interval_ms", &kind_path)?
                .as_u64()
                .ok_or_else(|| DslError::new(format!("{kind_path}.interval_ms"), "must be a non-negative integer"))?;
            Ok(AggSpec::DateHistogram { field: field()?, interval_ms })
        }
        "range" => {
            let ranges_json = obj_field(body, "ranges", &kind_path)?
                .as_array()
                .ok_or_else(|| DslError::new(format!("{kind_path}.ranges"), "must be an array"))?;
            let mut ranges = Vec::with_capacity(ranges_json.len());
            for (i, r) in ranges_json.iter().enumerate() {
                let r_path = format!("{kind_path}.ranges[{i}]");
                let from = match r.get("from") {
                    None | Some(Json::Null) => None,
                    Some(n) => Some(as_f64(n, &format!("{r_path}.from"))?),
                };
                let to = match r.get("to") {
                    None | Some(Json::Null) => None,
                    Some(n) => Some(as_f64(n, &format!("{r_path}.to"))?),
                };
                ranges.push((from, to));
            }
            Ok(AggSpec::Range { field: field()?, ranges })
        }
        "filters" => {
            let filters_obj = obj_field(body, "filters", &kind_path)?
                .as_object()
                .ok_or_else(|| DslError::new(format!("{kind_path}.filters"), "must be an object"))?;
            let mut filters = Vec::with_capacity(filters_obj.len());
            for (name, q) in filters_obj {
                let (query, expr, udf) = parse_query(q, &format!("{kind_path}.filters.{name}"))?;
                if expr.is_some() || udf.is_some() {
                    return Err(DslError::new(format!("{kind_path}.filters.{name}"), "expr/wasm_udf clauses aren't supported inside a filters aggregation"));
                }
                filters.push((name.clone(), query));
            }
            Ok(AggSpec::Filters { filters })
        }
        "stats" => Ok(AggSpec::Stats { field: field()? }),
        "extended_stats" => Ok(AggSpec::ExtendedStats { field: field()? }),
        "avg" => Ok(AggSpec::Avg { field: field()? }),
        "sum" => Ok(AggSpec::Sum { field: field()? }),
        "min" => Ok(AggSpec::Min { field: field()? }),
        "max" => Ok(AggSpec::Max { field: field()? }),
        "value_count" => Ok(AggSpec::ValueCount { field: field()? }),
        "cardinality" => Ok(AggSpec::Cardinality { field: field()? }),
        "percentiles" => {
            let percents = match body.get("percents") {
                None => vec![50.0, 95.0, 99.0],
                Some(p) => p
                    .as_array()
                    .ok_or_else(|| DslError::new(format!("{kind_path}.percents"), "must be an array"))?
                    .iter()
                    .map(|n| as_f64(n, &format!("{kind_path}.percents")))
                    .collect::<Result<Vec<_>, _>>()?,
            };
            Ok(AggSpec::Percentiles { field: field()?, percents })
        }
        other => Err(DslError::new(kind_path, format!("unknown aggregation kind \"{other}\""))),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rejects_unknown_top_level_field() {
        let err = parse_search(&json!({"bogus": 1})).unwrap_err();
        assert_eq!(err.path, "$.bogus");
    }

    #[test]
    fn test_term_query_parses() {
        let parsed = parse_search(&json!({"query": {"term": {"field": "status", "value": "active"}}})).unwrap();
        assert_eq!(parsed.query, Query::Term { field: "status".into(), value: json!("active") });
    }

    #[test]
    fn test_bool_range_filter_matches_s2() {
        let body = json!({
            "query": {
                "bool": {
                    "filter": [{"range": {"field": "price", "gte": 20.0, "lte": 50.0}}]
                }
            }
        });
        let parsed = parse_search(&body).unwrap();
        match parsed.query {
            Query::Bool { filter, .. } => {
                assert_eq!(filter.len(), 1);
                assert_eq!(filter[0], Query::Range { field: "price".into(), gte: Some(20.0), gt: None, lte: Some(50.0), lt: None });
            }
            other => panic!("expected bool query, got {other:?}"),
        }
    }

    #[test]
    fn test_expr_filter_is_hoisted_and_parsed() {
        let body = json!({
            "query": {
                "bool": {
                    "filter": [{"expr": {"ast": {"binop": {"op": "ge", "left": {"field": "price"}, "right": {"const": 20}}}}}]
                }
            }
        });
        let parsed = parse_search(&body).unwrap();
        assert!(parsed.filter_expr.is_some());
        assert!(matches!(parsed.query, Query::Bool { .. }));
    }

    #[test]
    fn test_second_wasm_udf_filter_rejected() {
        let body = json!({
            "query": {
                "bool": {
                    "filter": [
                        {"wasm_udf": {"name": "price_in_range", "params": {"min": 20, "max": 50}}},
                        {"wasm_udf": {"name": "other", "params": {}}}
                    ]
                }
            }
        });
        assert!(parse_search(&body).is_err());
    }

    #[test]
    fn test_terms_agg_defaults_shard_size() {
        let spec = parse_agg(&json!({"terms": {"field": "category", "size": 5}}), "$").unwrap();
        assert_eq!(spec, AggSpec::Terms { field: "category".into(), size: 5, shard_size: 25 });
    }
}
