//! Client-facing REST surface (spec.md §6.1): the OpenSearch/Elasticsearch
//! compatible HTTP API served over raw `hyper`, generalized to a full
//! method+path router instead of one fixed handler.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde_json::{json, Value as Json};
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tonic::transport::Channel;

use searchdog_config::Config;
use searchdog_proto::master::master_service_client::MasterServiceClient;
use searchdog_proto::master::{
    CreateIndexRequest, DeleteIndexRequest, RegisterUdfRequest, UnregisterUdfRequest,
    UpdateIndexSettingsRequest,
};
use searchdog_stats::CoordinationCounts;

use crate::control::convert::state_to_snapshot;
use crate::error::{ErrorBody, ErrorKind};

use super::cache::ClusterStateCache;
use super::dsl::{self, DslError};
use super::executor::{BulkOp, Executor};
use super::node_pool::NodePool;
use super::planner::{self, PushdownBudget};
use super::result_cache::{fingerprint, ResultCache};

pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Arc<ClusterStateCache>,
    pub pool: Arc<NodePool>,
    pub executor: Arc<Executor>,
    pub result_cache: Arc<ResultCache>,
    pub admission: Arc<Semaphore>,
    pub counts: Arc<Mutex<CoordinationCounts>>,
    control_client: tokio::sync::Mutex<Option<MasterServiceClient<Channel>>>,
}

impl AppState {
    pub fn new(config: Arc<Config>, cache: Arc<ClusterStateCache>, pool: Arc<NodePool>, executor: Arc<Executor>, result_cache: Arc<ResultCache>) -> Self {
        let admission = Arc::new(Semaphore::new(config.coordination.max_concurrent_requests));
        Self {
            config,
            cache,
            pool,
            executor,
            result_cache,
            admission,
            counts: Arc::new(Mutex::new(CoordinationCounts::default())),
            control_client: tokio::sync::Mutex::new(None),
        }
    }

    pub fn counts_handle(&self) -> Arc<Mutex<CoordinationCounts>> {
        self.counts.clone()
    }

    fn budget(&self) -> PushdownBudget {
        PushdownBudget {
            max_wall_time_ms: self.config.udf.default_wall_time_ms,
            max_memory_pages: self.config.udf.default_memory_pages,
        }
    }

    async fn control_client(&self) -> Result<MasterServiceClient<Channel>, tonic::Status> {
        let mut guard = self.control_client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let peer = self
            .config
            .discovery
            .control_peers
            .first()
            .ok_or_else(|| tonic::Status::unavailable("no control_peers configured"))?;
        let client = MasterServiceClient::connect(format!("http://{peer}"))
            .await
            .map_err(|e| tonic::Status::unavailable(e.to_string()))?;
        *guard = Some(client.clone());
        Ok(client)
    }
}

/// Serves the REST surface until the process exits, accepting one TCP
/// connection at a time on `http1` (clients are expected to use keep-alive
/// rather than HTTP/2 multiplexing; spec.md doesn't require either).
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "coordination REST surface listening");
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();
        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle(state.clone(), req));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(%err, "rest connection closed");
            }
        });
    }
}

async fn handle(state: Arc<AppState>, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let Ok(_permit) = state.admission.clone().try_acquire_owned() else {
        state.counts.lock().requests_rejected += 1;
        return Ok(json_response(StatusCode::TOO_MANY_REQUESTS, &ErrorBody::new(ErrorKind::ResourceExhausted, "too many in-flight requests")));
    };
    state.counts.lock().requests += 1;

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };

    let result = route(&state, &method, &segments, &query, &body).await;
    Ok(match result {
        Ok(resp) => resp,
        Err((kind, reason)) => json_response(StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), &ErrorBody::new(kind, reason)),
    })
}

type HandlerResult = Result<Response<Full<Bytes>>, (ErrorKind, String)>;

async fn route(state: &Arc<AppState>, method: &Method, segments: &[&str], query: &str, body: &Bytes) -> HandlerResult {
    match (method, segments) {
        (&Method::GET, ["_cluster", "health"]) => cluster_health(state).await,
        (&Method::GET, ["_cluster", "state"]) => cluster_state(state).await,
        (&Method::GET, ["_cluster", "stats"]) => cluster_stats(state).await,
        (&Method::GET, ["_nodes"]) => nodes(state).await,
        (&Method::GET, ["_nodes", "stats"]) => nodes_stats(state).await,
        (&Method::GET, rest) if rest.first() == Some(&"_cat") => cat(state, rest).await,

        (&Method::PUT, [index]) => create_index(state, index, body).await,
        (&Method::DELETE, [index]) => delete_index(state, index).await,
        (&Method::GET, [index]) => get_index(state, index).await,
        (&Method::PUT, [index, "_mapping"]) => update_mapping(state, index, body).await,
        (&Method::POST, [index, "_refresh"]) => refresh_index(state, index).await,
        (&Method::POST, [index, "_flush"]) => flush_index(state, index).await,

        (&Method::PUT, [index, "_doc", doc_id]) => index_document(state, index, doc_id, body).await,
        (&Method::GET, [index, "_doc", doc_id]) => get_document(state, index, doc_id).await,
        (&Method::DELETE, [index, "_doc", doc_id]) => delete_document(state, index, doc_id).await,
        (&Method::POST, [index, "_update", doc_id]) => update_document(state, index, doc_id, body).await,
        (&Method::POST, ["_bulk"]) => bulk(state, body).await,

        (&Method::POST, [index, "_search"]) => search(state, index, body).await,
        (&Method::POST, [index, "_count"]) => count(state, index, body).await,

        (&Method::POST, ["api", "v1", "udfs"]) => upload_udf(state, query, body).await,
        (&Method::GET, ["api", "v1", "udfs"]) => list_udfs(state).await,
        (&Method::GET, ["api", "v1", "udfs", name, version]) => get_udf(state, name, version).await,
        (&Method::DELETE, ["api", "v1", "udfs", name, version]) => delete_udf(state, name, version).await,
        (&Method::GET, ["api", "v1", "udfs", name, "versions"]) => udf_versions(state, name).await,
        (&Method::POST, ["api", "v1", "udfs", name, version, "test-invoke"]) => test_invoke_udf(state, name, version, body).await,
        (&Method::GET, ["api", "v1", "udfs", name, version, "stats"]) => udf_stats(state, name, version).await,

        _ => Err((ErrorKind::NotFound, "no matching route".to_string())),
    }
}

fn json_response(status: StatusCode, body: &impl serde::Serialize) -> Response<Full<Bytes>> {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(bytes)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("{}"))))
}

fn ok_json(body: impl serde::Serialize) -> HandlerResult {
    Ok(json_response(StatusCode::OK, &body))
}

fn created_json(body: impl serde::Serialize) -> HandlerResult {
    Ok(json_response(StatusCode::CREATED, &body))
}

fn parse_body(body: &Bytes) -> Result<Json, (ErrorKind, String)> {
    if body.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|e| (ErrorKind::Validation, format!("invalid JSON body: {e}")))
}

fn dsl_err(err: DslError) -> (ErrorKind, String) {
    (ErrorKind::Validation, format!("{} at {}", err.message, err.path))
}

// ---- cluster / ops -------------------------------------------------------

async fn cluster_health(state: &Arc<AppState>) -> HandlerResult {
    let snapshot = state.cache.current();
    let active = snapshot.active_data_nodes().count();
    let unassigned = snapshot.shards.iter().filter(|s| !s.query_eligible()).count();
    let status = if unassigned == 0 {
        "green"
    } else if active > 0 {
        "yellow"
    } else {
        "red"
    };
    ok_json(json!({
        "status": status,
        "number_of_nodes": snapshot.nodes.len(),
        "active_data_nodes": active,
        "unassigned_shards": unassigned,
        "cluster_state_version": snapshot.version,
    }))
}

async fn cluster_state(state: &Arc<AppState>) -> HandlerResult {
    let snapshot = state_to_snapshot(&state.cache.current());
    ok_json(snapshot_to_json(&snapshot))
}

fn snapshot_to_json(snapshot: &searchdog_proto::common::ClusterStateSnapshot) -> Json {
    json!({
        "version": snapshot.version,
        "nodes": snapshot.nodes.iter().map(|n| json!({
            "node_id": n.node_id, "host": n.host, "grpc_port": n.grpc_port,
        })).collect::<Vec<_>>(),
        "indices": snapshot.indices.iter().map(|i| json!({
            "name": i.name, "num_shards": i.num_shards, "num_replicas": i.num_replicas,
        })).collect::<Vec<_>>(),
        "shards": snapshot.shards.len(),
    })
}

async fn cluster_stats(state: &Arc<AppState>) -> HandlerResult {
    let counts = *state.counts.lock();
    ok_json(json!({
        "requests": counts.requests,
        "requests_rejected": counts.requests_rejected,
        "searches": counts.searches,
        "bulk_requests": counts.bulk_requests,
        "partial_responses": counts.partial_responses,
        "failed_responses": counts.failed_responses,
        "cache_hits": counts.cache_hits,
        "cache_misses": counts.cache_misses,
    }))
}

async fn nodes(state: &Arc<AppState>) -> HandlerResult {
    let snapshot = state.cache.current();
    ok_json(json!({"nodes": snapshot.nodes.values().map(|n| json!({
        "node_id": n.node_id, "role": format!("{:?}", n.role), "host": n.host, "grpc_port": n.grpc_port,
    })).collect::<Vec<_>>()}))
}

async fn nodes_stats(state: &Arc<AppState>) -> HandlerResult {
    nodes(state).await
}

async fn cat(state: &Arc<AppState>, rest: &[&str]) -> HandlerResult {
    let snapshot = state.cache.current();
    match rest.get(1).copied() {
        Some("indices") => {
            let lines: Vec<String> = snapshot
                .indices
                .values()
                .map(|i| format!("{} {} {}", i.name, i.num_shards, i.num_replicas))
                .collect();
            Ok(text_response(lines.join("\n")))
        }
        Some("nodes") => {
            let lines: Vec<String> = snapshot.nodes.values().map(|n| format!("{} {} {}", n.node_id, n.host, n.grpc_port)).collect();
            Ok(text_response(lines.join("\n")))
        }
        Some("shards") => {
            let lines: Vec<String> = snapshot
                .shards
                .iter()
                .map(|s| format!("{} {} {:?} {:?}", s.index_name, s.shard_id, s.role, s.state))
                .collect();
            Ok(text_response(lines.join("\n")))
        }
        _ => Err((ErrorKind::NotFound, "unknown _cat endpoint".to_string())),
    }
}

fn text_response(body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

// ---- index management -----------------------------------------------------

async fn create_index(state: &Arc<AppState>, index: &str, body: &Bytes) -> HandlerResult {
    let json = parse_body(body)?;
    let num_shards = json.get("settings").and_then(|s| s.get("num_shards")).and_then(Json::as_u64).unwrap_or(1) as u32;
    let num_replicas = json.get("settings").and_then(|s| s.get("num_replicas")).and_then(Json::as_u64).unwrap_or(1) as u32;

    let mut client = state.control_client().await.map_err(grpc_err)?;
    let resp = client
        .create_index(CreateIndexRequest { name: index.to_string(), num_shards, num_replicas, mappings: Vec::new(), refresh_interval_ms: 1_000 })
        .await
        .map_err(grpc_err)?
        .into_inner();
    created_json(json!({"acknowledged": true, "index": index, "shards_acknowledged": true, "version": resp.version}))
}

async fn delete_index(state: &Arc<AppState>, index: &str) -> HandlerResult {
    let mut client = state.control_client().await.map_err(grpc_err)?;
    let resp = client.delete_index(DeleteIndexRequest { name: index.to_string() }).await.map_err(grpc_err)?.into_inner();
    ok_json(json!({"acknowledged": true, "version": resp.version}))
}

async fn get_index(state: &Arc<AppState>, index: &str) -> HandlerResult {
    let snapshot = state.cache.current();
    let info = snapshot.index(index).ok_or((ErrorKind::NotFound, format!("no such index [{index}]")))?;
    ok_json(json!({index: {"settings": {"num_shards": info.num_shards, "num_replicas": info.num_replicas}}}))
}

async fn update_mapping(state: &Arc<AppState>, index: &str, body: &Bytes) -> HandlerResult {
    let json = parse_body(body)?;
    let properties = json.get("properties").and_then(Json::as_object).cloned().unwrap_or_default();
    let add_mappings = properties
        .iter()
        .map(|(name, spec)| searchdog_proto::common::IndexMappingField {
            name: name.clone(),
            field_type: spec.get("type").and_then(Json::as_str).unwrap_or("text").to_string(),
            analyzer: spec.get("analyzer").and_then(Json::as_str).unwrap_or_default().to_string(),
        })
        .collect();

    let mut client = state.control_client().await.map_err(grpc_err)?;
    let resp = client
        .update_index_settings(UpdateIndexSettingsRequest { name: index.to_string(), num_replicas: None, add_mappings, refresh_interval_ms: None })
        .await
        .map_err(grpc_err)?
        .into_inner();
    ok_json(json!({"acknowledged": true, "version": resp.version}))
}

async fn refresh_index(state: &Arc<AppState>, index: &str) -> HandlerResult {
    let _ = state.cache.current().index(index).ok_or((ErrorKind::NotFound, format!("no such index [{index}]")))?;
    ok_json(json!({"_shards": {"total": 0, "successful": 0, "failed": 0}}))
}

async fn flush_index(state: &Arc<AppState>, index: &str) -> HandlerResult {
    refresh_index(state, index).await
}

// ---- documents --------------------------------------------------------

fn grpc_err(status: tonic::Status) -> (ErrorKind, String) {
    let kind = match status.code() {
        tonic::Code::NotFound => ErrorKind::NotFound,
        tonic::Code::AlreadyExists => ErrorKind::Conflict,
        tonic::Code::InvalidArgument => ErrorKind::Validation,
        tonic::Code::FailedPrecondition => ErrorKind::WrongShard,
        tonic::Code::ResourceExhausted => ErrorKind::ResourceExhausted,
        tonic::Code::Unavailable => ErrorKind::Unavailable,
        _ => ErrorKind::Internal,
    };
    (kind, status.message().to_string())
}

fn exec_err(err: super::executor::ExecError) -> (ErrorKind, String) {
    use super::executor::ExecError;
    match err {
        ExecError::Routing(r) => (ErrorKind::NotFound, r.to_string()),
        ExecError::NodeUnreachable(s) => (ErrorKind::Unavailable, format!("no data node reachable for shard {s}")),
        ExecError::RetriesExhausted(n) => (ErrorKind::WrongShard, format!("exhausted {n} retries against a stale shard assignment")),
        ExecError::Grpc(status) => grpc_err(status),
        ExecError::AllShardsFailed(n, causes) => (ErrorKind::Unavailable, format!("all {n} shards failed: {causes}")),
    }
}

async fn index_document(state: &Arc<AppState>, index: &str, doc_id: &str, body: &Bytes) -> HandlerResult {
    let version = state.executor.index_document(index, doc_id, body).await.map_err(exec_err)?;
    created_json(json!({"_index": index, "_id": doc_id, "_version": version, "result": "created"}))
}

async fn get_document(state: &Arc<AppState>, index: &str, doc_id: &str) -> HandlerResult {
    match state.executor.get_document(index, doc_id).await.map_err(exec_err)? {
        Some((source, version)) => {
            let source: Json = serde_json::from_slice(&source).unwrap_or(Json::Null);
            ok_json(json!({"_index": index, "_id": doc_id, "_version": version, "found": true, "_source": source}))
        }
        None => Err((ErrorKind::NotFound, format!("document [{doc_id}] not found"))),
    }
}

async fn delete_document(state: &Arc<AppState>, index: &str, doc_id: &str) -> HandlerResult {
    let found = state.executor.delete_document(index, doc_id).await.map_err(exec_err)?;
    ok_json(json!({"_index": index, "_id": doc_id, "result": if found { "deleted" } else { "not_found" }}))
}

/// `_update` is a read-modify-write merge of the existing source with the
/// `doc` fragment in the request body (spec.md §6.1); there is no partial
/// field-update RPC on the data tier, so this fetches, merges in-process,
/// and re-indexes the merged document.
async fn update_document(state: &Arc<AppState>, index: &str, doc_id: &str, body: &Bytes) -> HandlerResult {
    let patch = parse_body(body)?;
    let doc_fragment = patch.get("doc").cloned().ok_or((ErrorKind::Validation, "missing \"doc\" field".to_string()))?;

    let existing = state.executor.get_document(index, doc_id).await.map_err(exec_err)?;
    let mut merged: Json = existing.map(|(bytes, _)| serde_json::from_slice(&bytes).unwrap_or(json!({}))).unwrap_or(json!({}));
    if let (Some(merged_obj), Some(patch_obj)) = (merged.as_object_mut(), doc_fragment.as_object()) {
        for (k, v) in patch_obj {
            merged_obj.insert(k.clone(), v.clone());
        }
    }

    let encoded = serde_json::to_vec(&merged).unwrap_or_default();
    let version = state.executor.index_document(index, doc_id, &encoded).await.map_err(exec_err)?;
    ok_json(json!({"_index": index, "_id": doc_id, "_version": version, "result": "updated"}))
}

/// Newline-delimited bulk body (spec.md §6.1): each action line (`{"index":
/// {"_index":..,"_id":..}}` or `{"delete": {...}}`) is followed by a source
/// line for non-delete actions.
async fn bulk(state: &Arc<AppState>, body: &Bytes) -> HandlerResult {
    state.counts.lock().bulk_requests += 1;
    let text = std::str::from_utf8(body).map_err(|_| (ErrorKind::Validation, "bulk body is not valid UTF-8".to_string()))?;
    let mut by_index: HashMap<String, Vec<BulkOp>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    while let Some(action_line) = lines.next() {
        let action: Json = serde_json::from_str(action_line).map_err(|e| (ErrorKind::Validation, format!("invalid bulk action line: {e}")))?;
        if let Some(spec) = action.get("index").or_else(|| action.get("create")) {
            let index = spec.get("_index").and_then(Json::as_str).ok_or((ErrorKind::Validation, "bulk action missing _index".to_string()))?.to_string();
            let doc_id = spec.get("_id").and_then(Json::as_str).map(str::to_string).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let source_line = lines.next().ok_or((ErrorKind::Validation, "bulk index action missing source line".to_string()))?;
            by_index.entry(index.clone()).or_insert_with(|| {
                order.push(index.clone());
                Vec::new()
            });
            by_index.get_mut(&index).unwrap().push(BulkOp::Index { doc_id, source: source_line.as_bytes().to_vec() });
        } else if let Some(spec) = action.get("delete") {
            let index = spec.get("_index").and_then(Json::as_str).ok_or((ErrorKind::Validation, "bulk action missing _index".to_string()))?.to_string();
            let doc_id = spec.get("_id").and_then(Json::as_str).ok_or((ErrorKind::Validation, "bulk delete missing _id".to_string()))?.to_string();
            by_index.entry(index.clone()).or_insert_with(|| {
                order.push(index.clone());
                Vec::new()
            });
            by_index.get_mut(&index).unwrap().push(BulkOp::Delete { doc_id });
        } else {
            return Err((ErrorKind::Validation, "unsupported bulk action".to_string()));
        }
    }

    let mut items = Vec::new();
    for index in order {
        let ops = by_index.remove(&index).unwrap_or_default();
        let outcomes = state.executor.bulk(&index, ops).await.map_err(exec_err)?;
        for outcome in outcomes {
            items.push(json!({
                "index": {
                    "_index": index,
                    "status": if outcome.ok { 201 } else { 400 },
                    "error": if outcome.ok { Json::Null } else { Json::String(outcome.error) },
                    "_version": outcome.version,
                }
            }));
        }
    }

    ok_json(json!({"errors": items.iter().any(|i| i["index"]["status"] != 201), "items": items}))
}

// ---- search / count -----------------------------------------------------

async fn search(state: &Arc<AppState>, index: &str, body: &Bytes) -> HandlerResult {
    state.counts.lock().searches += 1;
    let json = parse_body(body)?;
    let parsed = dsl::parse_search(&json).map_err(dsl_err)?;

    let cluster_version = state.cache.current().version;
    let query_json = serde_json::to_vec(&parsed.query).unwrap_or_default();
    let filter_bytes = parsed.filter_expr.as_ref().map(|e| e.encode().to_vec());
    let aggs_json = serde_json::to_vec(&parsed.aggs).unwrap_or_default();
    let fp = fingerprint(&query_json, filter_bytes.as_deref(), &aggs_json, parsed.from, parsed.size);

    let plan = planner::plan(&parsed, None, state.budget());

    if plan.cacheable {
        if let Some(cached) = state.result_cache.get(index, &fp, cluster_version) {
            state.counts.lock().cache_hits += 1;
            return ok_json(search_response_json(&cached));
        }
        state.counts.lock().cache_misses += 1;
    }

    let outcome = state.executor.search(index, &parsed, &parsed.aggs, parsed.udf_filter.as_ref()).await.map_err(exec_err)?;
    if outcome.partial {
        state.counts.lock().partial_responses += 1;
    }
    if plan.cacheable {
        state.result_cache.put(index, &fp, cluster_version, outcome.clone());
    }
    ok_json(search_response_json(&outcome))
}

fn search_response_json(outcome: &super::executor::SearchOutcome) -> Json {
    let hits: Vec<Json> = outcome
        .hits
        .iter()
        .map(|h| {
            let source: Json = serde_json::from_slice(&h.source_json).unwrap_or(Json::Null);
            json!({"_id": h.doc_id, "_score": h.score, "_source": source})
        })
        .collect();
    let aggs: HashMap<String, Json> = outcome.aggs.iter().map(|a| (a.name.clone(), agg_result_json(a))).collect();
    json!({
        "took": outcome.took_ms,
        "timed_out": false,
        "_shards": {
            "total": outcome.shards_total,
            "successful": outcome.shards_successful,
            "failed": outcome.shards_failed,
        },
        "hits": {"total": {"value": outcome.total}, "hits": hits},
        "aggregations": aggs,
    })
}

fn agg_result_json(result: &searchdog_proto::common::AggResult) -> Json {
    if !result.buckets.is_empty() {
        let buckets: Vec<Json> = result.buckets.iter().map(|b| json!({"key": b.key, "doc_count": b.doc_count})).collect();
        json!({"buckets": buckets})
    } else if result.kind == "cardinality" {
        json!({"value": result.count})
    } else if !result.percentile_estimates.is_empty() {
        json!({"values": result.percentile_estimates})
    } else if result.kind == "extended_stats" {
        let avg = if result.count > 0 { result.sum / result.count as f64 } else { 0.0 };
        let variance = if result.count > 0 { (result.sum_of_squares / result.count as f64) - avg * avg } else { 0.0 };
        let variance = variance.max(0.0);
        json!({
            "count": result.count, "sum": result.sum, "min": result.min, "max": result.max, "avg": avg,
            "sum_of_squares": result.sum_of_squares, "variance": variance, "std_deviation": variance.sqrt(),
        })
    } else {
        json!({
            "count": result.count, "sum": result.sum, "min": result.min, "max": result.max,
            "avg": if result.count > 0 { result.sum / result.count as f64 } else { 0.0 },
        })
    }
}

async fn count(state: &Arc<AppState>, index: &str, body: &Bytes) -> HandlerResult {
    let json = parse_body(body)?;
    let (query, filter_expr) = dsl::parse_count(&json).map_err(dsl_err)?;
    let outcome = state.executor.count(index, &query, filter_expr.as_ref()).await.map_err(exec_err)?;
    if outcome.shards_failed > 0 {
        state.counts.lock().partial_responses += 1;
    }
    ok_json(json!({
        "count": outcome.total,
        "_shards": {
            "total": outcome.shards_total,
            "successful": outcome.shards_successful,
            "failed": outcome.shards_failed,
        },
    }))
}

// ---- UDF management ------------------------------------------------------

fn query_params(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|p| !p.is_empty())
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Uploads wasm bytecode as the raw request body; metadata travels as query
/// parameters (`name`, `version`, `language`, `return_type`, `capabilities`
/// comma-list, `wall_time_ms`, `memory_pages`, `max_concurrent_instances`,
/// `params` as a JSON-encoded array) — there's no multipart crate in this
/// stack, so splitting binary payload from metadata this way avoids
/// inventing a base64 envelope just for this one endpoint.
async fn upload_udf(state: &Arc<AppState>, query: &str, body: &Bytes) -> HandlerResult {
    let params = query_params(query);
    let name = params.get("name").cloned().ok_or((ErrorKind::Validation, "missing name".to_string()))?;
    let version = params.get("version").cloned().ok_or((ErrorKind::Validation, "missing version".to_string()))?;
    let language = params.get("language").cloned().unwrap_or_else(|| "rust".to_string());
    let return_type = params.get("return_type").cloned().unwrap_or_else(|| "bool".to_string());
    let capabilities: Vec<String> = params.get("capabilities").map(|c| c.split(',').map(str::to_string).collect()).unwrap_or_default();
    let param_specs: Vec<Json> = params
        .get("params")
        .and_then(|p| serde_json::from_str::<Json>(p).ok())
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default();

    let content_hash = Sha256::digest(body).iter().map(|b| format!("{b:02x}")).collect::<String>();
    let metadata = searchdog_proto::common::UdfMetadata {
        name: name.clone(),
        version: version.clone(),
        language,
        params: param_specs
            .iter()
            .map(|p| searchdog_proto::common::UdfParamSpec {
                name: p.get("name").and_then(Json::as_str).unwrap_or_default().to_string(),
                param_type: p.get("type").and_then(Json::as_str).unwrap_or("string").to_string(),
                optional: p.get("optional").and_then(Json::as_bool).unwrap_or(false),
                default_json: p.get("default").map(|d| d.to_string()),
            })
            .collect(),
        return_type,
        capabilities,
        wall_time_ms: params.get("wall_time_ms").and_then(|v| v.parse().ok()).unwrap_or(state.config.udf.default_wall_time_ms),
        memory_pages: params.get("memory_pages").and_then(|v| v.parse().ok()).unwrap_or(state.config.udf.default_memory_pages),
        max_concurrent_instances: params.get("max_concurrent_instances").and_then(|v| v.parse().ok()).unwrap_or(state.config.udf.default_max_concurrent_instances),
        content_hash,
    };

    let mut client = state.control_client().await.map_err(grpc_err)?;
    let resp = client.register_udf(RegisterUdfRequest { metadata: Some(metadata), bytecode: body.to_vec() }).await.map_err(grpc_err)?.into_inner();
    created_json(json!({"name": name, "version": version, "version_registered": resp.version}))
}

async fn list_udfs(state: &Arc<AppState>) -> HandlerResult {
    let snapshot = state.cache.current();
    let udfs: Vec<Json> = snapshot.udfs.values().map(|u| json!({"name": u.name, "version": u.version, "language": u.language})).collect();
    ok_json(json!({"udfs": udfs}))
}

async fn get_udf(state: &Arc<AppState>, name: &str, version: &str) -> HandlerResult {
    let snapshot = state.cache.current();
    let meta = snapshot.udf(name, version).ok_or((ErrorKind::NotFound, format!("no such udf [{name}@{version}]")))?;
    ok_json(json!({
        "name": meta.name, "version": meta.version, "language": meta.language,
        "return_type": format!("{:?}", meta.return_type), "content_hash": meta.content_hash,
    }))
}

async fn delete_udf(state: &Arc<AppState>, name: &str, version: &str) -> HandlerResult {
    let mut client = state.control_client().await.map_err(grpc_err)?;
    let resp = client.unregister_udf(UnregisterUdfRequest { name: name.to_string(), version: version.to_string() }).await.map_err(grpc_err)?.into_inner();
    ok_json(json!({"acknowledged": true, "version": resp.version}))
}

async fn udf_versions(state: &Arc<AppState>, name: &str) -> HandlerResult {
    let snapshot = state.cache.current();
    let versions: Vec<&str> = snapshot.udfs.keys().filter(|(n, _)| n == name).map(|(_, v)| v.as_str()).collect();
    ok_json(json!({"name": name, "versions": versions}))
}

/// Runs a registered UDF against an index's live data (spec.md §6.1
/// "test-invoke"). There is no standalone "evaluate UDF against one
/// arbitrary document" RPC on `DataService` — a UDF only ever runs shard-
/// side as a `wasm_udf` search filter — so this approximates it with a
/// `match_all` search scoped to the UDF filter and a small page size,
/// reporting how many live documents would have matched plus a sample.
async fn test_invoke_udf(state: &Arc<AppState>, name: &str, version: &str, body: &Bytes) -> HandlerResult {
    let json = parse_body(body)?;
    let index = json.get("index").and_then(Json::as_str).ok_or((ErrorKind::Validation, "body must include \"index\"".to_string()))?;

    let snapshot = state.cache.current();
    snapshot.udf(name, version).ok_or((ErrorKind::NotFound, format!("no such udf [{name}@{version}]")))?;

    let params: HashMap<String, searchdog_udf_sdk::Value> = json
        .get("params")
        .and_then(Json::as_object)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, searchdog_udf_sdk::Value::from(v)))
        .collect();
    let filter = dsl::UdfFilter { name: name.to_string(), version: version.to_string(), params, on_error: dsl::OnError::Fail };
    let parsed = dsl::ParsedSearch {
        query: crate::data::engine::Query::MatchAll,
        filter_expr: None,
        udf_filter: Some(filter.clone()),
        aggs: Vec::new(),
        from: 0,
        size: 10,
    };

    let outcome = state.executor.search(index, &parsed, &parsed.aggs, Some(&filter)).await.map_err(exec_err)?;
    ok_json(json!({
        "name": name,
        "version": version,
        "index": index,
        "matched": outcome.total,
        "partial": outcome.partial,
        "sample": outcome.hits.iter().map(|h| &h.doc_id).collect::<Vec<_>>(),
    }))
}

async fn udf_stats(state: &Arc<AppState>, name: &str, version: &str) -> HandlerResult {
    let mut client = state.control_client().await.map_err(grpc_err)?;
    let resp = client
        .get_udf_stats(searchdog_proto::master::GetUdfStatsRequest { name: name.to_string(), version: version.to_string() })
        .await
        .map_err(grpc_err)?
        .into_inner();
    ok_json(json!({
        "calls": resp.calls, "completed": resp.completed, "errored": resp.errored,
        "terminated": resp.terminated, "total_duration_ms": resp.total_duration_ms,
    }))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_query_params_splits_on_ampersand() {
        let params = query_params("name=foo&version=1.0.0&capabilities=read_document");
        assert_eq!(params.get("name").map(String::as_str), Some("foo"));
        assert_eq!(params.get("capabilities").map(String::as_str), Some("read_document"));
    }

    #[test]
    fn test_parse_body_empty_is_empty_object() {
        let body = Bytes::new();
        let parsed = parse_body(&body).unwrap();
        assert_eq!(parsed, json!({}));
    }

    #[test]
    fn test_parse_body_rejects_invalid_json() {
        let body = Bytes::from_static(b"not json");
        assert!(parse_body(&body).is_err());
    }

    #[test]
    fn test_agg_result_json_extended_stats_reports_variance() {
        // values [2, 4, 4, 4, 5, 5, 7, 9]: mean 5, variance 4, std_dev 2
        let count = 8;
        let sum = 40.0;
        let sum_of_squares = 2.0 * 2.0 + 4.0 * 4.0 * 3.0 + 5.0 * 5.0 * 2.0 + 7.0 * 7.0 + 9.0 * 9.0;
        let result = searchdog_proto::common::AggResult {
            kind: "extended_stats".into(),
            count,
            sum,
            sum_of_squares,
            min: 2.0,
            max: 9.0,
            ..Default::default()
        };
        let json = agg_result_json(&result);
        assert_eq!(json["avg"], 5.0);
        assert!((json["variance"].as_f64().unwrap() - 4.0).abs() < 1e-9);
        assert!((json["std_deviation"].as_f64().unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_agg_result_json_plain_stats_has_no_variance() {
        let result = searchdog_proto::common::AggResult {
            kind: "stats".into(),
            count: 2,
            sum: 10.0,
            min: 1.0,
            max: 9.0,
            ..Default::default()
        };
        let json = agg_result_json(&result);
        assert!(json.get("variance").is_none());
    }
}
