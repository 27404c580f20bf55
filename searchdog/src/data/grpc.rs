//! `DataService` gRPC server (spec.md §4.3 "Public operations", §6.2): the
//! per-shard document and query surface every data node exposes. Mirrors
//! `control::service`'s shape (tonic trait impl delegating to a plain Rust
//! core) but the core here is per-shard [`super::engine::IndexEngine`]
//! instances rather than a single consensus state machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tonic::{Request, Response, Status};

use super::engine::{Document, EngineError, Predicate, Query};
use super::shard::{ShardEntry, ShardManager};
use super::translate;
use crate::udf::expr::{eval_bool, FieldSource};
use crate::udf::sandbox::{JsonDocument, UdfRuntime};
use searchdog_config::udf::ErrorPolicy;
use searchdog_proto::data::data_service_server::DataService;
use searchdog_proto::data::*;
use searchdog_proto::expr_wire::Expr;
use searchdog_udf_sdk::Value as UdfValue;

pub struct DataServiceImpl {
    shards: Arc<ShardManager>,
    udf_runtime: Arc<UdfRuntime>,
    node_id: String,
    started: Instant,
}

impl DataServiceImpl {
    pub fn new(shards: Arc<ShardManager>, udf_runtime: Arc<UdfRuntime>, node_id: String) -> Self {
        Self { shards, udf_runtime, node_id, started: Instant::now() }
    }

    fn get_shard(&self, shard: &ShardRef) -> Result<Arc<ShardEntry>, Status> {
        self.shards
            .get(&shard.index_name, shard.shard_id)
            .ok_or_else(|| Status::failed_precondition(format!("shard {}/{} not present on this node", shard.index_name, shard.shard_id)))
    }

    fn build_predicate(
        &self,
        filter_expression: Option<Vec<u8>>,
        udf_request: Option<searchdog_proto::common::UdfRequest>,
        error_policy: ErrorPolicy,
    ) -> Result<(Option<Predicate>, Arc<AtomicU32>), Status> {
        let error_count = Arc::new(AtomicU32::new(0));
        if filter_expression.is_none() && udf_request.is_none() {
            return Ok((None, error_count));
        }

        let expr: Option<Arc<Expr>> = filter_expression
            .map(|bytes| Expr::decode(bytes::Bytes::from(bytes)).map(Arc::new))
            .transpose()
            .map_err(|e| Status::invalid_argument(format!("invalid filter_expression: {e}")))?;

        let udf_params: Option<(String, String, HashMap<String, UdfValue>, ErrorPolicy)> =
            udf_request.map(|req| {
                let params = req
                    .parameters_json
                    .iter()
                    .map(|(k, v)| {
                        let json: serde_json::Value = serde_json::from_str(v).unwrap_or(serde_json::Value::String(v.clone()));
                        (k.clone(), UdfValue::from(json))
                    })
                    .collect();
                let policy = match req.on_error.as_str() {
                    "fail" => ErrorPolicy::Fail,
                    "non_match" => ErrorPolicy::NonMatch,
                    _ => error_policy,
                };
                (req.name, req.version, params, policy)
            });

        let runtime = self.udf_runtime.clone();
        let errors = error_count.clone();

        let predicate: Predicate = Arc::new(move |doc_id: &str, doc: &Document| -> bool {
            if let Some(expr) = &expr {
                let value = serde_json::Value::Object(doc.clone());
                if !eval_bool(expr, &value as &dyn FieldSource) {
                    return false;
                }
            }
            if let Some((name, version, params, _policy)) = &udf_params {
                let document = Arc::new(JsonDocument {
                    doc_id: doc_id.to_string(),
                    score: 0.0,
                    source: serde_json::Value::Object(doc.clone()),
                });
                let handle = match tokio::runtime::Handle::try_current() {
                    Ok(h) => h,
                    Err(_) => return false,
                };
                let result = handle.block_on(runtime.call(name, version, params, Some(document)));
                match result {
                    Ok(UdfValue::Bool(true)) => {}
                    Ok(_) => return false,
                    Err(_) => {
                        errors.fetch_add(1, Ordering::Relaxed);
                        return false;
                    }
                }
            }
            true
        });
        Ok((Some(predicate), error_count))
    }
}

fn engine_error_to_status(err: EngineError) -> Status {
    match err {
        EngineError::NotFound => Status::not_found("document not found"),
        EngineError::Invalid(msg) => Status::invalid_argument(msg),
        EngineError::Internal(msg) => Status::internal(msg),
    }
}

#[tonic::async_trait]
impl DataService for DataServiceImpl {
    async fn create_shard(&self, request: Request<CreateShardRequest>) -> Result<Response<CreateShardResponse>, Status> {
        let req = request.into_inner();
        let shard_ref = req.shard.ok_or_else(|| Status::invalid_argument("missing shard ref"))?;
        self.shards.create(&shard_ref.index_name, shard_ref.shard_id);
        let role = searchdog_proto::common::ShardRole::try_from(req.role).unwrap_or(searchdog_proto::common::ShardRole::Primary);
        Ok(Response::new(CreateShardResponse {
            info: Some(searchdog_proto::common::ShardInfo {
                index_name: shard_ref.index_name,
                shard_id: shard_ref.shard_id,
                role: role as i32,
                assigned_node_id: self.node_id.clone(),
                state: searchdog_proto::common::ShardState::Started as i32,
            }),
        }))
    }

    async fn delete_shard(&self, request: Request<DeleteShardRequest>) -> Result<Response<DeleteShardResponse>, Status> {
        let shard_ref = request.into_inner().shard.ok_or_else(|| Status::invalid_argument("missing shard ref"))?;
        self.shards.delete(&shard_ref.index_name, shard_ref.shard_id);
        Ok(Response::new(DeleteShardResponse {}))
    }

    async fn get_shard_info(&self, request: Request<GetShardInfoRequest>) -> Result<Response<GetShardInfoResponse>, Status> {
        let shard_ref = request.into_inner().shard.ok_or_else(|| Status::invalid_argument("missing shard ref"))?;
        let entry = self.get_shard(&shard_ref)?;
        Ok(Response::new(GetShardInfoResponse {
            info: Some(searchdog_proto::common::ShardInfo {
                index_name: shard_ref.index_name,
                shard_id: shard_ref.shard_id,
                role: searchdog_proto::common::ShardRole::Primary as i32,
                assigned_node_id: self.node_id.clone(),
                state: searchdog_proto::common::ShardState::Started as i32,
            }),
            doc_count: entry.engine.doc_count(),
        }))
    }

    async fn refresh_shard(&self, request: Request<RefreshShardRequest>) -> Result<Response<RefreshShardResponse>, Status> {
        let shard_ref = request.into_inner().shard.ok_or_else(|| Status::invalid_argument("missing shard ref"))?;
        let entry = self.get_shard(&shard_ref)?;
        entry.engine.refresh().map_err(engine_error_to_status)?;
        entry.counts.lock().refreshes += 1;
        Ok(Response::new(RefreshShardResponse {}))
    }

    async fn flush_shard(&self, request: Request<FlushShardRequest>) -> Result<Response<FlushShardResponse>, Status> {
        let shard_ref = request.into_inner().shard.ok_or_else(|| Status::invalid_argument("missing shard ref"))?;
        let entry = self.get_shard(&shard_ref)?;
        entry.engine.flush().map_err(engine_error_to_status)?;
        entry.counts.lock().flushes += 1;
        Ok(Response::new(FlushShardResponse {}))
    }

    async fn index_document(&self, request: Request<IndexDocumentRequest>) -> Result<Response<IndexDocumentResponse>, Status> {
        let req = request.into_inner();
        let shard_ref = req.shard.ok_or_else(|| Status::invalid_argument("missing shard ref"))?;
        let entry = self.get_shard(&shard_ref)?;
        let doc = translate::document_from_bytes(&req.source_json).map_err(engine_error_to_status)?;
        let started = Instant::now();
        let version = entry.engine.add_document(&req.doc_id, doc).map_err(engine_error_to_status)?;
        let mut counts = entry.counts.lock();
        counts.docs_indexed += 1;
        counts.index_time += started.elapsed();
        Ok(Response::new(IndexDocumentResponse { version }))
    }

    async fn delete_document(&self, request: Request<DeleteDocumentRequest>) -> Result<Response<DeleteDocumentResponse>, Status> {
        let req = request.into_inner();
        let shard_ref = req.shard.ok_or_else(|| Status::invalid_argument("missing shard ref"))?;
        let entry = self.get_shard(&shard_ref)?;
        let found = entry.engine.delete_document(&req.doc_id).map_err(engine_error_to_status)?;
        if found {
            entry.counts.lock().docs_deleted += 1;
        }
        Ok(Response::new(DeleteDocumentResponse { found }))
    }

    async fn bulk_index(&self, request: Request<BulkIndexRequest>) -> Result<Response<BulkIndexResponse>, Status> {
        let req = request.into_inner();
        let shard_ref = req.shard.ok_or_else(|| Status::invalid_argument("missing shard ref"))?;
        let entry = self.get_shard(&shard_ref)?;
        let mut results = Vec::with_capacity(req.items.len());
        for item in req.items {
            let op = bulk_item::Op::try_from(item.op).unwrap_or(bulk_item::Op::Index);
            let result = match op {
                bulk_item::Op::Delete => match entry.engine.delete_document(&item.doc_id) {
                    Ok(found) => {
                        if found {
                            entry.counts.lock().docs_deleted += 1;
                        }
                        BulkItemResult { ok: true, version: 0, error: String::new() }
                    }
                    Err(e) => BulkItemResult { ok: false, version: 0, error: e.to_string() },
                },
                _ => match translate::document_from_bytes(&item.source_json) {
                    Ok(doc) => match entry.engine.add_document(&item.doc_id, doc) {
                        Ok(version) => {
                            entry.counts.lock().docs_indexed += 1;
                            BulkItemResult { ok: true, version, error: String::new() }
                        }
                        Err(e) => BulkItemResult { ok: false, version: 0, error: e.to_string() },
                    },
                    Err(e) => BulkItemResult { ok: false, version: 0, error: e.to_string() },
                },
            };
            results.push(result);
        }
        Ok(Response::new(BulkIndexResponse { results }))
    }

    async fn get_document(&self, request: Request<GetDocumentRequest>) -> Result<Response<GetDocumentResponse>, Status> {
        let req = request.into_inner();
        let shard_ref = req.shard.ok_or_else(|| Status::invalid_argument("missing shard ref"))?;
        let entry = self.get_shard(&shard_ref)?;
        match entry.engine.get_document(&req.doc_id).map_err(engine_error_to_status)? {
            Some((doc, version)) => Ok(Response::new(GetDocumentResponse {
                found: true,
                source_json: translate::document_to_bytes(&doc),
                version,
            })),
            None => Ok(Response::new(GetDocumentResponse { found: false, source_json: Vec::new(), version: 0 })),
        }
    }

    async fn search(&self, request: Request<SearchRequest>) -> Result<Response<SearchResponse>, Status> {
        let req = request.into_inner();
        let shard_ref = req.shard.clone().ok_or_else(|| Status::invalid_argument("missing shard ref"))?;
        let entry = self.get_shard(&shard_ref)?;
        let query = translate::query_from_json(&req.query_json).map_err(engine_error_to_status)?;
        let (predicate, error_count) =
            self.build_predicate(req.filter_expression, req.udf_request, crate::config::config().udf.error_policy)?;
        let error_policy = crate::config::config().udf.error_policy;

        let agg_specs: Vec<_> = req
            .aggs
            .iter()
            .map(|a| translate::agg_spec_from_json(&a.spec_json))
            .collect::<Result<_, _>>()
            .map_err(engine_error_to_status)?;

        let started = Instant::now();
        let engine = entry.engine.clone();
        let from = req.from as usize;
        let size = req.size as usize;
        let deadline = req.deadline_ms;
        let (search_result, agg_results) = tokio::task::spawn_blocking(move || {
            let result = engine.search(&query, predicate.clone(), from, size);
            let aggs = if agg_specs.is_empty() {
                Ok(Vec::new())
            } else {
                engine.aggregate(&query, predicate, &agg_specs)
            };
            (result, aggs)
        })
        .await
        .map_err(|e| Status::internal(format!("search task panicked: {e}")))?;

        let _ = deadline;
        let search_result = search_result.map_err(engine_error_to_status)?;
        let agg_results = agg_results.map_err(engine_error_to_status)?;

        let errors = error_count.load(Ordering::Relaxed);
        if errors > 0 && error_policy == ErrorPolicy::Fail {
            return Err(Status::internal(format!("{errors} udf filter evaluation(s) failed")));
        }

        let mut counts = entry.counts.lock();
        counts.searches += 1;
        counts.search_time += started.elapsed();
        if errors > 0 {
            counts.udf_filter_errors += errors as u64;
        }
        drop(counts);

        Ok(Response::new(SearchResponse {
            hits: search_result
                .hits
                .into_iter()
                .map(|h| Hit { doc_id: h.doc_id, score: h.score, source_json: translate::document_to_bytes(&h.source) })
                .collect(),
            total: search_result.total,
            aggs: agg_results.iter().map(translate::partial_to_proto).collect(),
            took_ms: started.elapsed().as_millis() as u64,
            udf_errors: errors,
        }))
    }

    async fn count(&self, request: Request<CountRequest>) -> Result<Response<CountResponse>, Status> {
        let req = request.into_inner();
        let shard_ref = req.shard.ok_or_else(|| Status::invalid_argument("missing shard ref"))?;
        let entry = self.get_shard(&shard_ref)?;
        let query = translate::query_from_json(&req.query_json).map_err(engine_error_to_status)?;
        let (predicate, _) =
            self.build_predicate(req.filter_expression, None, crate::config::config().udf.error_policy)?;
        let engine = entry.engine.clone();
        let count = tokio::task::spawn_blocking(move || engine.count(&query, predicate))
            .await
            .map_err(|e| Status::internal(format!("count task panicked: {e}")))?
            .map_err(engine_error_to_status)?;
        entry.counts.lock().counts += 1;
        Ok(Response::new(CountResponse { count }))
    }

    async fn get_shard_stats(&self, request: Request<GetShardStatsRequest>) -> Result<Response<GetShardStatsResponse>, Status> {
        let shard_ref = request.into_inner().shard.ok_or_else(|| Status::invalid_argument("missing shard ref"))?;
        let entry = self.get_shard(&shard_ref)?;
        let counts = *entry.counts.lock();
        Ok(Response::new(GetShardStatsResponse {
            docs_indexed: counts.docs_indexed,
            docs_deleted: counts.docs_deleted,
            searches: counts.searches,
            udf_filter_errors: counts.udf_filter_errors,
        }))
    }

    async fn get_node_stats(&self, _request: Request<GetNodeStatsRequest>) -> Result<Response<GetNodeStatsResponse>, Status> {
        Ok(Response::new(GetNodeStatsResponse {
            node_id: self.node_id.clone(),
            shard_count: self.shards.shard_count(),
            uptime_ms: self.started.elapsed().as_millis() as u64,
        }))
    }
}
