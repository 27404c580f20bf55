//! Fan-out executor (spec.md §4.2.4): dispatches a parsed search/count
//! across every started shard of an index in parallel, single-document
//! writes/reads against the routed primary, and bulk writes bucketed by
//! shard under a bounded concurrency semaphore (spec.md §4.2.3).

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use searchdog_config::Coordination as CoordinationConfig;
use searchdog_proto::data::data_service_client::DataServiceClient;
use searchdog_proto::data::{
    AggRequest, BulkIndexRequest, BulkItem, CountRequest, DeleteDocumentRequest, GetDocumentRequest, IndexDocumentRequest,
    SearchRequest, ShardRef,
};
use searchdog_proto::{common, expr_wire::Expr};
use searchdog_udf_sdk::Value as UdfValue;
use thiserror::Error;
use tokio::sync::Semaphore;
use tonic::transport::Channel;

use crate::data::engine::{AggSpec, Query};

use super::cache::ClusterStateCache;
use super::dsl::{OnError, ParsedSearch, UdfFilter};
use super::merge::{self, MergedHit};
use super::node_pool::NodePool;
use super::routing::{self, RoutingError};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{0}")]
    Routing(#[from] RoutingError),
    #[error("no data node is reachable for shard {0}")]
    NodeUnreachable(u32),
    #[error("routed node rejected the request as stale after {0} retries")]
    RetriesExhausted(u32),
    #[error("data node error: {0}")]
    Grpc(#[from] tonic::Status),
    #[error("all {0} shards failed: {1}")]
    AllShardsFailed(u32, String),
}

pub struct Executor {
    cache: Arc<ClusterStateCache>,
    pool: Arc<NodePool>,
    config: CoordinationConfig,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub hits: Vec<MergedHit>,
    pub total: u64,
    pub aggs: Vec<common::AggResult>,
    pub partial: bool,
    pub took_ms: u64,
    pub shards_total: u32,
    pub shards_successful: u32,
    pub shards_failed: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct CountOutcome {
    pub total: u64,
    pub shards_total: u32,
    pub shards_successful: u32,
    pub shards_failed: u32,
}

pub enum BulkOp {
    Index { doc_id: String, source: Vec<u8> },
    Delete { doc_id: String },
}

#[derive(Debug, Clone)]
pub struct BulkItemOutcome {
    pub ok: bool,
    pub version: u64,
    pub error: String,
}

impl Executor {
    pub fn new(cache: Arc<ClusterStateCache>, pool: Arc<NodePool>, config: CoordinationConfig) -> Self {
        Self { cache, pool, config }
    }

    fn client_for(&self, node_id: &str, shard_id: u32) -> Result<DataServiceClient<Channel>, ExecError> {
        self.pool.get(node_id).ok_or(ExecError::NodeUnreachable(shard_id))
    }

    /// Dispatches one search to every started shard in parallel, requesting
    /// `from + size` hits per shard (spec.md §4.2.4 step 1), then merges.
    pub async fn search(
        &self,
        index: &str,
        parsed: &ParsedSearch,
        requested_aggs: &[(String, AggSpec)],
        udf_meta: Option<&UdfFilter>,
    ) -> Result<SearchOutcome, ExecError> {
        let started = Instant::now();
        let state = self.cache.current();
        let shard_ids = routing::all_shard_ids(&state, index)?;
        let deadline = self.config.shard_deadline();

        let query_json = serde_json::to_vec(&parsed.query).unwrap_or_default();
        let filter_expression = parsed.filter_expr.as_ref().map(|e| e.encode().to_vec());
        let udf_request = udf_meta.map(to_udf_request);
        let per_shard_size = (parsed.from + parsed.size) as u32;

        let aggs: Vec<AggRequest> = requested_aggs
            .iter()
            .map(|(name, spec)| AggRequest {
                name: name.clone(),
                spec_json: serde_json::to_vec(spec).unwrap_or_default(),
                sub_aggs: Vec::new(),
            })
            .collect();

        type ShardFut = Pin<Box<dyn std::future::Future<Output = Result<searchdog_proto::data::SearchResponse, String>> + Send>>;
        let mut futures: Vec<ShardFut> = Vec::with_capacity(shard_ids.len());
        for shard_id in &shard_ids {
            let shard_id = *shard_id;
            let nodes = routing::resolve_read_nodes(&state, index, shard_id);
            // Read-preference round robin among started copies; picks the
            // copy at position `shard_id as usize % nodes.len()` so load is
            // spread deterministically per shard rather than always hitting
            // the primary.
            let node_id = nodes.get((shard_id as usize) % nodes.len().max(1)).cloned();
            let client = node_id.as_deref().and_then(|n| self.client_for(n, shard_id).ok());
            let Some(mut client) = client else {
                futures.push(Box::pin(async move { Err(format!("shard {shard_id}: no data node reachable")) }));
                continue;
            };
            let req = SearchRequest {
                shard: Some(ShardRef { index_name: index.to_string(), shard_id }),
                query_json: query_json.clone(),
                filter_expression: filter_expression.clone(),
                udf_request: udf_request.clone(),
                from: 0,
                size: per_shard_size,
                aggs: aggs.clone(),
                deadline_ms: deadline.as_millis() as u64,
            };
            futures.push(Box::pin(async move {
                match tokio::time::timeout(deadline, client.search(req)).await {
                    Ok(Ok(resp)) => Ok(resp.into_inner()),
                    Ok(Err(status)) => Err(format!("shard {shard_id}: {status}")),
                    Err(_) => Err(format!("shard {shard_id}: timed out")),
                }
            }));
        }

        let responses = futures::future::join_all(futures).await;

        let mut hit_groups = Vec::new();
        let mut agg_groups = Vec::new();
        let mut total: u64 = 0;
        let mut causes = Vec::new();

        for (shard_id, resp) in shard_ids.iter().zip(responses) {
            match resp {
                Ok(resp) => {
                    total += resp.total;
                    hit_groups.push((*shard_id, resp.hits));
                    agg_groups.push(resp.aggs);
                }
                Err(cause) => causes.push(cause),
            }
        }

        let shards_total = shard_ids.len() as u32;
        let shards_failed = causes.len() as u32;
        let shards_successful = shards_total - shards_failed;

        // spec.md §4.2.4: zero shards responding is a hard error, not a
        // 200 with an empty/partial result.
        if shards_total > 0 && shards_successful == 0 {
            return Err(ExecError::AllShardsFailed(shards_total, causes.join("; ")));
        }

        let hits = merge::merge_hits(hit_groups, parsed.from, parsed.size);
        let merged_aggs = merge::merge_all(requested_aggs, agg_groups);

        Ok(SearchOutcome {
            hits,
            total,
            aggs: merged_aggs,
            partial: shards_failed > 0,
            took_ms: started.elapsed().as_millis() as u64,
            shards_total,
            shards_successful,
            shards_failed,
        })
    }

    pub async fn count(&self, index: &str, query: &Query, filter_expr: Option<&Expr>) -> Result<CountOutcome, ExecError> {
        let state = self.cache.current();
        let shard_ids = routing::all_shard_ids(&state, index)?;
        let deadline = self.config.shard_deadline();
        let query_json = serde_json::to_vec(query).unwrap_or_default();
        let filter_expression = filter_expr.map(|e| e.encode().to_vec());

        type CountFut = Pin<Box<dyn std::future::Future<Output = Result<u64, String>> + Send>>;
        let mut futures: Vec<CountFut> = Vec::with_capacity(shard_ids.len());
        for shard_id in &shard_ids {
            let shard_id = *shard_id;
            let nodes = routing::resolve_read_nodes(&state, index, shard_id);
            let client = nodes.first().and_then(|n| self.client_for(n, shard_id).ok());
            let Some(mut client) = client else {
                futures.push(Box::pin(async move { Err(format!("shard {shard_id}: no data node reachable")) }));
                continue;
            };
            let req = CountRequest {
                shard: Some(ShardRef { index_name: index.to_string(), shard_id }),
                query_json: query_json.clone(),
                filter_expression: filter_expression.clone(),
            };
            futures.push(Box::pin(async move {
                match tokio::time::timeout(deadline, client.count(req)).await {
                    Ok(Ok(resp)) => Ok(resp.into_inner().count),
                    Ok(Err(status)) => Err(format!("shard {shard_id}: {status}")),
                    Err(_) => Err(format!("shard {shard_id}: timed out")),
                }
            }));
        }

        let responses = futures::future::join_all(futures).await;
        let mut total = 0u64;
        let mut causes = Vec::new();
        for resp in responses {
            match resp {
                Ok(count) => total += count,
                Err(cause) => causes.push(cause),
            }
        }

        let shards_total = shard_ids.len() as u32;
        let shards_failed = causes.len() as u32;
        let shards_successful = shards_total - shards_failed;
        if shards_total > 0 && shards_successful == 0 {
            return Err(ExecError::AllShardsFailed(shards_total, causes.join("; ")));
        }

        Ok(CountOutcome { total, shards_total, shards_successful, shards_failed })
    }

    /// Routes and sends a single-document write, retrying up to
    /// `config.retry.max_retries` times with backoff if the data node
    /// reports the shard assignment is stale (spec.md §4.2.3).
    pub async fn index_document(&self, index: &str, doc_id: &str, source: &[u8]) -> Result<u64, ExecError> {
        let num_shards = self.num_shards(index)?;
        let shard_id = routing::primary_shard(doc_id, num_shards);
        self.with_retry(index, shard_id, |mut client| {
            let req = IndexDocumentRequest {
                shard: Some(ShardRef { index_name: index.to_string(), shard_id }),
                doc_id: doc_id.to_string(),
                source_json: source.to_vec(),
            };
            async move { client.index_document(req).await.map(|r| r.into_inner().version) }
        })
        .await
    }

    pub async fn delete_document(&self, index: &str, doc_id: &str) -> Result<bool, ExecError> {
        let num_shards = self.num_shards(index)?;
        let shard_id = routing::primary_shard(doc_id, num_shards);
        self.with_retry(index, shard_id, |mut client| {
            let req = DeleteDocumentRequest {
                shard: Some(ShardRef { index_name: index.to_string(), shard_id }),
                doc_id: doc_id.to_string(),
            };
            async move { client.delete_document(req).await.map(|r| r.into_inner().found) }
        })
        .await
    }

    pub async fn get_document(&self, index: &str, doc_id: &str) -> Result<Option<(Vec<u8>, u64)>, ExecError> {
        let state = self.cache.current();
        let num_shards = self.num_shards(index)?;
        let shard_id = routing::primary_shard(doc_id, num_shards);
        let nodes = routing::resolve_read_nodes(&state, index, shard_id);
        let node_id = nodes.first().ok_or(ExecError::NodeUnreachable(shard_id))?;
        let mut client = self.client_for(node_id, shard_id)?;
        let resp = client
            .get_document(GetDocumentRequest { shard: Some(ShardRef { index_name: index.to_string(), shard_id }), doc_id: doc_id.to_string() })
            .await?
            .into_inner();
        Ok(resp.found.then_some((resp.source_json, resp.version)))
    }

    /// Buckets `items` by routed shard, dispatches one `BulkIndex` call per
    /// shard under a semaphore bound by `bulk_shard_concurrency`, then
    /// reassembles results in the caller's original order (spec.md
    /// §4.2.3 "Bulk writes").
    pub async fn bulk(&self, index: &str, items: Vec<BulkOp>) -> Result<Vec<BulkItemOutcome>, ExecError> {
        let num_shards = self.num_shards(index)?;
        let mut by_shard: HashMap<u32, Vec<(usize, BulkOp)>> = HashMap::new();
        for (i, op) in items.into_iter().enumerate() {
            let doc_id = match &op {
                BulkOp::Index { doc_id, .. } => doc_id.clone(),
                BulkOp::Delete { doc_id } => doc_id.clone(),
            };
            let shard_id = routing::primary_shard(&doc_id, num_shards);
            by_shard.entry(shard_id).or_default().push((i, op));
        }

        let semaphore = Arc::new(Semaphore::new(self.config.bulk_shard_concurrency.max(1)));
        let state = self.cache.current();
        let mut tasks = Vec::with_capacity(by_shard.len());

        for (shard_id, batch) in by_shard {
            let node_id = match routing::resolve_write_node(&state, index, shard_id) {
                Ok(n) => n.to_string(),
                Err(_) => {
                    let placeholders = batch.into_iter().map(|(i, _)| (i, BulkItemOutcome { ok: false, version: 0, error: "no primary for shard".into() }));
                    tasks.push(tokio::spawn(async move { placeholders.collect::<Vec<_>>() }));
                    continue;
                }
            };
            let Ok(client) = self.client_for(&node_id, shard_id) else {
                let placeholders = batch.into_iter().map(|(i, _)| (i, BulkItemOutcome { ok: false, version: 0, error: "node unreachable".into() }));
                tasks.push(tokio::spawn(async move { placeholders.collect::<Vec<_>>() }));
                continue;
            };
            let sem = semaphore.clone();
            let index = index.to_string();
            tasks.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await;
                dispatch_shard_batch(client, index, shard_id, batch).await
            }));
        }

        let mut out: Vec<Option<BulkItemOutcome>> = Vec::new();
        for task in tasks {
            if let Ok(results) = task.await {
                for (i, outcome) in results {
                    if out.len() <= i {
                        out.resize(i + 1, None);
                    }
                    out[i] = Some(outcome);
                }
            }
        }

        Ok(out.into_iter().map(|o| o.unwrap_or(BulkItemOutcome { ok: false, version: 0, error: "dispatch failed".into() })).collect())
    }

    fn num_shards(&self, index: &str) -> Result<u32, ExecError> {
        let state = self.cache.current();
        Ok(state.index(index).ok_or(RoutingError::UnknownIndex)?.num_shards)
    }

    /// Retries a single-shard write against a freshly routed node up to
    /// `max_retries` times with linear backoff when the node reports a
    /// `FailedPrecondition` (the data tier's "this shard moved" signal),
    /// refreshing the cluster-state cache between attempts.
    async fn with_retry<F, Fut, T>(&self, index: &str, shard_id: u32, make_call: F) -> Result<T, ExecError>
    where
        F: Fn(DataServiceClient<Channel>) -> Fut,
        Fut: std::future::Future<Output = Result<T, tonic::Status>>,
    {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            let state = self.cache.current();
            let node_id = routing::resolve_write_node(&state, index, shard_id)?.to_string();
            let client = self.client_for(&node_id, shard_id)?;
            match make_call(client).await {
                Ok(value) => return Ok(value),
                Err(status) if status.code() == tonic::Code::FailedPrecondition && attempt < retry.max_retries => {
                    attempt += 1;
                    tokio::time::sleep(retry.backoff_base() * attempt).await;
                    if let Ok(mut refresh_client) = self.client_for(&node_id, shard_id) {
                        let _ = self.cache.refresh_now(&mut refresh_client).await;
                    }
                }
                Err(status) if status.code() == tonic::Code::FailedPrecondition => {
                    return Err(ExecError::RetriesExhausted(attempt));
                }
                Err(status) => return Err(status.into()),
            }
        }
    }
}

async fn dispatch_shard_batch(mut client: DataServiceClient<Channel>, index: String, shard_id: u32, batch: Vec<(usize, BulkOp)>) -> Vec<(usize, BulkItemOutcome)> {
    use searchdog_proto::data::bulk_item::Op;
    let items: Vec<BulkItem> = batch
        .iter()
        .map(|(_, op)| match op {
            BulkOp::Index { doc_id, source } => BulkItem { op: Op::Index as i32, doc_id: doc_id.clone(), source_json: source.clone() },
            BulkOp::Delete { doc_id } => BulkItem { op: Op::Delete as i32, doc_id: doc_id.clone(), source_json: Vec::new() },
        })
        .collect();

    let req = BulkIndexRequest { shard: Some(ShardRef { index_name: index, shard_id }), items };
    match client.bulk_index(req).await {
        Ok(resp) => {
            let results = resp.into_inner().results;
            batch
                .into_iter()
                .zip(results)
                .map(|((i, _), r)| (i, BulkItemOutcome { ok: r.ok, version: r.version, error: r.error }))
                .collect()
        }
        Err(status) => batch.into_iter().map(|(i, _)| (i, BulkItemOutcome { ok: false, version: 0, error: status.to_string() })).collect(),
    }
}

fn to_udf_request(filter: &UdfFilter) -> common::UdfRequest {
    let parameters_json: HashMap<String, String> = filter
        .params
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::to_string(&udf_value_to_json(v)).unwrap_or_default()))
        .collect();
    common::UdfRequest {
        name: filter.name.clone(),
        version: filter.version.clone(),
        parameters_json,
        on_error: match filter.on_error {
            OnError::NonMatch => "non_match".to_string(),
            OnError::Fail => "fail".to_string(),
        },
    }
}

fn udf_value_to_json(v: &UdfValue) -> serde_json::Value {
    match v {
        UdfValue::Null => serde_json::Value::Null,
        UdfValue::Bool(b) => serde_json::Value::Bool(*b),
        UdfValue::Int64(i) => serde_json::json!(i),
        UdfValue::Float64(f) => serde_json::json!(f),
        UdfValue::String(s) => serde_json::Value::String(s.clone()),
    }
}
