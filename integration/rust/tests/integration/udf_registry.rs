use serde_json::json;

#[path = "../common/mod.rs"]
mod common;
use common::Cluster;

/// spec.md §8 S5: register a UDF, list it, fetch its metadata, then
/// unregister it. Exercises the control-tier `UdfRegistry` through the
/// coordination REST surface without needing a real wasm module, since
/// registration only stores metadata + bytecode — it doesn't load it.
#[tokio::test]
async fn register_list_and_delete_udf() {
    let cluster = Cluster::start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(cluster.url("/api/v1/udfs?name=price_filter&version=1.0.0&language=rust&return_type=bool"))
        .body(vec![0u8, 1, 2, 3])
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "register failed: {:?}", resp.text().await);
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let resp = client.get(cluster.url("/api/v1/udfs")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    let names: Vec<&str> = body["udfs"].as_array().unwrap().iter().filter_map(|u| u["name"].as_str()).collect();
    assert!(names.contains(&"price_filter"), "expected price_filter in {body:?}");

    let resp = client.get(cluster.url("/api/v1/udfs/price_filter/1.0.0")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["return_type"].as_str(), Some("Bool"));

    let resp = client.delete(cluster.url("/api/v1/udfs/price_filter/1.0.0")).send().await.unwrap();
    assert!(resp.status().is_success());
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let resp = client.get(cluster.url("/api/v1/udfs/price_filter/1.0.0")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

/// A `wasm_udf` filter naming a module that isn't registered anywhere
/// treats every document as a non-match by default (spec.md §7 "UDF
/// errors ... default: treat as non-match"), rather than erroring the
/// whole search — the shard-local error count only aborts the request
/// when the cluster's configured error policy is `fail`.
#[tokio::test]
async fn search_with_unknown_udf_filter_defaults_to_non_match() {
    let cluster = Cluster::start().await;
    let client = reqwest::Client::new();

    client
        .put(cluster.url("/orders"))
        .json(&json!({"settings": {"num_shards": 1, "num_replicas": 1}}))
        .send()
        .await
        .unwrap();
    client.put(cluster.url("/orders/_doc/1")).json(&json!({"sku": "a1"})).send().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let resp = client
        .post(cluster.url("/orders/_search"))
        .json(&json!({
            "query": {"bool": {
                "must": [{"match_all": {}}],
                "filter": [{"wasm_udf": {"name": "does_not_exist", "version": "1.0.0", "params": {}}}]
            }}
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "expected success with non-matches, got {}", resp.status());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["hits"]["total"]["value"].as_u64(), Some(0));
}
