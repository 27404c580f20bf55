use serde_json::json;

#[path = "../common/mod.rs"]
mod common;
use common::Cluster;

/// spec.md §8 S1: create an index, index a document, search for it.
#[tokio::test]
async fn create_index_then_search_finds_document() {
    let cluster = Cluster::start().await;
    let client = reqwest::Client::new();

    let resp = client
        .put(cluster.url("/products"))
        .json(&json!({"settings": {"num_shards": 1, "num_replicas": 1}}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "create_index failed: {:?}", resp.text().await);

    let resp = client
        .put(cluster.url("/products/_doc/1"))
        .json(&json!({"title": "wireless mouse", "price": 25.0}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "index_document failed: {:?}", resp.text().await);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let resp = client
        .post(cluster.url("/products/_search"))
        .json(&json!({"query": {"match_all": {}}}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["hits"]["total"]["value"].as_u64(), Some(1));
}

/// spec.md §8 S2: a term query against an indexed field only returns
/// matching documents.
#[tokio::test]
async fn term_query_filters_non_matching_documents() {
    let cluster = Cluster::start().await;
    let client = reqwest::Client::new();

    client
        .put(cluster.url("/articles"))
        .json(&json!({"settings": {"num_shards": 1, "num_replicas": 1}}))
        .send()
        .await
        .unwrap();

    for (id, category) in [("1", "tech"), ("2", "sports"), ("3", "tech")] {
        let resp = client
            .put(cluster.url(&format!("/articles/_doc/{id}")))
            .json(&json!({"category": category}))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let resp = client
        .post(cluster.url("/articles/_search"))
        .json(&json!({"query": {"term": {"category": "tech"}}}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["hits"]["total"]["value"].as_u64(), Some(2));
}

/// spec.md §8 S3: `_cluster/health` reflects the data node joining and the
/// index's shards becoming assigned.
#[tokio::test]
async fn cluster_health_reports_active_data_node() {
    let cluster = Cluster::start().await;
    let client = reqwest::Client::new();

    client
        .put(cluster.url("/logs"))
        .json(&json!({"settings": {"num_shards": 1, "num_replicas": 1}}))
        .send()
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    let resp = client.get(cluster.url("/_cluster/health")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["active_data_nodes"].as_u64(), Some(1));
}

/// spec.md §8 S4: deleting a document removes it from subsequent searches.
#[tokio::test]
async fn delete_document_removes_it_from_search_results() {
    let cluster = Cluster::start().await;
    let client = reqwest::Client::new();

    client
        .put(cluster.url("/notes"))
        .json(&json!({"settings": {"num_shards": 1, "num_replicas": 1}}))
        .send()
        .await
        .unwrap();
    client.put(cluster.url("/notes/_doc/1")).json(&json!({"body": "keep"})).send().await.unwrap();
    client.put(cluster.url("/notes/_doc/2")).json(&json!({"body": "drop"})).send().await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let resp = client.delete(cluster.url("/notes/_doc/2")).send().await.unwrap();
    assert!(resp.status().is_success());

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let resp = client
        .post(cluster.url("/notes/_search"))
        .json(&json!({"query": {"match_all": {}}}))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["hits"]["total"]["value"].as_u64(), Some(1));
}
