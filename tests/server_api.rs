//! Live-server tests: a real listener, a temp database, requests over HTTP.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use apismith::core::models::{ParsedResponse, ParsingMeta};
use apismith::core::registry::EndpointRegistry;
use apismith::core::sandbox::ExecutionMeta;
use apismith::core::store::DataStore;
use apismith::interfaces::web::ApiServer;

struct Harness {
    base_url: String,
    registry: Arc<EndpointRegistry>,
    client: reqwest::Client,
    _data_dir: tempfile::TempDir,
}

async fn spawn_server() -> Harness {
    let data_dir = tempfile::tempdir().unwrap();
    let store = DataStore::open(data_dir.path().join("endpoints.db"))
        .await
        .unwrap();
    let server = ApiServer::bind("127.0.0.1", 0).await.unwrap();
    let base_url = server.base_url();
    let registry = Arc::new(EndpointRegistry::new(store, base_url.clone()));
    server.serve(registry.clone());

    let harness = Harness {
        base_url,
        registry,
        client: reqwest::Client::new(),
        _data_dir: data_dir,
    };
    wait_until_ready(&harness).await;
    harness
}

async fn wait_until_ready(harness: &Harness) {
    for _ in 0..40 {
        let response = harness
            .client
            .get(format!("{}/health", harness.base_url))
            .timeout(Duration::from_millis(500))
            .send()
            .await;
        if matches!(response, Ok(r) if r.status().is_success()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server never became ready at {}", harness.base_url);
}

fn parsed_response(data: Value) -> ParsedResponse {
    ParsedResponse {
        data: data.as_object().cloned().unwrap(),
        meta: ParsingMeta {
            model: "deepseek-chat".to_string(),
            tokens_used: Some(640),
            parsing_ms: 1200,
            records_parsed: data["data"].as_array().map(Vec::len).unwrap_or(1),
            fields_extracted: vec!["symbol".to_string(), "price".to_string()],
            data_sources: vec!["https://example.invalid/crypto".to_string()],
            timestamp: Utc::now(),
        },
        source_meta: ExecutionMeta::default(),
        raw_output: String::new(),
    }
}

fn crypto_data() -> Value {
    json!({"data": [
        {"symbol": "BTC", "price": 45000},
        {"symbol": "ETH", "price": 3200}
    ]})
}

#[tokio::test]
async fn health_reports_the_service() {
    let harness = spawn_server().await;
    let response = harness
        .client
        .get(format!("{}/health", harness.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "api-endpoint-server");
}

#[tokio::test]
async fn created_endpoint_round_trips_over_http() {
    let harness = spawn_server().await;
    let info = harness
        .registry
        .create(&parsed_response(crypto_data()), "crypto prices")
        .await
        .unwrap();

    // Create-then-read consistency: visible to the very next request.
    let response = harness
        .client
        .get(format!("{}/api/data/{}", harness.base_url, info.endpoint_id))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, crypto_data());
}

#[tokio::test]
async fn metadata_query_wraps_the_payload() {
    let harness = spawn_server().await;
    let info = harness
        .registry
        .create(&parsed_response(crypto_data()), "crypto prices")
        .await
        .unwrap();

    let response = harness
        .client
        .get(format!(
            "{}/api/data/{}?metadata=true",
            harness.base_url, info.endpoint_id
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"], crypto_data());
    assert_eq!(body["endpoint_id"], info.endpoint_id.as_str());
    assert_eq!(body["metadata"]["records_count"], 2);
    assert_eq!(body["metadata"]["fields"], json!(["symbol", "price"]));
    assert!(body["created_at"].is_string());
}

#[tokio::test]
async fn malformed_metadata_query_is_a_400() {
    let harness = spawn_server().await;
    let info = harness
        .registry
        .create(&parsed_response(crypto_data()), "crypto prices")
        .await
        .unwrap();

    let response = harness
        .client
        .get(format!(
            "{}/api/data/{}?metadata=definitely",
            harness.base_url, info.endpoint_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn missing_endpoint_is_a_json_404() {
    let harness = spawn_server().await;
    let response = harness
        .client
        .get(format!("{}/api/data/does-not-exist", harness.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Endpoint not found");
    assert_eq!(body["endpoint_id"], "does-not-exist");
}

#[tokio::test]
async fn listing_tracks_creates_and_deletes() {
    let harness = spawn_server().await;
    let mut created = Vec::new();
    for description in ["crypto prices", "weather forecast", "football scores"] {
        created.push(
            harness
                .registry
                .create(&parsed_response(crypto_data()), description)
                .await
                .unwrap(),
        );
    }
    harness.registry.delete(&created[0].endpoint_id).await.unwrap();

    let response = harness
        .client
        .get(format!("{}/api/endpoints", harness.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    let endpoints = body["endpoints"].as_array().unwrap();
    assert_eq!(endpoints.len(), 2);

    // Every listed id resolves, and access URLs point at this server.
    for endpoint in endpoints {
        let id = endpoint["endpoint_id"].as_str().unwrap();
        assert!(harness.registry.get(id).await.unwrap().is_some());
        assert_eq!(
            endpoint["access_url"].as_str().unwrap(),
            format!("{}/api/data/{id}", harness.base_url)
        );
    }
}

#[tokio::test]
async fn delete_route_removes_the_endpoint() {
    let harness = spawn_server().await;
    let info = harness
        .registry
        .create(&parsed_response(crypto_data()), "crypto prices")
        .await
        .unwrap();

    let response = harness
        .client
        .delete(format!(
            "{}/api/endpoints/{}",
            harness.base_url, info.endpoint_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Endpoint deleted successfully");
    assert_eq!(body["endpoint_id"], info.endpoint_id.as_str());

    // Gone for the data route and for a second delete.
    let data = harness
        .client
        .get(format!("{}/api/data/{}", harness.base_url, info.endpoint_id))
        .send()
        .await
        .unwrap();
    assert_eq!(data.status(), 404);

    let again = harness
        .client
        .delete(format!(
            "{}/api/endpoints/{}",
            harness.base_url, info.endpoint_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);
}

#[tokio::test]
async fn endpoints_survive_a_restart() {
    let data_dir = tempfile::tempdir().unwrap();
    let db_path = data_dir.path().join("endpoints.db");

    let endpoint_id = {
        let store = DataStore::open(&db_path).await.unwrap();
        let registry = EndpointRegistry::new(store, "http://127.0.0.1:8080");
        registry
            .create(&parsed_response(crypto_data()), "crypto prices")
            .await
            .unwrap()
            .endpoint_id
    };

    // Fresh store and fresh server over the same file.
    let store = DataStore::open(&db_path).await.unwrap();
    let server = ApiServer::bind("127.0.0.1", 0).await.unwrap();
    let base_url = server.base_url();
    let registry = Arc::new(EndpointRegistry::new(store, base_url.clone()));
    server.serve(registry.clone());

    let client = reqwest::Client::new();
    for _ in 0..40 {
        if matches!(
            client.get(format!("{base_url}/health")).send().await,
            Ok(r) if r.status().is_success()
        ) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let response = client
        .get(format!("{base_url}/api/data/{endpoint_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, crypto_data());
}
