//! Integration tests for the ingestion API
//!
//! Exercises the warp routes against real consumers running over the
//! in-memory store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use vehicle_registry::api::{ApiResponse, ApiServer, DeliveryReceipt};
use vehicle_registry::config::ApiConfig;
use vehicle_registry::consumer::PartitionedConsumer;
use vehicle_registry::credential::{IssuerSettings, VinCredentialIssuer};
use vehicle_registry::crypto::IssuerKey;
use vehicle_registry::fingerprint::FingerprintConsumer;
use vehicle_registry::model::{MetaTransactionRequest, MetaTransactionStatus};
use vehicle_registry::processor::TransactionStatusProcessor;
use vehicle_registry::storage::{MemoryStore, RegistryStore};
use warp::http::StatusCode;

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{
    address, registry_contract, RecordingDeviceCloud, DUMMY_CHAIN_ID, DUMMY_DEVICE_ADDR,
    DUMMY_REQUEST_ID, DUMMY_TX_HASH, DUMMY_VEHICLE_NFT_ADDR,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn build_server(store: Arc<MemoryStore>) -> ApiServer {
    let processor = Arc::new(TransactionStatusProcessor::new(
        store.clone(),
        registry_contract(),
        Arc::new(RecordingDeviceCloud::default()),
    ));
    let issuer = Arc::new(VinCredentialIssuer::new(
        store.clone(),
        Arc::new(IssuerKey::generate(DUMMY_CHAIN_ID)),
        IssuerSettings {
            chain_id: DUMMY_CHAIN_ID,
            vehicle_nft_address: address(DUMMY_VEHICLE_NFT_ADDR),
            validity: chrono::Duration::days(7),
        },
    ));
    let fingerprints = Arc::new(FingerprintConsumer::new(store, issuer));

    let timeout = Duration::from_secs(5);
    ApiServer::new(
        ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        Arc::new(PartitionedConsumer::spawn("transaction-status", processor, 2, 8, timeout)),
        Arc::new(PartitionedConsumer::spawn("fingerprint", fingerprints, 2, 8, timeout)),
    )
}

fn receipt(body: &[u8]) -> ApiResponse<DeliveryReceipt> {
    serde_json::from_slice(body).unwrap()
}

// ============================================================================
// TESTS
// ============================================================================

/// What is tested: GET /health
/// Why: Load balancers probe it
#[tokio::test]
async fn test_health() {
    let server = build_server(Arc::new(MemoryStore::new()));
    let response = warp::test::request()
        .method("GET")
        .path("/health")
        .reply(&server.test_routes())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["success"], true);
}

/// What is tested: Status event for a known request
/// Why: The event is applied and acknowledged with 200
#[tokio::test]
async fn test_status_event_is_applied() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_meta_transaction(&MetaTransactionRequest::new(DUMMY_REQUEST_ID, None))
        .await
        .unwrap();
    let server = build_server(store.clone());

    let response = warp::test::request()
        .method("POST")
        .path("/v1/transactions/status")
        .json(&json!({
            "requestID": DUMMY_REQUEST_ID,
            "type": "Submitted",
            "transaction": { "hash": DUMMY_TX_HASH }
        }))
        .reply(&server.test_routes())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = receipt(response.body());
    assert!(body.success);
    let data = body.data.unwrap();
    assert_eq!(data.key, DUMMY_REQUEST_ID);
    assert_eq!(data.outcome, "success");

    let stored = store
        .get_meta_transaction(DUMMY_REQUEST_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, MetaTransactionStatus::Submitted);
}

/// What is tested: Status event for a request that is not stored
/// Why: The lookup may succeed later, so the caller is told to redeliver
#[tokio::test]
async fn test_unknown_request_is_not_acknowledged() {
    let server = build_server(Arc::new(MemoryStore::new()));

    let response = warp::test::request()
        .method("POST")
        .path("/v1/transactions/status")
        .json(&json!({ "requestID": "missing", "type": "Mined" }))
        .reply(&server.test_routes())
        .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = receipt(response.body());
    assert!(!body.success);
    assert!(!body.data.unwrap().acknowledged);
    assert!(body.error.is_some());
}

/// What is tested: Body that is not a status event
/// Why: Malformed envelopes are rejected with 400 and never reach a consumer
#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let server = build_server(Arc::new(MemoryStore::new()));

    let response = warp::test::request()
        .method("POST")
        .path("/v1/transactions/status")
        .body("{not json")
        .reply(&server.test_routes())
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = warp::test::request()
        .method("POST")
        .path("/v1/fingerprints")
        .json(&json!({ "subjectAddress": DUMMY_DEVICE_ADDR }))
        .reply(&server.test_routes())
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// What is tested: Fingerprint carrying an invalid VIN
/// Why: It is dropped and acknowledged rather than redelivered forever
#[tokio::test]
async fn test_invalid_vin_fingerprint_is_acknowledged() {
    let server = build_server(Arc::new(MemoryStore::new()));

    let response = warp::test::request()
        .method("POST")
        .path("/v1/fingerprints")
        .json(&json!({
            "subjectAddress": DUMMY_DEVICE_ADDR.to_uppercase().replace("0X", "0x"),
            "observedVIN": "NOT-A-VIN",
            "timestamp": "2022-02-01T00:00:00Z"
        }))
        .reply(&server.test_routes())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let data = receipt(response.body()).data.unwrap();
    assert_eq!(data.key, DUMMY_DEVICE_ADDR);
    assert!(data.acknowledged);
}

/// What is tested: Unknown path
/// Why: Rejections are rendered as ApiResponse errors
#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let server = build_server(Arc::new(MemoryStore::new()));

    let response = warp::test::request()
        .method("GET")
        .path("/v1/unknown")
        .reply(&server.test_routes())
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["success"], false);
}
