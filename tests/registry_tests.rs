//! Integration tests for the registry client
//!
//! Call encoding, signature checks, and the submit path through a recording
//! sink and an HTTP relayer mock.

use std::sync::Arc;
use std::time::Duration;

use ethereum_types::U256;
use serde_json::json;
use vehicle_registry::crypto::keccak256;
use vehicle_registry::eip712::{DeviceVehicleNodes, MintVehicle, RegistryMessage};
use vehicle_registry::model::{MetaTransactionStatus, TransactionSubject};
use vehicle_registry::registry::{
    ClientError, HttpTransactionSink, RegistryClient, SinkError, TransactionRequest,
    TransactionSink,
};
use vehicle_registry::storage::{MemoryStore, RegistryStore, StoreError};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{
    address, registry_contract, test_domain, RecordingSink, DUMMY_DEVICE_NODE,
    DUMMY_DEVICE_SERIAL, DUMMY_OWNER_ADDR, DUMMY_REGISTRY_ADDR, DUMMY_REQUEST_ID,
    DUMMY_VEHICLE_TOKEN,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn pair_message() -> RegistryMessage {
    RegistryMessage::PairDevice(DeviceVehicleNodes {
        device_node: U256::from(DUMMY_DEVICE_NODE),
        vehicle_node: U256::from(DUMMY_VEHICLE_TOKEN),
    })
}

fn signature() -> Vec<u8> {
    let mut signature = vec![0x11u8; 64];
    signature.push(27);
    signature
}

fn client(store: Arc<MemoryStore>, sink: Arc<RecordingSink>) -> RegistryClient {
    RegistryClient::new(test_domain(), registry_contract(), store, sink)
}

// ============================================================================
// CALL ENCODING
// ============================================================================

/// What is tested: Pair call encoding with a 65-byte signature
/// Why: The relayer sends this data unchanged, so selector, target and layout must be exact
#[test]
fn test_build_call_encodes_pair() {
    let client = client(Arc::new(MemoryStore::new()), Arc::new(RecordingSink::default()));

    let request = client
        .build_call(DUMMY_REQUEST_ID, &pair_message(), &signature())
        .unwrap();

    assert_eq!(
        pair_message().function_signature(),
        "pairAftermarketDeviceSign(uint256,uint256,bytes)"
    );
    let digest = keccak256(pair_message().function_signature().as_bytes());
    let selector = &digest[..4];
    assert_eq!(request.request_id, DUMMY_REQUEST_ID);
    assert_eq!(request.target_address, DUMMY_REGISTRY_ADDR);
    assert!(request
        .encoded_call_data
        .starts_with(&format!("0x{}", hex::encode(selector))));

    // selector, two uints, bytes offset, bytes length, 65 bytes padded to 96
    let data = hex::decode(request.encoded_call_data.trim_start_matches("0x")).unwrap();
    assert_eq!(data.len(), 4 + 32 * 3 + 32 + 96);
    assert_eq!(U256::from_big_endian(&data[4..36]), U256::from(DUMMY_DEVICE_NODE));
    assert_eq!(U256::from_big_endian(&data[36..68]), U256::from(DUMMY_VEHICLE_TOKEN));
    assert_eq!(U256::from_big_endian(&data[100..132]), U256::from(65u64));
}

/// What is tested: Signatures that are not 65 bytes
/// Why: A short signature would only fail on-chain after paying gas
#[test]
fn test_build_call_rejects_bad_signature() {
    let client = client(Arc::new(MemoryStore::new()), Arc::new(RecordingSink::default()));

    let err = client
        .build_call(DUMMY_REQUEST_ID, &pair_message(), &[0u8; 64])
        .unwrap_err();
    assert!(matches!(err, ClientError::Encoding(_)));
}

/// What is tested: Mint with mismatched attributes and infos
/// Why: Typed-data validation failures are encoding errors
#[test]
fn test_build_call_rejects_mismatched_mint() {
    let client = client(Arc::new(MemoryStore::new()), Arc::new(RecordingSink::default()));
    let message = RegistryMessage::MintVehicle(MintVehicle {
        manufacturer_node: U256::from(42u64),
        owner: address(DUMMY_OWNER_ADDR),
        attributes: vec!["Make".to_string()],
        infos: vec![],
    });

    assert!(matches!(
        client.build_call(DUMMY_REQUEST_ID, &message, &signature()),
        Err(ClientError::Encoding(_))
    ));
    assert!(client.hash(&message).is_err());
}

// ============================================================================
// SUBMIT
// ============================================================================

/// What is tested: Submitting a pair request
/// Why: The request is recorded as Unsubmitted with its subject and published once
#[tokio::test]
async fn test_submit_records_and_publishes() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let client = client(store.clone(), sink.clone());
    let subject = TransactionSubject::DevicePair {
        serial: DUMMY_DEVICE_SERIAL.to_string(),
    };

    let request = client
        .submit(DUMMY_REQUEST_ID, &pair_message(), &signature(), Some(subject.clone()))
        .await
        .unwrap();

    let stored = store
        .get_meta_transaction(DUMMY_REQUEST_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, MetaTransactionStatus::Unsubmitted);
    assert_eq!(stored.subject, Some(subject));
    assert_eq!(stored.transaction_hash, None);

    let published = sink.published.lock().unwrap().clone();
    assert_eq!(published, vec![request]);
}

/// What is tested: Submitting with a bad signature
/// Why: Encoding failures are detected before anything is written or published
#[tokio::test]
async fn test_submit_encoding_failure_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let client = client(store.clone(), sink.clone());

    let err = client
        .submit(DUMMY_REQUEST_ID, &pair_message(), &[1u8; 10], None)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Encoding(_)));
    assert!(store
        .get_meta_transaction(DUMMY_REQUEST_ID)
        .await
        .unwrap()
        .is_none());
    assert!(sink.published.lock().unwrap().is_empty());
}

/// What is tested: Relayer rejects the first publish, then the caller submits again
/// Why: The unpublished request keeps its row and goes out under the same request id
#[tokio::test]
async fn test_submit_after_failed_publish_republishes() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/transactions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("relayer down"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/transactions"))
        .and(header("X-Request-ID", DUMMY_REQUEST_ID))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(
        HttpTransactionSink::new(
            &format!("{}/v1/transactions", mock_server.uri()),
            Duration::from_secs(5),
        )
        .unwrap(),
    );
    let client = RegistryClient::new(test_domain(), registry_contract(), store.clone(), sink);
    let subject = TransactionSubject::DevicePair {
        serial: DUMMY_DEVICE_SERIAL.to_string(),
    };

    let err = client
        .submit(DUMMY_REQUEST_ID, &pair_message(), &signature(), Some(subject.clone()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Publish(SinkError::Rejected { status: 500, .. })
    ));
    let stored = store
        .get_meta_transaction(DUMMY_REQUEST_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, MetaTransactionStatus::Unsubmitted);

    let request = client
        .submit(DUMMY_REQUEST_ID, &pair_message(), &signature(), Some(subject.clone()))
        .await
        .unwrap();
    assert_eq!(request.request_id, DUMMY_REQUEST_ID);

    let stored = store
        .get_meta_transaction(DUMMY_REQUEST_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, MetaTransactionStatus::Unsubmitted);
    assert_eq!(stored.subject, Some(subject));
}

/// What is tested: Reusing a request id that the relayer already picked up or that names another subject
/// Why: Only an unpublished request for the same subject may be sent again
#[tokio::test]
async fn test_submit_reused_request_id_conflicts() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let client = client(store.clone(), sink.clone());
    let subject = TransactionSubject::DevicePair {
        serial: DUMMY_DEVICE_SERIAL.to_string(),
    };

    client
        .submit(DUMMY_REQUEST_ID, &pair_message(), &signature(), Some(subject.clone()))
        .await
        .unwrap();

    let other_subject = TransactionSubject::DeviceUnpair {
        serial: DUMMY_DEVICE_SERIAL.to_string(),
    };
    let err = client
        .submit(DUMMY_REQUEST_ID, &pair_message(), &signature(), Some(other_subject))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Store(StoreError::Conflict(_))));

    store
        .update_meta_transaction_status(DUMMY_REQUEST_ID, MetaTransactionStatus::Submitted, None)
        .await
        .unwrap();
    let err = client
        .submit(DUMMY_REQUEST_ID, &pair_message(), &signature(), Some(subject))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Store(StoreError::Conflict(_))));

    assert_eq!(sink.published.lock().unwrap().len(), 1);
}

// ============================================================================
// HTTP SINK
// ============================================================================

/// What is tested: Publishing to the relayer over HTTP
/// Why: The relayer keys requests by the X-Request-ID header and expects the JSON envelope
#[tokio::test]
async fn test_http_sink_posts_envelope() {
    let mock_server = MockServer::start().await;
    let request = TransactionRequest {
        request_id: DUMMY_REQUEST_ID.to_string(),
        target_address: DUMMY_REGISTRY_ADDR.to_string(),
        encoded_call_data: "0xdeadbeef".to_string(),
    };

    Mock::given(method("POST"))
        .and(path("/v1/transactions"))
        .and(header("X-Request-ID", DUMMY_REQUEST_ID))
        .and(body_json(json!({
            "requestID": DUMMY_REQUEST_ID,
            "targetAddress": DUMMY_REGISTRY_ADDR,
            "encodedCallData": "0xdeadbeef"
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&mock_server)
        .await;

    let sink = HttpTransactionSink::new(
        &format!("{}/v1/transactions", mock_server.uri()),
        Duration::from_secs(5),
    )
    .unwrap();
    sink.publish(&request).await.unwrap();
}

/// What is tested: Relayer answering with an error status
/// Why: Rejections surface with the HTTP status for the caller to report
#[tokio::test]
async fn test_http_sink_rejection() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&mock_server)
        .await;

    let sink = HttpTransactionSink::new(&mock_server.uri(), Duration::from_secs(5)).unwrap();
    let err = sink
        .publish(&TransactionRequest {
            request_id: DUMMY_REQUEST_ID.to_string(),
            target_address: DUMMY_REGISTRY_ADDR.to_string(),
            encoded_call_data: "0x".to_string(),
        })
        .await
        .unwrap_err();

    match err {
        SinkError::Rejected { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, "bad request");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}
