//! Ingestion handlers
//!
//! Each handler deserializes an envelope, delivers it to the partition owning
//! its key and maps the handler's [`Outcome`] onto the HTTP status:
//!
//! - `Success`, `Terminal` → 200 (the message is acknowledged)
//! - `Retryable` → 503 (the caller redelivers later)

use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error};
use warp::hyper::body::Bytes;
use warp::{http::StatusCode, Filter};

use super::generic::{ApiResponse, JsonDeserializeError};
use crate::consumer::{Outcome, PartitionedConsumer};
use crate::fingerprint::FingerprintEvent;
use crate::processor::TransactionStatusEvent;

/// Acknowledgement returned to the caller.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct DeliveryReceipt {
    /// Partition key the message was routed by
    pub key: String,
    /// `success`, `terminal` or `retryable`
    pub outcome: String,
    pub acknowledged: bool,
}

pub fn with_consumer<M: Send + 'static>(
    consumer: Arc<PartitionedConsumer<M>>,
) -> impl Filter<Extract = (Arc<PartitionedConsumer<M>>,), Error = Infallible> + Clone {
    warp::any().map(move || consumer.clone())
}

fn parse<T: serde::de::DeserializeOwned>(route: &str, body: &Bytes) -> Result<T, warp::Rejection> {
    serde_json::from_slice::<T>(body).map_err(|e| {
        error!(
            "POST {} - deserialization failed: {}. Body: {}",
            route,
            e,
            String::from_utf8_lossy(body)
        );
        warp::reject::custom(JsonDeserializeError(format!("Invalid JSON: {}", e)))
    })
}

fn receipt(key: String, outcome: Outcome) -> warp::reply::WithStatus<warp::reply::Json> {
    let status = if outcome.acknowledges() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let error = match &outcome {
        Outcome::Success => None,
        Outcome::Terminal(reason) | Outcome::Retryable(reason) => Some(reason.clone()),
    };
    let body = ApiResponse {
        success: matches!(outcome, Outcome::Success),
        data: Some(DeliveryReceipt {
            key,
            outcome: outcome.label().to_string(),
            acknowledged: outcome.acknowledges(),
        }),
        error,
    };
    warp::reply::with_status(warp::reply::json(&body), status)
}

/// Handler for `POST /v1/transactions/status`, keyed by request id.
pub async fn transaction_status_handler(
    body: Bytes,
    consumer: Arc<PartitionedConsumer<TransactionStatusEvent>>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let event: TransactionStatusEvent = parse("/v1/transactions/status", &body)?;
    debug!("Status event {:?} for request {}", event.kind, event.request_id);

    let key = event.request_id.clone();
    let outcome = consumer.deliver(&key, event).await;
    Ok(receipt(key, outcome))
}

/// Handler for `POST /v1/fingerprints`, keyed by device address.
pub async fn fingerprint_handler(
    body: Bytes,
    consumer: Arc<PartitionedConsumer<FingerprintEvent>>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let event: FingerprintEvent = parse("/v1/fingerprints", &body)?;
    debug!("Fingerprint from {}", event.subject_address);

    let key = event.subject_address.to_lowercase();
    let outcome = consumer.deliver(&key, event).await;
    Ok(receipt(key, outcome))
}
