//! Shared API structures, rejection handling and the server itself.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use warp::{http::StatusCode, Filter, Rejection, Reply};

use crate::config::ApiConfig;
use crate::consumer::PartitionedConsumer;
use crate::fingerprint::FingerprintEvent;
use crate::processor::TransactionStatusEvent;

// ============================================================================
// SHARED REQUEST/RESPONSE STRUCTURES
// ============================================================================

/// Standardized response structure for all API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (if successful)
    pub data: Option<T>,
    /// Error message (if failed)
    pub error: Option<String>,
}

/// Body that does not deserialize into the endpoint's envelope.
#[derive(Debug)]
pub struct JsonDeserializeError(pub String);

impl warp::reject::Reject for JsonDeserializeError {}

// ============================================================================
// REJECTION HANDLER
// ============================================================================

/// Converts warp rejections into `ApiResponse` errors.
pub async fn handle_rejection(rej: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    let (status, message) = if let Some(err) = rej.find::<JsonDeserializeError>() {
        (StatusCode::BAD_REQUEST, err.0.clone())
    } else if let Some(err) = rej.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", err))
    } else if rej.is_not_found() {
        (StatusCode::NOT_FOUND, "Endpoint not found".to_string())
    } else if rej.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", rej);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
        status,
    ))
}

// ============================================================================
// API SERVER IMPLEMENTATION
// ============================================================================

/// Ingestion API in front of the two consumers.
///
/// The relayer posts transaction status events and the telemetry pipeline
/// posts device fingerprints. Each request is answered once its message has
/// been handled, with a status code telling the caller whether to redeliver.
pub struct ApiServer {
    config: ApiConfig,
    status_consumer: Arc<PartitionedConsumer<TransactionStatusEvent>>,
    fingerprint_consumer: Arc<PartitionedConsumer<FingerprintEvent>>,
}

impl ApiServer {
    /// Creates a new API server.
    ///
    /// # Arguments
    ///
    /// * `config` - Listen address
    /// * `status_consumer` - Consumer running the transaction status processor
    /// * `fingerprint_consumer` - Consumer running the fingerprint consumer
    pub fn new(
        config: ApiConfig,
        status_consumer: Arc<PartitionedConsumer<TransactionStatusEvent>>,
        fingerprint_consumer: Arc<PartitionedConsumer<FingerprintEvent>>,
    ) -> Self {
        Self {
            config,
            status_consumer,
            fingerprint_consumer,
        }
    }

    /// Serves until `shutdown` resolves.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Server stopped gracefully
    /// * `Err(anyhow::Error)` - Invalid listen address
    pub async fn run(
        &self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr: std::net::SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Failed to parse API server address")?;
        info!("Starting API server on {}", addr);

        let (_, server) =
            warp::serve(self.create_routes()).bind_with_graceful_shutdown(addr, shutdown);
        server.await;

        info!("API server stopped");
        Ok(())
    }

    pub(crate) fn create_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        use super::ingest;

        let health = warp::path("health").and(warp::get()).map(|| {
            warp::reply::json(&ApiResponse::<String> {
                success: true,
                data: Some("Vehicle registry service is running".to_string()),
                error: None,
            })
        });

        // POST /v1/transactions/status
        let status = warp::path!("v1" / "transactions" / "status")
            .and(warp::post())
            .and(warp::body::bytes())
            .and(ingest::with_consumer(self.status_consumer.clone()))
            .and_then(ingest::transaction_status_handler);

        // POST /v1/fingerprints
        let fingerprints = warp::path!("v1" / "fingerprints")
            .and(warp::post())
            .and(warp::body::bytes())
            .and(ingest::with_consumer(self.fingerprint_consumer.clone()))
            .and_then(ingest::fingerprint_handler);

        health
            .or(status)
            .or(fingerprints)
            .recover(handle_rejection)
    }

    /// Public method for testing - exposes routes for integration tests
    pub fn test_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        self.create_routes()
    }
}
