//! Outbound transaction request channel.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Envelope handed to the relayer. Submission, gas and nonce management
/// happen on the relayer side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    #[serde(rename = "requestID")]
    pub request_id: String,
    /// 0x-prefixed registry contract address
    #[serde(rename = "targetAddress")]
    pub target_address: String,
    /// 0x-prefixed call data (selector and arguments)
    #[serde(rename = "encodedCallData")]
    pub encoded_call_data: String,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to publish transaction request: {0}")]
    Transport(String),
    #[error("relayer rejected transaction request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Publishes transaction requests keyed by request id.
#[async_trait]
pub trait TransactionSink: Send + Sync {
    async fn publish(&self, request: &TransactionRequest) -> Result<(), SinkError>;
}

/// POSTs transaction requests to the relayer as JSON.
pub struct HttpTransactionSink {
    client: Client,
    url: String,
}

impl HttpTransactionSink {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl TransactionSink for HttpTransactionSink {
    async fn publish(&self, request: &TransactionRequest) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .header("X-Request-ID", &request.request_id)
            .json(request)
            .send()
            .await
            .map_err(|e| SinkError::Transport(format!("{}: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!("Published transaction request {}", request.request_id);
        Ok(())
    }
}
