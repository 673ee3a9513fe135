//! Device Cloud Pairing Hook
//!
//! Client for the partner device-integration API. After a pair or unpair
//! transaction is confirmed on-chain the processor tells the device cloud so
//! that telemetry routing follows the new vehicle association.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use ethereum_types::U256;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Pairing hook failures.
#[derive(Debug, Error)]
pub enum DeviceCloudError {
    #[error("device cloud request failed: {0}")]
    Transport(String),
    #[error("device cloud returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Pairing side effects exposed by the device-integration collaborator.
#[async_trait]
pub trait DeviceCloud: Send + Sync {
    /// Associates a device node with a vehicle node.
    async fn pair(&self, device_node: U256, vehicle_node: U256) -> Result<(), DeviceCloudError>;

    /// Removes the association between a device node and a vehicle node.
    async fn unpair(&self, device_node: U256, vehicle_node: U256)
        -> Result<(), DeviceCloudError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PairingRequest {
    vehicle_token_id: String,
}

/// HTTP implementation of [`DeviceCloud`].
///
/// Calls `POST {base_url}/v1/aftermarket/device/{device_node}/pair` (or
/// `/unpair`) with `{"vehicleTokenId": "<vehicle_node>"}`.
pub struct HttpDeviceCloud {
    client: Client,
    base_url: String,
}

impl HttpDeviceCloud {
    /// Creates a client for the device cloud at `base_url`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the device-integration API
    /// * `timeout` - Per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(
        &self,
        action: &str,
        device_node: U256,
        vehicle_node: U256,
    ) -> Result<(), DeviceCloudError> {
        let url = format!(
            "{}/v1/aftermarket/device/{}/{}",
            self.base_url, device_node, action
        );
        let response = self
            .client
            .post(&url)
            .json(&PairingRequest {
                vehicle_token_id: vehicle_node.to_string(),
            })
            .send()
            .await
            .map_err(|e| DeviceCloudError::Transport(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeviceCloudError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            "Device cloud {}: device {} vehicle {}",
            action, device_node, vehicle_node
        );
        Ok(())
    }
}

#[async_trait]
impl DeviceCloud for HttpDeviceCloud {
    async fn pair(&self, device_node: U256, vehicle_node: U256) -> Result<(), DeviceCloudError> {
        self.post("pair", device_node, vehicle_node).await
    }

    async fn unpair(
        &self,
        device_node: U256,
        vehicle_node: U256,
    ) -> Result<(), DeviceCloudError> {
        self.post("unpair", device_node, vehicle_node).await
    }
}
