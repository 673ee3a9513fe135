//! Transaction Status Processor
//!
//! Tracks each meta-transaction request through `Submitted → Mined →
//! Confirmed | Failed` as relayer status events arrive, and applies the
//! on-chain result once a transaction is confirmed:
//!
//! - mint confirmed: the vehicle gets its token id and owner
//! - claim confirmed: the device gets its token id and owner
//! - pair / unpair confirmed: the device's paired vehicle is set or cleared
//!   and the device cloud is told
//!
//! ## Delivery semantics
//!
//! Events are delivered at least once. The confirmation side effects run
//! before the status row is written, so a failure leaves the request
//! non-terminal and the redelivered event applies them again (every effect
//! is idempotent). Once the request is terminal, further events are
//! acknowledged without touching anything.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::abi::{Log, RegistryContract, RegistryEvent, RegistryEventKind};
use crate::consumer::{MessageHandler, Outcome};
use crate::crypto::{decode_hex, parse_address, parse_h256};
use crate::devicecloud::DeviceCloud;
use crate::error::ProcessingError;
use crate::model::{MetaTransactionRequest, MetaTransactionStatus, TransactionSubject};
use crate::storage::RegistryStore;

// ============================================================================
// INBOUND STATUS EVENTS
// ============================================================================

/// Status reported by the relayer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusEventType {
    Submitted,
    Mined,
    Confirmed,
    Failed,
}

impl StatusEventType {
    pub fn status(self) -> MetaTransactionStatus {
        match self {
            StatusEventType::Submitted => MetaTransactionStatus::Submitted,
            StatusEventType::Mined => MetaTransactionStatus::Mined,
            StatusEventType::Confirmed => MetaTransactionStatus::Confirmed,
            StatusEventType::Failed => MetaTransactionStatus::Failed,
        }
    }
}

/// Event log as carried on the wire (hex strings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
}

impl RawLog {
    pub fn parse(&self) -> Result<Log, String> {
        Ok(Log {
            address: parse_address(&self.address)?,
            topics: self
                .topics
                .iter()
                .map(|t| parse_h256(t))
                .collect::<Result<Vec<_>, _>>()?,
            data: decode_hex(&self.data)?,
        })
    }
}

/// Transaction details attached to a status event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransaction {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub logs: Vec<RawLog>,
    /// Revert payload of a failed call, when the relayer has it
    #[serde(rename = "revertData", default, skip_serializing_if = "Option::is_none")]
    pub revert_data: Option<String>,
}

/// Relayer status event keyed by request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStatusEvent {
    #[serde(rename = "requestID")]
    pub request_id: String,
    #[serde(rename = "type")]
    pub kind: StatusEventType,
    #[serde(default)]
    pub transaction: StatusTransaction,
}

/// What processing an event did to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    Advanced {
        from: MetaTransactionStatus,
        to: MetaTransactionStatus,
    },
    /// Duplicate, stale or post-terminal event
    Unchanged { current: MetaTransactionStatus },
}

// ============================================================================
// PROCESSOR
// ============================================================================

/// Applies relayer status events to meta-transaction requests.
pub struct TransactionStatusProcessor {
    store: Arc<dyn RegistryStore>,
    contract: Arc<RegistryContract>,
    device_cloud: Arc<dyn DeviceCloud>,
}

impl TransactionStatusProcessor {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        contract: Arc<RegistryContract>,
        device_cloud: Arc<dyn DeviceCloud>,
    ) -> Self {
        Self {
            store,
            contract,
            device_cloud,
        }
    }

    /// Processes one status event.
    ///
    /// # Returns
    ///
    /// * `Ok(StatusUpdate)` - Transition applied or event ignored
    /// * `Err(ProcessingError)` - Lookup / persistence / device cloud failures
    ///   (retryable) or malformed payloads (terminal)
    pub async fn process(
        &self,
        event: &TransactionStatusEvent,
    ) -> Result<StatusUpdate, ProcessingError> {
        let request = self
            .store
            .get_meta_transaction(&event.request_id)
            .await?
            .ok_or_else(|| {
                ProcessingError::Lookup(format!("meta-transaction {}", event.request_id))
            })?;

        let next = event.kind.status();
        if !request.status.can_advance_to(next) {
            debug!(
                "Request {} is {}; ignoring {} event",
                request.id, request.status, next
            );
            return Ok(StatusUpdate::Unchanged {
                current: request.status,
            });
        }

        let transaction_hash = event
            .transaction
            .hash
            .as_deref()
            .filter(|h| !h.is_empty())
            .map(parse_h256)
            .transpose()
            .map_err(ProcessingError::Decode)?;

        match next {
            MetaTransactionStatus::Confirmed => {
                self.apply_confirmation(&request, &event.transaction).await?
            }
            MetaTransactionStatus::Failed => self.log_failure(&request, &event.transaction),
            _ => {}
        }

        self.store
            .update_meta_transaction_status(&request.id, next, transaction_hash)
            .await?;

        info!("Request {}: {} -> {}", request.id, request.status, next);
        Ok(StatusUpdate::Advanced {
            from: request.status,
            to: next,
        })
    }

    async fn apply_confirmation(
        &self,
        request: &MetaTransactionRequest,
        transaction: &StatusTransaction,
    ) -> Result<(), ProcessingError> {
        let subject = match &request.subject {
            Some(subject) => subject,
            None => {
                warn!("Request {} confirmed without a subject record", request.id);
                return Ok(());
            }
        };

        let kind = expected_event(subject);
        let logs = candidate_logs(kind, &transaction.logs)?;
        let event = match self.contract.find_event(kind, &logs)? {
            Some(event) => event,
            None => {
                warn!(
                    "Request {} ({}) confirmed without a {} log; no side effect applied",
                    request.id,
                    subject.kind(),
                    kind.name()
                );
                return Ok(());
            }
        };

        match (subject, event) {
            (
                TransactionSubject::VehicleMint { vehicle_id },
                RegistryEvent::VehicleNodeMinted { token_id, owner },
            ) => {
                self.store
                    .set_vehicle_minted(*vehicle_id, token_id, owner)
                    .await?;
                info!("Vehicle {} minted as token {}", vehicle_id, token_id);
            }
            (
                TransactionSubject::DeviceClaim { serial },
                RegistryEvent::AftermarketDeviceClaimed { device_node, owner },
            ) => {
                self.store
                    .set_device_claimed(serial, device_node, owner)
                    .await?;
                info!("Device {} claimed as node {}", serial, device_node);
            }
            (
                TransactionSubject::DevicePair { serial },
                RegistryEvent::AftermarketDevicePaired {
                    device_node,
                    vehicle_node,
                    ..
                },
            ) => {
                self.store
                    .set_device_pairing(serial, Some(vehicle_node))
                    .await?;
                self.device_cloud.pair(device_node, vehicle_node).await?;
                info!("Device {} paired with vehicle {}", serial, vehicle_node);
            }
            (
                TransactionSubject::DeviceUnpair { serial },
                RegistryEvent::AftermarketDeviceUnpaired {
                    device_node,
                    vehicle_node,
                    ..
                },
            ) => {
                self.store.set_device_pairing(serial, None).await?;
                self.device_cloud.unpair(device_node, vehicle_node).await?;
                info!("Device {} unpaired from vehicle {}", serial, vehicle_node);
            }
            (subject, event) => {
                return Err(ProcessingError::Decode(format!(
                    "{:?} does not match subject {:?}",
                    event, subject
                )))
            }
        }

        Ok(())
    }

    fn log_failure(&self, request: &MetaTransactionRequest, transaction: &StatusTransaction) {
        let revert = match transaction.revert_data.as_deref().filter(|d| !d.is_empty()) {
            Some(revert) => revert,
            None => {
                warn!("Request {} failed on-chain", request.id);
                return;
            }
        };

        let reason = decode_hex(revert)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                self.contract
                    .decode_revert(&bytes)
                    .map_err(|e| e.to_string())
            });
        match reason {
            Ok(reason) => warn!("Request {} failed on-chain: {}", request.id, reason),
            Err(e) => warn!(
                "Request {} failed on-chain with undecodable revert data {}: {}",
                request.id, revert, e
            ),
        }
    }
}

/// Parses the logs whose first topic is `kind`'s signature hash.
///
/// Other logs are never parsed, so a malformed log from an unrelated event
/// cannot fail the confirmation. A malformed candidate is a decode error.
fn candidate_logs(kind: RegistryEventKind, logs: &[RawLog]) -> Result<Vec<Log>, ProcessingError> {
    let topic = kind.topic();
    let mut candidates = Vec::new();
    for raw in logs {
        match raw.topics.first().map(|t| parse_h256(t)) {
            Some(Ok(first)) if first == topic => {
                let log = raw.parse().map_err(|e| {
                    ProcessingError::Decode(format!("malformed {} log: {}", kind.name(), e))
                })?;
                candidates.push(log);
            }
            Some(Err(e)) => debug!("Skipping log from {} with malformed topic: {}", raw.address, e),
            _ => {}
        }
    }
    Ok(candidates)
}

/// The event that confirms each kind of subject.
fn expected_event(subject: &TransactionSubject) -> RegistryEventKind {
    match subject {
        TransactionSubject::VehicleMint { .. } => RegistryEventKind::VehicleNodeMinted,
        TransactionSubject::DeviceClaim { .. } => RegistryEventKind::AftermarketDeviceClaimed,
        TransactionSubject::DevicePair { .. } => RegistryEventKind::AftermarketDevicePaired,
        TransactionSubject::DeviceUnpair { .. } => RegistryEventKind::AftermarketDeviceUnpaired,
    }
}

#[async_trait]
impl MessageHandler<TransactionStatusEvent> for TransactionStatusProcessor {
    async fn handle(&self, event: TransactionStatusEvent) -> Outcome {
        Outcome::from_result(self.process(&event).await.map(|_| ()))
    }
}
