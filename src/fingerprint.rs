//! Fingerprint Consumer
//!
//! Turns device telemetry into VIN credential issuance. A fingerprint from a
//! paired device whose observed VIN matches the vehicle's confirmed VIN
//! triggers issuance, at most once per vehicle per reward week.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::consumer::{MessageHandler, Outcome};
use crate::credential::CredentialIssuer;
use crate::crypto::parse_address;
use crate::error::ProcessingError;
use crate::storage::RegistryStore;

/// Start of reward week 0 (2022-01-31T05:00:00Z) as Unix seconds.
pub const REWARD_EPOCH_UNIX: i64 = 1_643_605_200;

pub const REWARD_WEEK_DAYS: i64 = 7;

/// Device fingerprint as delivered on the telemetry channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintEvent {
    /// Address the device signs with
    #[serde(rename = "subjectAddress")]
    pub subject_address: String,
    #[serde(rename = "observedVIN")]
    pub observed_vin: String,
    pub timestamp: DateTime<Utc>,
}

/// Whether `vin` is a syntactically valid 17 character VIN (no I, O or Q).
pub fn is_valid_vin(vin: &str) -> bool {
    vin.len() == 17
        && vin
            .bytes()
            .all(|b| (b.is_ascii_uppercase() && !matches!(b, b'I' | b'O' | b'Q')) || b.is_ascii_digit())
}

pub fn reward_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default() + Duration::seconds(REWARD_EPOCH_UNIX)
}

/// A fixed seven day accounting interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardWeek {
    pub number: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The reward week containing `at`.
pub fn reward_week(at: DateTime<Utc>) -> RewardWeek {
    let epoch = reward_epoch();
    let length = Duration::days(REWARD_WEEK_DAYS);
    let number = (at - epoch)
        .num_seconds()
        .div_euclid(length.num_seconds());
    let start = epoch + length * number as i32;
    RewardWeek {
        number,
        start,
        end: start + length,
    }
}

/// What a fingerprint led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintDecision {
    InvalidVin,
    /// Device is not paired with a vehicle
    Unpaired,
    /// Observed VIN differs from the vehicle's confirmed VIN
    VinMismatch,
    /// Current credential stays valid past the end of this reward week
    AlreadyIssued,
    Issued(Uuid),
}

pub struct FingerprintConsumer {
    store: Arc<dyn RegistryStore>,
    issuer: Arc<dyn CredentialIssuer>,
}

impl FingerprintConsumer {
    pub fn new(store: Arc<dyn RegistryStore>, issuer: Arc<dyn CredentialIssuer>) -> Self {
        Self { store, issuer }
    }

    pub async fn process(
        &self,
        event: &FingerprintEvent,
    ) -> Result<FingerprintDecision, ProcessingError> {
        self.process_at(event, Utc::now()).await
    }

    /// Processes one fingerprint against the reward week containing `now`.
    ///
    /// # Returns
    ///
    /// * `Ok(FingerprintDecision)` - Issued, or why nothing was issued
    /// * `Err(ProcessingError::Lookup)` - Device or paired vehicle not stored (yet)
    /// * `Err(ProcessingError::Decode)` - Subject address is not an address
    pub async fn process_at(
        &self,
        event: &FingerprintEvent,
        now: DateTime<Utc>,
    ) -> Result<FingerprintDecision, ProcessingError> {
        let vin = event.observed_vin.trim().to_ascii_uppercase();
        if !is_valid_vin(&vin) {
            warn!(
                "Fingerprint from {} carries invalid VIN '{}'",
                event.subject_address, event.observed_vin
            );
            return Ok(FingerprintDecision::InvalidVin);
        }

        let address = parse_address(&event.subject_address).map_err(ProcessingError::Decode)?;
        let device = self
            .store
            .get_device_by_address(address)
            .await?
            .ok_or_else(|| {
                ProcessingError::Lookup(format!("device with address {}", event.subject_address))
            })?;

        let vehicle_token = match device.paired_vehicle_token {
            Some(token) => token,
            None => {
                warn!("Fingerprint from unpaired device {}", device.serial);
                return Ok(FingerprintDecision::Unpaired);
            }
        };
        let vehicle = self
            .store
            .get_vehicle_by_token(vehicle_token)
            .await?
            .ok_or_else(|| ProcessingError::Lookup(format!("vehicle with token {}", vehicle_token)))?;

        if vehicle.vin != vin {
            warn!(
                "Device {} observed VIN {} but vehicle {} has VIN {}",
                device.serial, vin, vehicle.id, vehicle.vin
            );
            return Ok(FingerprintDecision::VinMismatch);
        }

        let week = reward_week(now);
        if let Some(claim_id) = vehicle.current_claim_id {
            if let Some(current) = self.store.get_credential(claim_id).await? {
                if current.expiration_date >= week.end {
                    debug!(
                        "Vehicle {} already holds credential {} for week {}",
                        vehicle.id, claim_id, week.number
                    );
                    return Ok(FingerprintDecision::AlreadyIssued);
                }
            }
        }

        let claim_id = self
            .issuer
            .issue_vin_credential(&vehicle.vin, vehicle_token)
            .await?;
        info!(
            "Vehicle {} received credential {} in reward week {}",
            vehicle.id, claim_id, week.number
        );
        Ok(FingerprintDecision::Issued(claim_id))
    }
}

#[async_trait]
impl MessageHandler<FingerprintEvent> for FingerprintConsumer {
    async fn handle(&self, event: FingerprintEvent) -> Outcome {
        Outcome::from_result(self.process(&event).await.map(|_| ()))
    }
}
