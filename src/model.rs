//! Registry domain records
//!
//! Records persisted by the [`crate::storage::RegistryStore`]: meta-transaction
//! requests with their subject link, vehicles, aftermarket devices and issued
//! credentials.

use chrono::{DateTime, Utc};
use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// META-TRANSACTION STATUS
// ============================================================================

/// Lifecycle state of a meta-transaction request.
///
/// Transitions only move forward: `Unsubmitted < Submitted < Mined <
/// Confirmed | Failed`. `Confirmed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetaTransactionStatus {
    Unsubmitted,
    Submitted,
    Mined,
    Confirmed,
    Failed,
}

impl MetaTransactionStatus {
    fn rank(self) -> u8 {
        match self {
            MetaTransactionStatus::Unsubmitted => 0,
            MetaTransactionStatus::Submitted => 1,
            MetaTransactionStatus::Mined => 2,
            MetaTransactionStatus::Confirmed | MetaTransactionStatus::Failed => 3,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MetaTransactionStatus::Confirmed | MetaTransactionStatus::Failed
        )
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// Intermediate states may be skipped (a lost `Mined` event must not
    /// block confirmation), but nothing leaves a terminal state.
    pub fn can_advance_to(self, next: MetaTransactionStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Name stored in the `status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            MetaTransactionStatus::Unsubmitted => "Unsubmitted",
            MetaTransactionStatus::Submitted => "Submitted",
            MetaTransactionStatus::Mined => "Mined",
            MetaTransactionStatus::Confirmed => "Confirmed",
            MetaTransactionStatus::Failed => "Failed",
        }
    }
}

impl std::str::FromStr for MetaTransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unsubmitted" => Ok(MetaTransactionStatus::Unsubmitted),
            "Submitted" => Ok(MetaTransactionStatus::Submitted),
            "Mined" => Ok(MetaTransactionStatus::Mined),
            "Confirmed" => Ok(MetaTransactionStatus::Confirmed),
            "Failed" => Ok(MetaTransactionStatus::Failed),
            other => Err(format!("unknown meta-transaction status '{}'", other)),
        }
    }
}

impl std::fmt::Display for MetaTransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// META-TRANSACTION REQUEST
// ============================================================================

/// The record a meta-transaction acts on. At most one per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionSubject {
    /// Vehicle awaiting its NFT token id
    VehicleMint { vehicle_id: i64 },
    /// Device being claimed by an owner
    DeviceClaim { serial: String },
    /// Device being paired with a vehicle
    DevicePair { serial: String },
    /// Device being unpaired from its vehicle
    DeviceUnpair { serial: String },
}

impl TransactionSubject {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TransactionSubject::VehicleMint { .. } => "vehicle_mint",
            TransactionSubject::DeviceClaim { .. } => "device_claim",
            TransactionSubject::DevicePair { .. } => "device_pair",
            TransactionSubject::DeviceUnpair { .. } => "device_unpair",
        }
    }
}

/// A registry operation tracked through its on-chain lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaTransactionRequest {
    /// Opaque request id correlating relayer status events
    pub id: String,
    pub status: MetaTransactionStatus,
    /// Set from the first status event that carries it
    pub transaction_hash: Option<H256>,
    pub subject: Option<TransactionSubject>,
}

impl MetaTransactionRequest {
    /// A freshly requested operation that has not been handed to the relayer.
    pub fn new(id: impl Into<String>, subject: Option<TransactionSubject>) -> Self {
        Self {
            id: id.into(),
            status: MetaTransactionStatus::Unsubmitted,
            transaction_hash: None,
            subject,
        }
    }
}

// ============================================================================
// VEHICLES, DEVICES AND CREDENTIALS
// ============================================================================

/// A vehicle known to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleRecord {
    pub id: i64,
    /// Confirmed VIN
    pub vin: String,
    /// Assigned only when the mint transaction is confirmed
    pub token_id: Option<U256>,
    pub owner: Option<Address>,
    /// Latest issued VIN credential
    pub current_claim_id: Option<Uuid>,
}

impl VehicleRecord {
    /// A vehicle that has not been minted yet.
    pub fn new(id: i64, vin: impl Into<String>) -> Self {
        Self {
            id,
            vin: vin.into(),
            token_id: None,
            owner: None,
            current_claim_id: None,
        }
    }

    /// Whether a non-zero token id has been assigned.
    pub fn is_minted(&self) -> bool {
        matches!(self.token_id, Some(token) if !token.is_zero())
    }
}

/// An aftermarket telemetry device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AftermarketDeviceRecord {
    /// Device serial / unit identifier
    pub serial: String,
    /// Identifier used by the partner device cloud
    pub device_cloud_id: Option<String>,
    /// Address the device signs fingerprints with
    pub ethereum_address: Address,
    pub token_id: Option<U256>,
    pub owner: Option<Address>,
    /// Token id of the vehicle the device is paired with
    pub paired_vehicle_token: Option<U256>,
}

impl AftermarketDeviceRecord {
    /// An unclaimed, unpaired device.
    pub fn new(serial: impl Into<String>, ethereum_address: Address, token_id: Option<U256>) -> Self {
        Self {
            serial: serial.into(),
            device_cloud_id: None,
            ethereum_address,
            token_id,
            owner: None,
            paired_vehicle_token: None,
        }
    }
}

/// A signed VIN credential. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub claim_id: Uuid,
    /// Full JSON-LD document with embedded proof
    pub credential: Vec<u8>,
    pub expiration_date: DateTime<Utc>,
}
