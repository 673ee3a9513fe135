//! Processing error taxonomy
//!
//! Every consumer handler reports failures through [`ProcessingError`]. The
//! category decides whether the inbound message is acknowledged (encoding,
//! decode and signing failures will not improve on retry) or left for
//! redelivery (lookups racing the write path, database and partner-cloud
//! outages).

use thiserror::Error;

use crate::abi::AbiError;
use crate::credential::CredentialError;
use crate::devicecloud::DeviceCloudError;
use crate::storage::StoreError;

/// Failure while handling a registry message.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Malformed typed-data arguments or ABI packing failure
    #[error("encoding error: {0}")]
    Encoding(String),
    /// A present log or payload that does not unpack against its expected shape
    #[error("decode error: {0}")]
    Decode(String),
    /// A keyed record does not exist (yet)
    #[error("lookup error: {0}")]
    Lookup(String),
    /// The relational store failed
    #[error("persistence error: {0}")]
    Persistence(String),
    /// Canonicalization or ECDSA failure during credential issuance
    #[error("signing error: {0}")]
    Signing(String),
    /// The partner device cloud rejected or did not answer a pairing call
    #[error("device cloud error: {0}")]
    DeviceCloud(String),
}

impl ProcessingError {
    /// True when a later redelivery of the same message may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProcessingError::Lookup(_)
                | ProcessingError::Persistence(_)
                | ProcessingError::DeviceCloud(_)
        )
    }
}

impl From<StoreError> for ProcessingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ProcessingError::Lookup(what),
            other => ProcessingError::Persistence(other.to_string()),
        }
    }
}

impl From<DeviceCloudError> for ProcessingError {
    fn from(err: DeviceCloudError) -> Self {
        ProcessingError::DeviceCloud(err.to_string())
    }
}

impl From<CredentialError> for ProcessingError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::VehicleNotFound(vin) => {
                ProcessingError::Lookup(format!("no vehicle with VIN {}", vin))
            }
            CredentialError::NotMinted(vin) => {
                ProcessingError::Lookup(format!("vehicle with VIN {} has no token id", vin))
            }
            CredentialError::Store(store) => ProcessingError::from(store),
            other => ProcessingError::Signing(other.to_string()),
        }
    }
}

impl From<AbiError> for ProcessingError {
    fn from(err: AbiError) -> Self {
        ProcessingError::Decode(err.to_string())
    }
}
