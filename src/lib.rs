//! Vehicle Registry Service Library
//!
//! Off-chain half of the vehicle/device registry: EIP-712 signing payloads
//! for registry meta-transactions, tracking of those transactions through
//! relayer status events, and W3C VIN credentials issued from device
//! telemetry.

pub mod abi;
pub mod api;
pub mod config;
pub mod consumer;
pub mod credential;
pub mod crypto;
pub mod devicecloud;
pub mod eip712;
pub mod error;
pub mod fingerprint;
pub mod model;
pub mod processor;
pub mod registry;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use consumer::{MessageHandler, Outcome, PartitionedConsumer};
pub use credential::{CredentialError, CredentialIssuer, VinCredentialIssuer};
pub use crypto::IssuerKey;
pub use eip712::{Eip712Domain, RegistryMessage};
pub use error::ProcessingError;
pub use fingerprint::{FingerprintConsumer, FingerprintEvent};
pub use processor::{TransactionStatusEvent, TransactionStatusProcessor};
pub use registry::RegistryClient;
pub use storage::{MemoryStore, PgStore, RegistryStore, StoreError};
