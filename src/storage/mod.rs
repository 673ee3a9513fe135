//! Registry Persistence Layer
//!
//! The relational store is the single source of truth for meta-transaction
//! requests, vehicles, aftermarket devices and issued credentials.
//!
//! ## Architecture
//!
//! Persistence goes through the [`RegistryStore`] trait. [`PgStore`] backs it
//! with PostgreSQL when a database URL is configured; [`MemoryStore`] keeps
//! everything in process memory (development and tests).
//!
//! Every mutation targets a single row except [`RegistryStore::record_credential`],
//! which inserts the credential and moves the vehicle's claim pointer in one
//! atomic unit of work.

use async_trait::async_trait;
use ethereum_types::{Address, H256, U256};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    AftermarketDeviceRecord, CredentialRecord, MetaTransactionRequest, MetaTransactionStatus,
    VehicleRecord,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store failures, split into "row missing" and "store broken".
#[derive(Debug, Error)]
pub enum StoreError {
    /// The keyed row does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// A unique key is already taken
    #[error("conflict: {0}")]
    Conflict(String),
    /// A stored value could not be mapped back into a record
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence operations used by the processor, issuer and fingerprint consumer.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    // Meta-transactions

    async fn insert_meta_transaction(&self, request: &MetaTransactionRequest)
        -> Result<(), StoreError>;

    async fn get_meta_transaction(&self, id: &str)
        -> Result<Option<MetaTransactionRequest>, StoreError>;

    /// Overwrites the status. `transaction_hash` is only recorded when the
    /// row does not carry one yet.
    async fn update_meta_transaction_status(
        &self,
        id: &str,
        status: MetaTransactionStatus,
        transaction_hash: Option<H256>,
    ) -> Result<(), StoreError>;

    // Vehicles

    async fn insert_vehicle(&self, vehicle: &VehicleRecord) -> Result<(), StoreError>;

    async fn get_vehicle(&self, id: i64) -> Result<Option<VehicleRecord>, StoreError>;

    async fn get_vehicle_by_vin(&self, vin: &str) -> Result<Option<VehicleRecord>, StoreError>;

    async fn get_vehicle_by_token(&self, token_id: U256)
        -> Result<Option<VehicleRecord>, StoreError>;

    /// Records the token id and owner from a confirmed mint.
    async fn set_vehicle_minted(
        &self,
        id: i64,
        token_id: U256,
        owner: Address,
    ) -> Result<(), StoreError>;

    // Aftermarket devices

    async fn insert_device(&self, device: &AftermarketDeviceRecord) -> Result<(), StoreError>;

    async fn get_device(&self, serial: &str) -> Result<Option<AftermarketDeviceRecord>, StoreError>;

    async fn get_device_by_address(
        &self,
        address: Address,
    ) -> Result<Option<AftermarketDeviceRecord>, StoreError>;

    /// Records the token id and owner from a confirmed claim.
    async fn set_device_claimed(
        &self,
        serial: &str,
        token_id: U256,
        owner: Address,
    ) -> Result<(), StoreError>;

    /// Sets (pair) or clears (unpair) the paired vehicle token.
    async fn set_device_pairing(
        &self,
        serial: &str,
        vehicle_token: Option<U256>,
    ) -> Result<(), StoreError>;

    // Credentials

    async fn get_credential(&self, claim_id: Uuid) -> Result<Option<CredentialRecord>, StoreError>;

    /// Inserts the credential and points the vehicle with `vin` at it.
    ///
    /// Both writes commit together or not at all. Fails with `NotFound`
    /// when no vehicle has that VIN and with `Conflict` when the claim id
    /// is already stored.
    async fn record_credential(
        &self,
        credential: &CredentialRecord,
        vin: &str,
    ) -> Result<(), StoreError>;
}
