//! In-memory registry store.

use std::collections::HashMap;

use async_trait::async_trait;
use ethereum_types::{Address, H256, U256};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RegistryStore, StoreError};
use crate::model::{
    AftermarketDeviceRecord, CredentialRecord, MetaTransactionRequest, MetaTransactionStatus,
    VehicleRecord,
};

#[derive(Debug, Default)]
struct Tables {
    meta_transactions: HashMap<String, MetaTransactionRequest>,
    vehicles: HashMap<i64, VehicleRecord>,
    devices: HashMap<String, AftermarketDeviceRecord>,
    credentials: HashMap<Uuid, CredentialRecord>,
}

/// Registry store held in process memory.
///
/// All tables sit behind one lock, so multi-row operations are atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored credentials.
    pub async fn credential_count(&self) -> usize {
        self.tables.read().await.credentials.len()
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn insert_meta_transaction(
        &self,
        request: &MetaTransactionRequest,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.meta_transactions.contains_key(&request.id) {
            return Err(StoreError::Conflict(format!(
                "meta-transaction {} already exists",
                request.id
            )));
        }
        tables
            .meta_transactions
            .insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn get_meta_transaction(
        &self,
        id: &str,
    ) -> Result<Option<MetaTransactionRequest>, StoreError> {
        Ok(self.tables.read().await.meta_transactions.get(id).cloned())
    }

    async fn update_meta_transaction_status(
        &self,
        id: &str,
        status: MetaTransactionStatus,
        transaction_hash: Option<H256>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let request = tables
            .meta_transactions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("meta-transaction {}", id)))?;
        request.status = status;
        if request.transaction_hash.is_none() {
            request.transaction_hash = transaction_hash;
        }
        Ok(())
    }

    async fn insert_vehicle(&self, vehicle: &VehicleRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.vehicles.contains_key(&vehicle.id)
            || tables.vehicles.values().any(|v| v.vin == vehicle.vin)
        {
            return Err(StoreError::Conflict(format!(
                "vehicle {} / VIN {} already exists",
                vehicle.id, vehicle.vin
            )));
        }
        tables.vehicles.insert(vehicle.id, vehicle.clone());
        Ok(())
    }

    async fn get_vehicle(&self, id: i64) -> Result<Option<VehicleRecord>, StoreError> {
        Ok(self.tables.read().await.vehicles.get(&id).cloned())
    }

    async fn get_vehicle_by_vin(&self, vin: &str) -> Result<Option<VehicleRecord>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .vehicles
            .values()
            .find(|v| v.vin == vin)
            .cloned())
    }

    async fn get_vehicle_by_token(
        &self,
        token_id: U256,
    ) -> Result<Option<VehicleRecord>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .vehicles
            .values()
            .find(|v| v.token_id == Some(token_id))
            .cloned())
    }

    async fn set_vehicle_minted(
        &self,
        id: i64,
        token_id: U256,
        owner: Address,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let vehicle = tables
            .vehicles
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("vehicle {}", id)))?;
        vehicle.token_id = Some(token_id);
        vehicle.owner = Some(owner);
        Ok(())
    }

    async fn insert_device(&self, device: &AftermarketDeviceRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.devices.contains_key(&device.serial)
            || tables
                .devices
                .values()
                .any(|d| d.ethereum_address == device.ethereum_address)
        {
            return Err(StoreError::Conflict(format!(
                "device {} already exists",
                device.serial
            )));
        }
        tables.devices.insert(device.serial.clone(), device.clone());
        Ok(())
    }

    async fn get_device(&self, serial: &str) -> Result<Option<AftermarketDeviceRecord>, StoreError> {
        Ok(self.tables.read().await.devices.get(serial).cloned())
    }

    async fn get_device_by_address(
        &self,
        address: Address,
    ) -> Result<Option<AftermarketDeviceRecord>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .devices
            .values()
            .find(|d| d.ethereum_address == address)
            .cloned())
    }

    async fn set_device_claimed(
        &self,
        serial: &str,
        token_id: U256,
        owner: Address,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let device = tables
            .devices
            .get_mut(serial)
            .ok_or_else(|| StoreError::NotFound(format!("device {}", serial)))?;
        device.token_id = Some(token_id);
        device.owner = Some(owner);
        Ok(())
    }

    async fn set_device_pairing(
        &self,
        serial: &str,
        vehicle_token: Option<U256>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let device = tables
            .devices
            .get_mut(serial)
            .ok_or_else(|| StoreError::NotFound(format!("device {}", serial)))?;
        device.paired_vehicle_token = vehicle_token;
        Ok(())
    }

    async fn get_credential(&self, claim_id: Uuid) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.tables.read().await.credentials.get(&claim_id).cloned())
    }

    async fn record_credential(
        &self,
        credential: &CredentialRecord,
        vin: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;

        if tables.credentials.contains_key(&credential.claim_id) {
            return Err(StoreError::Conflict(format!(
                "credential {} already exists",
                credential.claim_id
            )));
        }

        let vehicle = tables
            .vehicles
            .values_mut()
            .find(|v| v.vin == vin)
            .ok_or_else(|| StoreError::NotFound(format!("vehicle with VIN {}", vin)))?;
        vehicle.current_claim_id = Some(credential.claim_id);

        tables
            .credentials
            .insert(credential.claim_id, credential.clone());
        Ok(())
    }
}
