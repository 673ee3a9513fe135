//! PostgreSQL registry store.
//!
//! Token ids are `NUMERIC(78, 0)` columns (a full uint256 range); they are
//! bound and selected as decimal text. Addresses and hashes are raw `BYTEA`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethereum_types::{Address, H256, U256};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;
use uuid::Uuid;

use super::{RegistryStore, StoreError};
use crate::model::{
    AftermarketDeviceRecord, CredentialRecord, MetaTransactionRequest, MetaTransactionStatus,
    TransactionSubject, VehicleRecord,
};

/// Registry store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects to the database and applies the embedded migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(url)
            .await?;
        info!("Connected to PostgreSQL");

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database migrations applied");

        Ok(Self { pool })
    }
}

fn conflict_or_database(err: sqlx::Error, what: impl FnOnce() -> String) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(what()),
        _ => StoreError::Database(err),
    }
}

fn parse_token(value: Option<String>) -> Result<Option<U256>, StoreError> {
    value
        .map(|text| {
            U256::from_dec_str(&text)
                .map_err(|e| StoreError::Corrupt(format!("token id '{}': {:?}", text, e)))
        })
        .transpose()
}

fn parse_address_bytes(bytes: &[u8]) -> Result<Address, StoreError> {
    if bytes.len() != 20 {
        return Err(StoreError::Corrupt(format!(
            "address column holds {} bytes",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(bytes))
}

// ============================================================================
// ROW TYPES
// ============================================================================

#[derive(sqlx::FromRow)]
struct MetaTransactionRow {
    id: String,
    status: String,
    transaction_hash: Option<Vec<u8>>,
    mint_vehicle_id: Option<i64>,
    claim_serial: Option<String>,
    pair_serial: Option<String>,
    unpair_serial: Option<String>,
}

impl MetaTransactionRow {
    fn into_record(self) -> Result<MetaTransactionRequest, StoreError> {
        let status = self
            .status
            .parse::<MetaTransactionStatus>()
            .map_err(StoreError::Corrupt)?;

        let transaction_hash = match self.transaction_hash {
            Some(bytes) if bytes.len() == 32 => Some(H256::from_slice(&bytes)),
            Some(bytes) => {
                return Err(StoreError::Corrupt(format!(
                    "transaction hash holds {} bytes",
                    bytes.len()
                )))
            }
            None => None,
        };

        let subject = match (
            self.mint_vehicle_id,
            self.claim_serial,
            self.pair_serial,
            self.unpair_serial,
        ) {
            (Some(vehicle_id), None, None, None) => {
                Some(TransactionSubject::VehicleMint { vehicle_id })
            }
            (None, Some(serial), None, None) => Some(TransactionSubject::DeviceClaim { serial }),
            (None, None, Some(serial), None) => Some(TransactionSubject::DevicePair { serial }),
            (None, None, None, Some(serial)) => Some(TransactionSubject::DeviceUnpair { serial }),
            (None, None, None, None) => None,
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "meta-transaction {} links more than one subject",
                    self.id
                )))
            }
        };

        Ok(MetaTransactionRequest {
            id: self.id,
            status,
            transaction_hash,
            subject,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VehicleRow {
    id: i64,
    vin: String,
    token_id: Option<String>,
    owner_address: Option<Vec<u8>>,
    current_claim_id: Option<Uuid>,
}

impl VehicleRow {
    fn into_record(self) -> Result<VehicleRecord, StoreError> {
        Ok(VehicleRecord {
            id: self.id,
            vin: self.vin,
            token_id: parse_token(self.token_id)?,
            owner: self
                .owner_address
                .as_deref()
                .map(parse_address_bytes)
                .transpose()?,
            current_claim_id: self.current_claim_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    serial: String,
    device_cloud_id: Option<String>,
    ethereum_address: Vec<u8>,
    token_id: Option<String>,
    owner_address: Option<Vec<u8>>,
    paired_vehicle_token: Option<String>,
}

impl DeviceRow {
    fn into_record(self) -> Result<AftermarketDeviceRecord, StoreError> {
        Ok(AftermarketDeviceRecord {
            serial: self.serial,
            device_cloud_id: self.device_cloud_id,
            ethereum_address: parse_address_bytes(&self.ethereum_address)?,
            token_id: parse_token(self.token_id)?,
            owner: self
                .owner_address
                .as_deref()
                .map(parse_address_bytes)
                .transpose()?,
            paired_vehicle_token: parse_token(self.paired_vehicle_token)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    claim_id: Uuid,
    credential: Vec<u8>,
    expiration_date: DateTime<Utc>,
}

const META_TRANSACTION_COLUMNS: &str =
    "id, status, transaction_hash, mint_vehicle_id, claim_serial, pair_serial, unpair_serial";

const VEHICLE_COLUMNS: &str =
    "id, vin, token_id::text AS token_id, owner_address, current_claim_id";

const DEVICE_COLUMNS: &str = "serial, device_cloud_id, ethereum_address, token_id::text AS token_id, \
     owner_address, paired_vehicle_token::text AS paired_vehicle_token";

// ============================================================================
// STORE IMPLEMENTATION
// ============================================================================

impl PgStore {
    async fn fetch_vehicle(
        &self,
        filter: &str,
        bind: VehicleKey<'_>,
    ) -> Result<Option<VehicleRecord>, StoreError> {
        let sql = format!("SELECT {} FROM vehicles WHERE {}", VEHICLE_COLUMNS, filter);
        let query = sqlx::query_as::<_, VehicleRow>(&sql);
        let query = match bind {
            VehicleKey::Id(id) => query.bind(id),
            VehicleKey::Vin(vin) => query.bind(vin.to_string()),
            VehicleKey::Token(token) => query.bind(token.to_string()),
        };
        query
            .fetch_optional(&self.pool)
            .await?
            .map(VehicleRow::into_record)
            .transpose()
    }

    async fn fetch_device(
        &self,
        filter: &str,
        bind: DeviceKey<'_>,
    ) -> Result<Option<AftermarketDeviceRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM aftermarket_devices WHERE {}",
            DEVICE_COLUMNS, filter
        );
        let query = sqlx::query_as::<_, DeviceRow>(&sql);
        let query = match bind {
            DeviceKey::Serial(serial) => query.bind(serial.to_string()),
            DeviceKey::Address(address) => query.bind(address.as_bytes().to_vec()),
        };
        query
            .fetch_optional(&self.pool)
            .await?
            .map(DeviceRow::into_record)
            .transpose()
    }
}

enum VehicleKey<'a> {
    Id(i64),
    Vin(&'a str),
    Token(U256),
}

enum DeviceKey<'a> {
    Serial(&'a str),
    Address(Address),
}

#[async_trait]
impl RegistryStore for PgStore {
    async fn insert_meta_transaction(
        &self,
        request: &MetaTransactionRequest,
    ) -> Result<(), StoreError> {
        let (mint_vehicle_id, claim_serial, pair_serial, unpair_serial) = match &request.subject {
            Some(TransactionSubject::VehicleMint { vehicle_id }) => {
                (Some(*vehicle_id), None, None, None)
            }
            Some(TransactionSubject::DeviceClaim { serial }) => (None, Some(serial.clone()), None, None),
            Some(TransactionSubject::DevicePair { serial }) => (None, None, Some(serial.clone()), None),
            Some(TransactionSubject::DeviceUnpair { serial }) => {
                (None, None, None, Some(serial.clone()))
            }
            None => (None, None, None, None),
        };

        sqlx::query(
            "INSERT INTO meta_transaction_requests
                 (id, status, transaction_hash, mint_vehicle_id, claim_serial, pair_serial, unpair_serial)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&request.id)
        .bind(request.status.as_str())
        .bind(request.transaction_hash.map(|h| h.as_bytes().to_vec()))
        .bind(mint_vehicle_id)
        .bind(claim_serial)
        .bind(pair_serial)
        .bind(unpair_serial)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_or_database(e, || format!("meta-transaction {} already exists", request.id))
        })?;

        Ok(())
    }

    async fn get_meta_transaction(
        &self,
        id: &str,
    ) -> Result<Option<MetaTransactionRequest>, StoreError> {
        let sql = format!(
            "SELECT {} FROM meta_transaction_requests WHERE id = $1",
            META_TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, MetaTransactionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(MetaTransactionRow::into_record)
            .transpose()
    }

    async fn update_meta_transaction_status(
        &self,
        id: &str,
        status: MetaTransactionStatus,
        transaction_hash: Option<H256>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE meta_transaction_requests
             SET status = $2,
                 transaction_hash = COALESCE(transaction_hash, $3),
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(transaction_hash.map(|h| h.as_bytes().to_vec()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("meta-transaction {}", id)));
        }
        Ok(())
    }

    async fn insert_vehicle(&self, vehicle: &VehicleRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO vehicles (id, vin, token_id, owner_address, current_claim_id)
             VALUES ($1, $2, $3::numeric, $4, $5)",
        )
        .bind(vehicle.id)
        .bind(&vehicle.vin)
        .bind(vehicle.token_id.map(|t| t.to_string()))
        .bind(vehicle.owner.map(|a| a.as_bytes().to_vec()))
        .bind(vehicle.current_claim_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_or_database(e, || {
                format!("vehicle {} / VIN {} already exists", vehicle.id, vehicle.vin)
            })
        })?;
        Ok(())
    }

    async fn get_vehicle(&self, id: i64) -> Result<Option<VehicleRecord>, StoreError> {
        self.fetch_vehicle("id = $1", VehicleKey::Id(id)).await
    }

    async fn get_vehicle_by_vin(&self, vin: &str) -> Result<Option<VehicleRecord>, StoreError> {
        self.fetch_vehicle("vin = $1", VehicleKey::Vin(vin)).await
    }

    async fn get_vehicle_by_token(
        &self,
        token_id: U256,
    ) -> Result<Option<VehicleRecord>, StoreError> {
        self.fetch_vehicle("token_id = $1::numeric", VehicleKey::Token(token_id))
            .await
    }

    async fn set_vehicle_minted(
        &self,
        id: i64,
        token_id: U256,
        owner: Address,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE vehicles
             SET token_id = $2::numeric, owner_address = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(token_id.to_string())
        .bind(owner.as_bytes().to_vec())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("vehicle {}", id)));
        }
        Ok(())
    }

    async fn insert_device(&self, device: &AftermarketDeviceRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO aftermarket_devices
                 (serial, device_cloud_id, ethereum_address, token_id, owner_address, paired_vehicle_token)
             VALUES ($1, $2, $3, $4::numeric, $5, $6::numeric)",
        )
        .bind(&device.serial)
        .bind(&device.device_cloud_id)
        .bind(device.ethereum_address.as_bytes().to_vec())
        .bind(device.token_id.map(|t| t.to_string()))
        .bind(device.owner.map(|a| a.as_bytes().to_vec()))
        .bind(device.paired_vehicle_token.map(|t| t.to_string()))
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or_database(e, || format!("device {} already exists", device.serial)))?;
        Ok(())
    }

    async fn get_device(&self, serial: &str) -> Result<Option<AftermarketDeviceRecord>, StoreError> {
        self.fetch_device("serial = $1", DeviceKey::Serial(serial)).await
    }

    async fn get_device_by_address(
        &self,
        address: Address,
    ) -> Result<Option<AftermarketDeviceRecord>, StoreError> {
        self.fetch_device("ethereum_address = $1", DeviceKey::Address(address))
            .await
    }

    async fn set_device_claimed(
        &self,
        serial: &str,
        token_id: U256,
        owner: Address,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE aftermarket_devices
             SET token_id = $2::numeric, owner_address = $3, updated_at = now()
             WHERE serial = $1",
        )
        .bind(serial)
        .bind(token_id.to_string())
        .bind(owner.as_bytes().to_vec())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("device {}", serial)));
        }
        Ok(())
    }

    async fn set_device_pairing(
        &self,
        serial: &str,
        vehicle_token: Option<U256>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE aftermarket_devices
             SET paired_vehicle_token = $2::numeric, updated_at = now()
             WHERE serial = $1",
        )
        .bind(serial)
        .bind(vehicle_token.map(|t| t.to_string()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("device {}", serial)));
        }
        Ok(())
    }

    async fn get_credential(&self, claim_id: Uuid) -> Result<Option<CredentialRecord>, StoreError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT claim_id, credential, expiration_date
             FROM verifiable_credentials WHERE claim_id = $1",
        )
        .bind(claim_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| CredentialRecord {
            claim_id: row.claim_id,
            credential: row.credential,
            expiration_date: row.expiration_date,
        }))
    }

    async fn record_credential(
        &self,
        credential: &CredentialRecord,
        vin: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO verifiable_credentials (claim_id, credential, expiration_date)
             VALUES ($1, $2, $3)",
        )
        .bind(credential.claim_id)
        .bind(&credential.credential)
        .bind(credential.expiration_date)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            conflict_or_database(e, || {
                format!("credential {} already exists", credential.claim_id)
            })
        })?;

        let result = sqlx::query(
            "UPDATE vehicles SET current_claim_id = $1, updated_at = now() WHERE vin = $2",
        )
        .bind(credential.claim_id)
        .bind(vin)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(format!("vehicle with VIN {}", vin)));
        }

        tx.commit().await?;
        Ok(())
    }
}
