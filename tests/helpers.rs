//! Shared test helpers for integration tests
//!
//! The module is organized into several categories:
//! - **Constants**: Dummy addresses, VINs and ids
//! - **Builders**: Contract, domain, config and event builders
//! - **Collaborator doubles**: Recording device cloud, sink and issuer
//! - **Store seeding**: Vehicles and devices in a known state

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethereum_types::{Address, H256, U256};
use uuid::Uuid;
use vehicle_registry::abi::{RegistryContract, RegistryEventKind};
use vehicle_registry::config::Config;
use vehicle_registry::credential::{CredentialError, CredentialIssuer};
use vehicle_registry::crypto::parse_address;
use vehicle_registry::devicecloud::{DeviceCloud, DeviceCloudError};
use vehicle_registry::eip712::Eip712Domain;
use vehicle_registry::model::{AftermarketDeviceRecord, VehicleRecord};
use vehicle_registry::processor::{RawLog, StatusEventType, StatusTransaction, TransactionStatusEvent};
use vehicle_registry::registry::{SinkError, TransactionRequest, TransactionSink};
use vehicle_registry::storage::RegistryStore;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const DUMMY_CHAIN_ID: u64 = 137;

/// Dummy registry contract address (EVM format, 20 bytes)
pub const DUMMY_REGISTRY_ADDR: &str = "0x00000000000000000000000000000000000000a1";

/// Dummy vehicle NFT contract address (EVM format, 20 bytes)
pub const DUMMY_VEHICLE_NFT_ADDR: &str = "0x00000000000000000000000000000000000000b2";

/// Address emitting logs that are not the registry's
pub const DUMMY_OTHER_CONTRACT_ADDR: &str = "0x00000000000000000000000000000000000000c3";

/// Vehicle owner from the mint confirmation scenario
pub const DUMMY_OWNER_ADDR: &str = "0x7e74d0f663d58d12817b8bef762bcde3af1f63d6";

/// Address the test device signs fingerprints with
pub const DUMMY_DEVICE_ADDR: &str = "0x00000000000000000000000000000000000000d4";

pub const DUMMY_VIN: &str = "1G6AL1RY2K0111939";
pub const DUMMY_OTHER_VIN: &str = "5YJSA1E26HF000337";

pub const DUMMY_VEHICLE_ID: i64 = 1;
pub const DUMMY_VEHICLE_TOKEN: u64 = 14443;
pub const DUMMY_DEVICE_SERIAL: &str = "AD-0001";
pub const DUMMY_DEVICE_NODE: u64 = 321;

pub const DUMMY_REQUEST_ID: &str = "2LKqR0iMCuLmlMVkcS0z4Rlr1ax";

pub const DUMMY_TX_HASH: &str =
    "0x00000000000000000000000000000000000000000000000000000000000000e5";

// ============================================================================
// BUILDERS
// ============================================================================

pub fn address(value: &str) -> Address {
    parse_address(value).unwrap()
}

pub fn registry_address() -> Address {
    address(DUMMY_REGISTRY_ADDR)
}

pub fn registry_contract() -> Arc<RegistryContract> {
    Arc::new(RegistryContract::new(registry_address()))
}

pub fn test_domain() -> Eip712Domain {
    Eip712Domain {
        name: "VehicleRegistry".to_string(),
        version: "1".to_string(),
        chain_id: DUMMY_CHAIN_ID,
        verifying_contract: registry_address(),
    }
}

/// Config with placeholder collaborator URLs
pub fn build_test_config() -> Config {
    let mut config = Config::default();
    config.chain.chain_id = DUMMY_CHAIN_ID;
    config.chain.registry_addr = DUMMY_REGISTRY_ADDR.to_string();
    config.chain.vehicle_nft_addr = DUMMY_VEHICLE_NFT_ADDR.to_string();
    config
}

/// One 32-byte ABI word holding an address.
pub fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

/// One 32-byte ABI word holding a uint.
pub fn uint_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    U256::from(value).to_big_endian(&mut word);
    word
}

/// Revert payload of `Error(string)` as produced by `require(cond, message)`.
pub fn error_string_revert(message: &str) -> Vec<u8> {
    let mut payload = hex::decode("08c379a0").unwrap();
    payload.extend_from_slice(&uint_word(32));
    payload.extend_from_slice(&uint_word(message.len() as u64));
    let mut tail = message.as_bytes().to_vec();
    tail.resize((message.len() + 31) / 32 * 32, 0);
    payload.extend(tail);
    payload
}

fn hex0x(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn raw_log(emitter: Address, topics: &[H256], data: &[u8]) -> RawLog {
    RawLog {
        address: hex0x(emitter.as_bytes()),
        topics: topics.iter().map(|t| hex0x(t.as_bytes())).collect(),
        data: hex0x(data),
    }
}

/// `VehicleNodeMinted(tokenId, owner)` emitted by the registry
pub fn minted_log(contract: &RegistryContract, token_id: u64, owner: Address) -> RawLog {
    let topic = RegistryEventKind::VehicleNodeMinted.topic();
    let data = [uint_word(token_id), address_word(owner)].concat();
    raw_log(contract.address(), &[topic], &data)
}

/// `AftermarketDeviceClaimed(aftermarketDeviceNode, owner indexed)`
pub fn claimed_log(contract: &RegistryContract, device_node: u64, owner: Address) -> RawLog {
    let topic = RegistryEventKind::AftermarketDeviceClaimed.topic();
    let data = uint_word(device_node);
    raw_log(
        contract.address(),
        &[topic, H256::from(address_word(owner))],
        &data,
    )
}

/// `AftermarketDevicePaired/Unpaired(aftermarketDeviceNode, vehicleNode, owner indexed)`
pub fn pairing_log(
    contract: &RegistryContract,
    kind: RegistryEventKind,
    device_node: u64,
    vehicle_node: u64,
    owner: Address,
) -> RawLog {
    let data = [uint_word(device_node), uint_word(vehicle_node)].concat();
    raw_log(
        contract.address(),
        &[kind.topic(), H256::from(address_word(owner))],
        &data,
    )
}

pub fn status_event(
    request_id: &str,
    kind: StatusEventType,
    logs: Vec<RawLog>,
) -> TransactionStatusEvent {
    TransactionStatusEvent {
        request_id: request_id.to_string(),
        kind,
        transaction: StatusTransaction {
            hash: Some(DUMMY_TX_HASH.to_string()),
            logs,
            revert_data: None,
        },
    }
}

// ============================================================================
// COLLABORATOR DOUBLES
// ============================================================================

/// Device cloud that records every call.
#[derive(Default)]
pub struct RecordingDeviceCloud {
    pub calls: Mutex<Vec<(String, U256, U256)>>,
    pub fail: AtomicBool,
}

impl RecordingDeviceCloud {
    pub fn calls(&self) -> Vec<(String, U256, U256)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, action: &str, device: U256, vehicle: U256) -> Result<(), DeviceCloudError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeviceCloudError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.calls
            .lock()
            .unwrap()
            .push((action.to_string(), device, vehicle));
        Ok(())
    }
}

#[async_trait]
impl DeviceCloud for RecordingDeviceCloud {
    async fn pair(&self, device_node: U256, vehicle_node: U256) -> Result<(), DeviceCloudError> {
        self.record("pair", device_node, vehicle_node)
    }

    async fn unpair(
        &self,
        device_node: U256,
        vehicle_node: U256,
    ) -> Result<(), DeviceCloudError> {
        self.record("unpair", device_node, vehicle_node)
    }
}

/// Transaction sink that keeps published requests in memory.
#[derive(Default)]
pub struct RecordingSink {
    pub published: Mutex<Vec<TransactionRequest>>,
}

#[async_trait]
impl TransactionSink for RecordingSink {
    async fn publish(&self, request: &TransactionRequest) -> Result<(), SinkError> {
        self.published.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Issuer that counts invocations and wraps another issuer.
pub struct CountingIssuer<I> {
    pub inner: I,
    pub calls: AtomicUsize,
}

impl<I> CountingIssuer<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<I: CredentialIssuer> CredentialIssuer for CountingIssuer<I> {
    async fn issue_vin_credential(
        &self,
        vin: &str,
        token_id: U256,
    ) -> Result<Uuid, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.issue_vin_credential(vin, token_id).await
    }
}

// ============================================================================
// STORE SEEDING
// ============================================================================

/// Inserts the dummy vehicle, minted as token `DUMMY_VEHICLE_TOKEN`.
pub async fn seed_minted_vehicle(store: &dyn RegistryStore) -> VehicleRecord {
    store
        .insert_vehicle(&VehicleRecord::new(DUMMY_VEHICLE_ID, DUMMY_VIN))
        .await
        .unwrap();
    store
        .set_vehicle_minted(
            DUMMY_VEHICLE_ID,
            U256::from(DUMMY_VEHICLE_TOKEN),
            address(DUMMY_OWNER_ADDR),
        )
        .await
        .unwrap();
    store.get_vehicle(DUMMY_VEHICLE_ID).await.unwrap().unwrap()
}

/// Inserts the dummy device, claimed and optionally paired with the dummy vehicle.
pub async fn seed_device(store: &dyn RegistryStore, paired: bool) -> AftermarketDeviceRecord {
    let device = AftermarketDeviceRecord::new(
        DUMMY_DEVICE_SERIAL,
        address(DUMMY_DEVICE_ADDR),
        Some(U256::from(DUMMY_DEVICE_NODE)),
    );
    store.insert_device(&device).await.unwrap();
    if paired {
        store
            .set_device_pairing(DUMMY_DEVICE_SERIAL, Some(U256::from(DUMMY_VEHICLE_TOKEN)))
            .await
            .unwrap();
    }
    store.get_device(DUMMY_DEVICE_SERIAL).await.unwrap().unwrap()
}
