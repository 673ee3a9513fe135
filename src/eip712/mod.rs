//! EIP-712 Typed Data Module
//!
//! Builds the four registry message shapes (mint vehicle, claim device, pair
//! device, unpair device) and computes their EIP-712 digests:
//!
//! ```text
//! keccak256(0x19 0x01 || domainSeparator || hashStruct(message))
//! ```
//!
//! The struct declarations live in a `sol!` block, so `SolStruct` supplies
//! the type strings, struct hashes and signing hashes. Pair and unpair carry
//! identical fields and differ only in their type name, which is part of the
//! type hash, so their digests never collide.

use std::borrow::Cow;

use alloy::primitives::Bytes;
use alloy::sol;
use alloy::sol_types::{Eip712Domain as SolDomain, SolCall, SolStruct};
use ethereum_types::{Address, H256, U256};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::abi::{to_sol_address, to_sol_u256, VehicleRegistry};
use crate::crypto::format_address;

sol! {
    struct MintVehicleSign {
        uint256 manufacturerNode;
        address owner;
        string[] attributes;
        string[] infos;
    }

    struct ClaimAftermarketDeviceSign {
        uint256 aftermarketDeviceNode;
        address owner;
    }

    struct PairAftermarketDeviceSign {
        uint256 aftermarketDeviceNode;
        uint256 vehicleNode;
    }

    struct UnPairAftermarketDeviceSign {
        uint256 aftermarketDeviceNode;
        uint256 vehicleNode;
    }
}

/// Invalid typed-data arguments.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypedDataError {
    #[error("attribute/info lists differ in length: {attributes} attributes, {infos} infos")]
    AttributeLengthMismatch { attributes: usize, infos: usize },
}

// ============================================================================
// TYPED MESSAGE
// ============================================================================

/// A field declaration of a struct type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedField {
    pub name: String,
    pub type_name: String,
}

/// A transient typed message: type name, field declarations and values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedMessage {
    pub primary_type: &'static str,
    pub fields: Vec<TypedField>,
    pub values: Map<String, Value>,
}

impl TypedMessage {
    fn new<S: SolStruct>(values: Map<String, Value>) -> Self {
        Self {
            primary_type: S::NAME,
            fields: parse_members(&S::eip712_encode_type()),
            values,
        }
    }

    /// `Name(type1 field1,type2 field2,...)`
    pub fn encode_type(&self) -> String {
        let members: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!("{} {}", f.type_name, f.name))
            .collect();
        format!("{}({})", self.primary_type, members.join(","))
    }
}

/// Splits a flat `Name(type name,...)` declaration into its members.
fn parse_members(encode_type: &str) -> Vec<TypedField> {
    let members = encode_type
        .split_once('(')
        .and_then(|(_, rest)| rest.strip_suffix(')'))
        .unwrap_or_default();
    members
        .split(',')
        .filter_map(|member| member.split_once(' '))
        .map(|(type_name, name)| TypedField {
            name: name.to_string(),
            type_name: type_name.to_string(),
        })
        .collect()
}

fn type_json(fields: &[TypedField]) -> Value {
    Value::Array(
        fields
            .iter()
            .map(|f| json!({ "name": f.name, "type": f.type_name }))
            .collect(),
    )
}

// ============================================================================
// DOMAIN
// ============================================================================

/// The signing domain of the registry contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip712Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl Eip712Domain {
    fn to_sol(&self) -> SolDomain {
        SolDomain::new(
            Some(Cow::Owned(self.name.clone())),
            Some(Cow::Owned(self.version.clone())),
            Some(to_sol_u256(U256::from(self.chain_id))),
            Some(to_sol_address(self.verifying_contract)),
            None,
        )
    }

    /// `hashStruct(EIP712Domain)`
    pub fn separator(&self) -> H256 {
        H256::from(self.to_sol().separator().0)
    }

    /// Computes the final EIP-712 digest of a message in this domain.
    pub fn hash(&self, message: &RegistryMessage) -> Result<H256, TypedDataError> {
        message.validate()?;
        let domain = self.to_sol();
        let digest = match message {
            RegistryMessage::MintVehicle(mint) => mint.to_sol().eip712_signing_hash(&domain),
            RegistryMessage::ClaimDevice(claim) => claim.to_sol().eip712_signing_hash(&domain),
            RegistryMessage::PairDevice(nodes) => PairAftermarketDeviceSign {
                aftermarketDeviceNode: to_sol_u256(nodes.device_node),
                vehicleNode: to_sol_u256(nodes.vehicle_node),
            }
            .eip712_signing_hash(&domain),
            RegistryMessage::UnpairDevice(nodes) => UnPairAftermarketDeviceSign {
                aftermarketDeviceNode: to_sol_u256(nodes.device_node),
                vehicleNode: to_sol_u256(nodes.vehicle_node),
            }
            .eip712_signing_hash(&domain),
        };
        Ok(H256::from(digest.0))
    }

    /// Standard `eth_signTypedData_v4` JSON payload for a message.
    pub fn typed_data(&self, message: &TypedMessage) -> Value {
        let mut types = Map::new();
        types.insert(
            "EIP712Domain".to_string(),
            json!([
                { "name": "name", "type": "string" },
                { "name": "version", "type": "string" },
                { "name": "chainId", "type": "uint256" },
                { "name": "verifyingContract", "type": "address" },
            ]),
        );
        types.insert(message.primary_type.to_string(), type_json(&message.fields));

        json!({
            "types": types,
            "primaryType": message.primary_type,
            "domain": {
                "name": self.name,
                "version": self.version,
                "chainId": self.chain_id,
                "verifyingContract": format_address(&self.verifying_contract),
            },
            "message": message.values,
        })
    }
}

// ============================================================================
// REGISTRY MESSAGES
// ============================================================================

/// Mint a vehicle node under a manufacturer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintVehicle {
    pub manufacturer_node: U256,
    pub owner: Address,
    /// Attribute names, e.g. `Make`, `Model`, `Year`
    pub attributes: Vec<String>,
    /// Values for `attributes`, position by position
    pub infos: Vec<String>,
}

impl MintVehicle {
    fn to_sol(&self) -> MintVehicleSign {
        MintVehicleSign {
            manufacturerNode: to_sol_u256(self.manufacturer_node),
            owner: to_sol_address(self.owner),
            attributes: self.attributes.clone(),
            infos: self.infos.clone(),
        }
    }
}

/// Claim an aftermarket device for an owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimDevice {
    pub device_node: U256,
    pub owner: Address,
}

impl ClaimDevice {
    fn to_sol(&self) -> ClaimAftermarketDeviceSign {
        ClaimAftermarketDeviceSign {
            aftermarketDeviceNode: to_sol_u256(self.device_node),
            owner: to_sol_address(self.owner),
        }
    }
}

/// Device and vehicle node pair used by pair and unpair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceVehicleNodes {
    pub device_node: U256,
    pub vehicle_node: U256,
}

/// One of the four signed registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryMessage {
    MintVehicle(MintVehicle),
    ClaimDevice(ClaimDevice),
    PairDevice(DeviceVehicleNodes),
    UnpairDevice(DeviceVehicleNodes),
}

impl RegistryMessage {
    /// EIP-712 primary type name.
    pub fn name(&self) -> &'static str {
        match self {
            RegistryMessage::MintVehicle(_) => MintVehicleSign::NAME,
            RegistryMessage::ClaimDevice(_) => ClaimAftermarketDeviceSign::NAME,
            RegistryMessage::PairDevice(_) => PairAftermarketDeviceSign::NAME,
            RegistryMessage::UnpairDevice(_) => UnPairAftermarketDeviceSign::NAME,
        }
    }

    /// Registry contract function that consumes the signed message.
    pub fn function_signature(&self) -> &'static str {
        match self {
            RegistryMessage::MintVehicle(_) => VehicleRegistry::mintVehicleSignCall::SIGNATURE,
            RegistryMessage::ClaimDevice(_) => {
                VehicleRegistry::claimAftermarketDeviceSignCall::SIGNATURE
            }
            RegistryMessage::PairDevice(_) => {
                VehicleRegistry::pairAftermarketDeviceSignCall::SIGNATURE
            }
            RegistryMessage::UnpairDevice(_) => {
                VehicleRegistry::unpairAftermarketDeviceSignCall::SIGNATURE
            }
        }
    }

    /// Checks arguments that the type system alone cannot.
    pub fn validate(&self) -> Result<(), TypedDataError> {
        if let RegistryMessage::MintVehicle(mint) = self {
            if mint.attributes.len() != mint.infos.len() {
                return Err(TypedDataError::AttributeLengthMismatch {
                    attributes: mint.attributes.len(),
                    infos: mint.infos.len(),
                });
            }
        }
        Ok(())
    }

    /// Field values keyed by name, in their JSON wire form.
    pub fn message(&self) -> Map<String, Value> {
        let mut values = Map::new();
        match self {
            RegistryMessage::MintVehicle(mint) => {
                values.insert("manufacturerNode".into(), json!(mint.manufacturer_node.to_string()));
                values.insert("owner".into(), json!(format_address(&mint.owner)));
                values.insert("attributes".into(), json!(mint.attributes));
                values.insert("infos".into(), json!(mint.infos));
            }
            RegistryMessage::ClaimDevice(claim) => {
                values.insert("aftermarketDeviceNode".into(), json!(claim.device_node.to_string()));
                values.insert("owner".into(), json!(format_address(&claim.owner)));
            }
            RegistryMessage::PairDevice(nodes) | RegistryMessage::UnpairDevice(nodes) => {
                values.insert("aftermarketDeviceNode".into(), json!(nodes.device_node.to_string()));
                values.insert("vehicleNode".into(), json!(nodes.vehicle_node.to_string()));
            }
        }
        values
    }

    /// The message as a validated [`TypedMessage`].
    pub fn to_typed_message(&self) -> Result<TypedMessage, TypedDataError> {
        self.validate()?;
        let values = self.message();
        Ok(match self {
            RegistryMessage::MintVehicle(_) => TypedMessage::new::<MintVehicleSign>(values),
            RegistryMessage::ClaimDevice(_) => {
                TypedMessage::new::<ClaimAftermarketDeviceSign>(values)
            }
            RegistryMessage::PairDevice(_) => TypedMessage::new::<PairAftermarketDeviceSign>(values),
            RegistryMessage::UnpairDevice(_) => {
                TypedMessage::new::<UnPairAftermarketDeviceSign>(values)
            }
        })
    }

    /// ABI-encoded contract call, `signature` appended as the final argument.
    pub fn call_data(&self, signature: &[u8]) -> Vec<u8> {
        let signature = Bytes::copy_from_slice(signature);
        match self {
            RegistryMessage::MintVehicle(mint) => VehicleRegistry::mintVehicleSignCall {
                manufacturerNode: to_sol_u256(mint.manufacturer_node),
                owner: to_sol_address(mint.owner),
                attributes: mint.attributes.clone(),
                infos: mint.infos.clone(),
                signature,
            }
            .abi_encode(),
            RegistryMessage::ClaimDevice(claim) => {
                VehicleRegistry::claimAftermarketDeviceSignCall {
                    aftermarketDeviceNode: to_sol_u256(claim.device_node),
                    owner: to_sol_address(claim.owner),
                    signature,
                }
                .abi_encode()
            }
            RegistryMessage::PairDevice(nodes) => VehicleRegistry::pairAftermarketDeviceSignCall {
                aftermarketDeviceNode: to_sol_u256(nodes.device_node),
                vehicleNode: to_sol_u256(nodes.vehicle_node),
                signature,
            }
            .abi_encode(),
            RegistryMessage::UnpairDevice(nodes) => {
                VehicleRegistry::unpairAftermarketDeviceSignCall {
                    aftermarketDeviceNode: to_sol_u256(nodes.device_node),
                    vehicleNode: to_sol_u256(nodes.vehicle_node),
                    signature,
                }
                .abi_encode()
            }
        }
    }
}
