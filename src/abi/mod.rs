//! Registry Contract Bindings
//!
//! `sol!` declarations of the registry's signed entry points, the events
//! that confirm them and its custom errors, plus the decoding the status
//! processor needs:
//!
//! - event logs (indexed values from topics, the rest from data)
//! - revert payloads (custom errors, `Error(string)`, `Panic(uint256)`)
//!
//! The rest of the crate works in `ethereum-types`; values cross into the
//! `alloy` primitives only here and in the typed-data signer.

use alloy::primitives::{Address as SolAddress, B256, U256 as SolU256};
use alloy::sol;
use alloy::sol_types::{Panic, Revert, SolError, SolEvent, SolInterface};
use ethereum_types::{Address, H256, U256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::crypto::format_address;

sol! {
    interface VehicleRegistry {
        function mintVehicleSign(
            uint256 manufacturerNode,
            address owner,
            string[] attributes,
            string[] infos,
            bytes signature
        ) external;
        function claimAftermarketDeviceSign(
            uint256 aftermarketDeviceNode,
            address owner,
            bytes signature
        ) external;
        function pairAftermarketDeviceSign(
            uint256 aftermarketDeviceNode,
            uint256 vehicleNode,
            bytes signature
        ) external;
        function unpairAftermarketDeviceSign(
            uint256 aftermarketDeviceNode,
            uint256 vehicleNode,
            bytes signature
        ) external;

        event VehicleNodeMinted(uint256 tokenId, address owner);
        event AftermarketDeviceClaimed(uint256 aftermarketDeviceNode, address indexed owner);
        event AftermarketDevicePaired(
            uint256 aftermarketDeviceNode,
            uint256 vehicleNode,
            address indexed owner
        );
        event AftermarketDeviceUnpaired(
            uint256 aftermarketDeviceNode,
            uint256 vehicleNode,
            address indexed owner
        );

        error InvalidSigner();
        error InvalidNode(address idProxy, uint256 nodeId);
        error DeviceAlreadyClaimed(uint256 aftermarketDeviceNode);
        error AlreadyPaired(uint256 nodeId);
        error VehiclePaired(uint256 vehicleNode);
        error AttributeNotWhitelisted(string attr);
    }
}

use VehicleRegistry::VehicleRegistryErrors;

/// Log and revert decoding failures.
#[derive(Debug, Error)]
pub enum AbiError {
    /// Bytes do not unpack against the declared parameter types
    #[error("ABI decoding failed: {0}")]
    Decode(String),
    /// Revert selector matches no registry or standard error
    #[error("unknown error selector 0x{0}")]
    UnknownSelector(String),
}

// ============================================================================
// PRIMITIVE CONVERSIONS
// ============================================================================

pub(crate) fn to_sol_u256(value: U256) -> SolU256 {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    SolU256::from_be_bytes(word)
}

pub(crate) fn from_sol_u256(value: SolU256) -> U256 {
    U256::from_big_endian(&value.to_be_bytes::<32>())
}

pub(crate) fn to_sol_address(address: Address) -> SolAddress {
    SolAddress::from(address.to_fixed_bytes())
}

pub(crate) fn from_sol_address(address: SolAddress) -> Address {
    Address::from_slice(address.as_slice())
}

// ============================================================================
// EVENTS
// ============================================================================

/// Event log as emitted on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

/// Events the status processor waits for, one per subject kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEventKind {
    VehicleNodeMinted,
    AftermarketDeviceClaimed,
    AftermarketDevicePaired,
    AftermarketDeviceUnpaired,
}

impl RegistryEventKind {
    pub fn name(self) -> &'static str {
        match self {
            RegistryEventKind::VehicleNodeMinted => "VehicleNodeMinted",
            RegistryEventKind::AftermarketDeviceClaimed => "AftermarketDeviceClaimed",
            RegistryEventKind::AftermarketDevicePaired => "AftermarketDevicePaired",
            RegistryEventKind::AftermarketDeviceUnpaired => "AftermarketDeviceUnpaired",
        }
    }

    /// keccak256 of the canonical event signature.
    pub fn topic(self) -> H256 {
        let hash = match self {
            RegistryEventKind::VehicleNodeMinted => {
                VehicleRegistry::VehicleNodeMinted::SIGNATURE_HASH
            }
            RegistryEventKind::AftermarketDeviceClaimed => {
                VehicleRegistry::AftermarketDeviceClaimed::SIGNATURE_HASH
            }
            RegistryEventKind::AftermarketDevicePaired => {
                VehicleRegistry::AftermarketDevicePaired::SIGNATURE_HASH
            }
            RegistryEventKind::AftermarketDeviceUnpaired => {
                VehicleRegistry::AftermarketDeviceUnpaired::SIGNATURE_HASH
            }
        };
        H256::from(hash.0)
    }

    fn from_topic(topic: &H256) -> Option<Self> {
        [
            RegistryEventKind::VehicleNodeMinted,
            RegistryEventKind::AftermarketDeviceClaimed,
            RegistryEventKind::AftermarketDevicePaired,
            RegistryEventKind::AftermarketDeviceUnpaired,
        ]
        .into_iter()
        .find(|kind| kind.topic() == *topic)
    }
}

/// A decoded registry event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    VehicleNodeMinted {
        token_id: U256,
        owner: Address,
    },
    AftermarketDeviceClaimed {
        device_node: U256,
        owner: Address,
    },
    AftermarketDevicePaired {
        device_node: U256,
        vehicle_node: U256,
        owner: Address,
    },
    AftermarketDeviceUnpaired {
        device_node: U256,
        vehicle_node: U256,
        owner: Address,
    },
}

impl RegistryEvent {
    /// Decodes `log` as a `kind` event, checking its topic and layout.
    pub fn decode(kind: RegistryEventKind, log: &Log) -> Result<Self, AbiError> {
        Ok(match kind {
            RegistryEventKind::VehicleNodeMinted => {
                let event = decode_event::<VehicleRegistry::VehicleNodeMinted>(log)?;
                RegistryEvent::VehicleNodeMinted {
                    token_id: from_sol_u256(event.tokenId),
                    owner: from_sol_address(event.owner),
                }
            }
            RegistryEventKind::AftermarketDeviceClaimed => {
                let event = decode_event::<VehicleRegistry::AftermarketDeviceClaimed>(log)?;
                RegistryEvent::AftermarketDeviceClaimed {
                    device_node: from_sol_u256(event.aftermarketDeviceNode),
                    owner: from_sol_address(event.owner),
                }
            }
            RegistryEventKind::AftermarketDevicePaired => {
                let event = decode_event::<VehicleRegistry::AftermarketDevicePaired>(log)?;
                RegistryEvent::AftermarketDevicePaired {
                    device_node: from_sol_u256(event.aftermarketDeviceNode),
                    vehicle_node: from_sol_u256(event.vehicleNode),
                    owner: from_sol_address(event.owner),
                }
            }
            RegistryEventKind::AftermarketDeviceUnpaired => {
                let event = decode_event::<VehicleRegistry::AftermarketDeviceUnpaired>(log)?;
                RegistryEvent::AftermarketDeviceUnpaired {
                    device_node: from_sol_u256(event.aftermarketDeviceNode),
                    vehicle_node: from_sol_u256(event.vehicleNode),
                    owner: from_sol_address(event.owner),
                }
            }
        })
    }
}

fn decode_event<E: SolEvent>(log: &Log) -> Result<E, AbiError> {
    let topics: Vec<B256> = log.topics.iter().map(|t| B256::from(t.0)).collect();
    E::decode_raw_log(topics, &log.data, true)
        .map_err(|e| AbiError::Decode(format!("{}: {}", E::SIGNATURE, e)))
}

// ============================================================================
// REVERTS
// ============================================================================

/// Why a registry call reverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    InvalidSigner,
    InvalidNode { id_proxy: Address, node_id: U256 },
    DeviceAlreadyClaimed { device_node: U256 },
    AlreadyPaired { node_id: U256 },
    VehiclePaired { vehicle_node: U256 },
    AttributeNotWhitelisted { attribute: String },
    /// `Error(string)` from `require`/`revert`
    Message(String),
    /// `Panic(uint256)` from a failed assertion or arithmetic fault
    Panic(U256),
}

impl From<VehicleRegistryErrors> for RevertReason {
    fn from(error: VehicleRegistryErrors) -> Self {
        match error {
            VehicleRegistryErrors::InvalidSigner(_) => RevertReason::InvalidSigner,
            VehicleRegistryErrors::InvalidNode(e) => RevertReason::InvalidNode {
                id_proxy: from_sol_address(e.idProxy),
                node_id: from_sol_u256(e.nodeId),
            },
            VehicleRegistryErrors::DeviceAlreadyClaimed(e) => RevertReason::DeviceAlreadyClaimed {
                device_node: from_sol_u256(e.aftermarketDeviceNode),
            },
            VehicleRegistryErrors::AlreadyPaired(e) => RevertReason::AlreadyPaired {
                node_id: from_sol_u256(e.nodeId),
            },
            VehicleRegistryErrors::VehiclePaired(e) => RevertReason::VehiclePaired {
                vehicle_node: from_sol_u256(e.vehicleNode),
            },
            VehicleRegistryErrors::AttributeNotWhitelisted(e) => {
                RevertReason::AttributeNotWhitelisted { attribute: e.attr }
            }
        }
    }
}

impl std::fmt::Display for RevertReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevertReason::InvalidSigner => f.write_str("InvalidSigner()"),
            RevertReason::InvalidNode { id_proxy, node_id } => write!(
                f,
                "InvalidNode(idProxy={}, nodeId={})",
                format_address(id_proxy),
                node_id
            ),
            RevertReason::DeviceAlreadyClaimed { device_node } => {
                write!(f, "DeviceAlreadyClaimed(aftermarketDeviceNode={})", device_node)
            }
            RevertReason::AlreadyPaired { node_id } => write!(f, "AlreadyPaired(nodeId={})", node_id),
            RevertReason::VehiclePaired { vehicle_node } => {
                write!(f, "VehiclePaired(vehicleNode={})", vehicle_node)
            }
            RevertReason::AttributeNotWhitelisted { attribute } => {
                write!(f, "AttributeNotWhitelisted(attr={:?})", attribute)
            }
            RevertReason::Message(message) => write!(f, "Error({:?})", message),
            RevertReason::Panic(code) => write!(f, "Panic(0x{:x})", code),
        }
    }
}

/// Decodes the revert payload of a failed registry call.
pub fn decode_revert(data: &[u8]) -> Result<RevertReason, AbiError> {
    let selector: [u8; 4] = data
        .get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| AbiError::Decode(format!("revert data is {} bytes", data.len())))?;
    let decode_err = |e: alloy::sol_types::Error| AbiError::Decode(e.to_string());

    if selector == Revert::SELECTOR {
        let revert = Revert::abi_decode(data, true).map_err(decode_err)?;
        Ok(RevertReason::Message(revert.reason))
    } else if selector == Panic::SELECTOR {
        let panic = Panic::abi_decode(data, true).map_err(decode_err)?;
        Ok(RevertReason::Panic(from_sol_u256(panic.code)))
    } else if VehicleRegistryErrors::valid_selector(selector) {
        let error = VehicleRegistryErrors::abi_decode(data, true).map_err(decode_err)?;
        Ok(error.into())
    } else {
        Err(AbiError::UnknownSelector(hex::encode(selector)))
    }
}

// ============================================================================
// CONTRACT
// ============================================================================

/// The deployed registry contract.
#[derive(Debug, Clone)]
pub struct RegistryContract {
    address: Address,
}

impl RegistryContract {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Scans `logs` for the first `kind` event emitted by this contract.
    ///
    /// Logs of other events are skipped. A matching topic from another
    /// contract is skipped with a warning. A matching log that fails to
    /// decode is an error.
    pub fn find_event(
        &self,
        kind: RegistryEventKind,
        logs: &[Log],
    ) -> Result<Option<RegistryEvent>, AbiError> {
        let topic = kind.topic();

        for log in logs {
            if log.topics.first() != Some(&topic) {
                match log.topics.first().and_then(RegistryEventKind::from_topic) {
                    Some(other) => debug!(
                        "Skipping {} log while looking for {}",
                        other.name(),
                        kind.name()
                    ),
                    None => debug!(
                        "Skipping unrecognised log from {}",
                        format_address(&log.address)
                    ),
                }
                continue;
            }

            if log.address != self.address {
                warn!(
                    "{} log emitted by {} instead of registry {}; ignoring",
                    kind.name(),
                    format_address(&log.address),
                    format_address(&self.address)
                );
                continue;
            }

            return RegistryEvent::decode(kind, log).map(Some);
        }

        Ok(None)
    }

    /// Decodes the revert payload of a failed call to this contract.
    pub fn decode_revert(&self, data: &[u8]) -> Result<RevertReason, AbiError> {
        decode_revert(data)
    }
}
