//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the vehicle registry
//! service. Configuration includes chain and contract addresses, the EIP-712 domain,
//! issuer key location, collaborator endpoints, storage and consumer settings.

use serde::{Deserialize, Serialize};

use crate::crypto::parse_address;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chain and contract addresses
    pub chain: ChainConfig,
    /// EIP-712 signing domain
    #[serde(default)]
    pub eip712: Eip712Config,
    /// Credential issuer settings
    pub issuer: IssuerConfig,
    /// Relayer endpoint receiving transaction requests
    pub relayer: RelayerConfig,
    /// Partner device cloud used for pairing side effects
    pub device_cloud: DeviceCloudConfig,
    /// Relational store settings
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Consumer loop settings
    #[serde(default)]
    pub consumer: ConsumerConfig,
    /// Ingestion API server configuration
    pub api: ApiConfig,
}

/// Chain the registry contracts live on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// EVM chain ID (e.g., 137 for Polygon, 80001 for Mumbai)
    pub chain_id: u64,
    /// Address of the registry contract (EIP-712 verifying contract and call target)
    pub registry_addr: String,
    /// Address of the vehicle NFT contract (used in credential subject DIDs)
    pub vehicle_nft_addr: String,
}

/// EIP-712 domain name and version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Eip712Config {
    /// Domain name
    #[serde(default = "default_domain_name")]
    pub domain_name: String,
    /// Domain version
    #[serde(default = "default_domain_version")]
    pub domain_version: String,
}

impl Default for Eip712Config {
    fn default() -> Self {
        Self {
            domain_name: default_domain_name(),
            domain_version: default_domain_version(),
        }
    }
}

fn default_domain_name() -> String {
    "VehicleRegistry".to_string()
}

fn default_domain_version() -> String {
    "1".to_string()
}

/// Credential issuer configuration.
///
/// The config file contains the environment variable name, not the key itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerConfig {
    /// Environment variable name containing the secp256k1 private key (hex encoded)
    /// Default: "ISSUER_PRIVATE_KEY"
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    /// Credential validity window in days
    #[serde(default = "default_validity_days")]
    pub validity_days: i64,
}

fn default_private_key_env() -> String {
    "ISSUER_PRIVATE_KEY".to_string()
}

/// Shortest credential validity. A credential issued at any point of a
/// reward week must outlive that week, or the vehicle is issued twice.
pub const MIN_VALIDITY_DAYS: i64 = 7;

/// Longest credential validity (ten years).
pub const MAX_VALIDITY_DAYS: i64 = 3650;

fn default_validity_days() -> i64 {
    7
}

impl IssuerConfig {
    /// Loads the issuer private key from the environment variable.
    pub fn get_private_key(&self) -> anyhow::Result<String> {
        std::env::var(&self.private_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Environment variable '{}' not set. Please set it with the issuer secp256k1 private key (hex encoded).",
                self.private_key_env
            )
        })
    }
}

/// Relayer endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    /// URL transaction requests are POSTed to
    pub url: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Device cloud integration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCloudConfig {
    /// Base URL of the device-integration API
    pub base_url: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Relational store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Environment variable holding the Postgres URL. When unset (or the
    /// variable is empty) the service runs against the in-memory store.
    #[serde(default)]
    pub url_env: Option<String>,
    /// Maximum pool connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl DatabaseConfig {
    /// Resolves the database URL, if one is configured.
    pub fn get_url(&self) -> Option<String> {
        self.url_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|url| !url.is_empty())
    }
}

/// Consumer loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Number of partitions (single-threaded loops) per inbound channel
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    /// Queue depth per partition
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Per-message processing timeout in milliseconds
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            queue_capacity: default_queue_capacity(),
            message_timeout_ms: default_message_timeout_ms(),
        }
    }
}

fn default_partitions() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

/// API server configuration for event ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host address to bind the API server to
    pub host: String,
    /// Port number to bind the API server to
    pub port: u16,
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Validates addresses, URLs and numeric settings.
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - First invalid setting found
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chain.chain_id == 0 {
            return Err(anyhow::anyhow!(
                "Configuration error: chain.chain_id must be non-zero"
            ));
        }

        parse_address(&self.chain.registry_addr).map_err(|e| {
            anyhow::anyhow!("Configuration error: chain.registry_addr: {}", e)
        })?;
        parse_address(&self.chain.vehicle_nft_addr).map_err(|e| {
            anyhow::anyhow!("Configuration error: chain.vehicle_nft_addr: {}", e)
        })?;

        url::Url::parse(&self.relayer.url)
            .map_err(|e| anyhow::anyhow!("Configuration error: relayer.url: {}", e))?;
        url::Url::parse(&self.device_cloud.base_url)
            .map_err(|e| anyhow::anyhow!("Configuration error: device_cloud.base_url: {}", e))?;

        if !(MIN_VALIDITY_DAYS..=MAX_VALIDITY_DAYS).contains(&self.issuer.validity_days) {
            return Err(anyhow::anyhow!(
                "Configuration error: issuer.validity_days must be between {} and {}, got {}",
                MIN_VALIDITY_DAYS,
                MAX_VALIDITY_DAYS,
                self.issuer.validity_days
            ));
        }

        if self.consumer.partitions == 0 || self.consumer.queue_capacity == 0 {
            return Err(anyhow::anyhow!(
                "Configuration error: consumer.partitions and consumer.queue_capacity must be non-zero"
            ));
        }

        Ok(())
    }

    /// Loads configuration from the default location.
    ///
    /// Uses `VEHICLE_REGISTRY_CONFIG_PATH` if set, otherwise
    /// `config/vehicle-registry.toml`.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("VEHICLE_REGISTRY_CONFIG_PATH")
            .unwrap_or_else(|_| "config/vehicle-registry.toml".to_string());
        Self::load_from_path(&config_path)
    }

    /// Loads and validates configuration from a TOML file.
    pub fn load_from_path(config_path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/vehicle-registry.template.toml config/vehicle-registry.toml\n\
                Then edit config/vehicle-registry.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Creates a configuration with placeholder values for local development.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self {
            chain: ChainConfig {
                chain_id: 80001,
                registry_addr: "0x72a1a2ed56e23ec35c1e9a3e2a2e1c2bf5b1e4a4".to_string(),
                vehicle_nft_addr: "0x90c4d6113ec88dd4bdf12f26db2b3998fd13a144".to_string(),
            },
            eip712: Eip712Config::default(),
            issuer: IssuerConfig {
                private_key_env: default_private_key_env(),
                validity_days: default_validity_days(),
            },
            relayer: RelayerConfig {
                url: "http://127.0.0.1:8090/v1/transactions".to_string(),
                timeout_ms: default_timeout_ms(),
            },
            device_cloud: DeviceCloudConfig {
                base_url: "http://127.0.0.1:8091".to_string(),
                timeout_ms: default_timeout_ms(),
            },
            database: DatabaseConfig::default(),
            consumer: ConsumerConfig::default(),
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 3340,
            },
        }
    }
}
