//! Vehicle Registry Service
//!
//! Runs the transaction status processor and the fingerprint consumer behind
//! the ingestion API.
//!
//! ## Usage
//!
//! ```bash
//! ISSUER_PRIVATE_KEY=<hex> cargo run --bin vehicle-registry -- --config config/vehicle-registry.toml
//! ```
//!
//! Or set the config path via environment variable:
//!
//! ```bash
//! VEHICLE_REGISTRY_CONFIG_PATH=config/vehicle-registry.toml cargo run --bin vehicle-registry
//! ```

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vehicle_registry::abi::RegistryContract;
use vehicle_registry::api::ApiServer;
use vehicle_registry::config::Config;
use vehicle_registry::consumer::PartitionedConsumer;
use vehicle_registry::credential::{IssuerSettings, VinCredentialIssuer};
use vehicle_registry::crypto::{parse_address, IssuerKey};
use vehicle_registry::devicecloud::HttpDeviceCloud;
use vehicle_registry::fingerprint::FingerprintConsumer;
use vehicle_registry::processor::TransactionStatusProcessor;
use vehicle_registry::storage::{MemoryStore, PgStore, RegistryStore};

#[derive(Parser, Debug)]
#[command(name = "vehicle-registry")]
#[command(about = "Registry transaction tracking and VIN credential issuance")]
struct Args {
    /// Path to configuration file (default: config/vehicle-registry.toml or VEHICLE_REGISTRY_CONFIG_PATH env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Vehicle Registry Service");

    // Priority: CLI arg > env var > default
    let config = match args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            Config::load_from_path(&path)?
        }
        None => Config::load()?,
    };
    info!(
        "Configuration loaded (chain ID {}, registry {})",
        config.chain.chain_id, config.chain.registry_addr
    );

    let store: Arc<dyn RegistryStore> = match config.database.get_url() {
        Some(url) => Arc::new(
            PgStore::connect(&url, config.database.max_connections)
                .await
                .context("Failed to connect to the registry database")?,
        ),
        None => {
            warn!("No database configured; using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let registry_addr =
        parse_address(&config.chain.registry_addr).map_err(|e| anyhow::anyhow!(e))?;
    let vehicle_nft_addr =
        parse_address(&config.chain.vehicle_nft_addr).map_err(|e| anyhow::anyhow!(e))?;
    let contract = Arc::new(RegistryContract::new(registry_addr));

    let device_cloud = Arc::new(HttpDeviceCloud::new(
        &config.device_cloud.base_url,
        Duration::from_millis(config.device_cloud.timeout_ms),
    )?);

    let issuer_key = Arc::new(IssuerKey::from_config(&config)?);
    let issuer = Arc::new(VinCredentialIssuer::new(
        store.clone(),
        issuer_key,
        IssuerSettings {
            chain_id: config.chain.chain_id,
            vehicle_nft_address: vehicle_nft_addr,
            validity: ChronoDuration::days(config.issuer.validity_days),
        },
    ));

    let message_timeout = Duration::from_millis(config.consumer.message_timeout_ms);
    let processor = Arc::new(TransactionStatusProcessor::new(
        store.clone(),
        contract,
        device_cloud,
    ));
    let status_consumer = Arc::new(PartitionedConsumer::spawn(
        "transaction-status",
        processor,
        config.consumer.partitions,
        config.consumer.queue_capacity,
        message_timeout,
    ));

    let fingerprints = Arc::new(FingerprintConsumer::new(store, issuer));
    let fingerprint_consumer = Arc::new(PartitionedConsumer::spawn(
        "fingerprint",
        fingerprints,
        config.consumer.partitions,
        config.consumer.queue_capacity,
        message_timeout,
    ));

    let api_server = ApiServer::new(
        config.api.clone(),
        status_consumer.clone(),
        fingerprint_consumer.clone(),
    );
    api_server
        .run(async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    // The server has dropped its route clones; drain in-flight messages.
    drop(api_server);
    PartitionedConsumer::shutdown_shared(status_consumer).await;
    PartitionedConsumer::shutdown_shared(fingerprint_consumer).await;

    info!("Vehicle Registry Service stopped");
    Ok(())
}
