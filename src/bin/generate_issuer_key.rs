//! Issuer Key Generation Utility
//!
//! Generates a new secp256k1 key for signing VIN credentials.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin generate_issuer_key -- --chain-id 137
//! ```
//!
//! Store the private key in the environment variable named by
//! `issuer.private_key_env` (default `ISSUER_PRIVATE_KEY`). Never put it in
//! the config file.

use clap::Parser;
use vehicle_registry::crypto::{to_checksum_address, IssuerKey};

#[derive(Parser, Debug)]
#[command(name = "generate_issuer_key")]
#[command(about = "Generate a secp256k1 credential issuer key")]
struct Args {
    /// Chain ID used in the issuer DID
    #[arg(long, default_value_t = 137)]
    chain_id: u64,
}

fn main() {
    let args = Args::parse();
    let key = IssuerKey::generate(args.chain_id);

    println!("Generated secp256k1 issuer key:");
    println!("Private Key (hex): {}", key.secret_hex());
    println!("Address: {}", to_checksum_address(&key.address()));
    println!("DID: {}", key.did());
    println!();
    println!("Export the private key as ISSUER_PRIVATE_KEY (or the env var set in [issuer]).");
}
