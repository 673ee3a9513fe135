//! Get Issuer DID from Service Config
//!
//! Reads the service configuration and the issuer key from its environment
//! variable, and prints the DID and verification method that credential
//! verifiers resolve.

use anyhow::Result;
use vehicle_registry::config::Config;
use vehicle_registry::crypto::IssuerKey;

fn main() -> Result<()> {
    let config = Config::load()?;
    let key = IssuerKey::from_config(&config)?;

    println!("{}", key.did());
    println!("{}", key.verification_method());

    Ok(())
}
