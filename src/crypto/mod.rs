//! Cryptographic Operations Module
//!
//! This module holds the issuer key material used to sign vehicle credentials
//! and the Ethereum-flavoured helpers shared by the ABI codec and the typed-data
//! signer: keccak256, address derivation, EIP-55 checksums and hex parsing.
//!
//! ## Security Requirements
//!
//! **CRITICAL**: The issuer private key is loaded once at start-up from an
//! environment variable and is never logged. [`IssuerKey`] is immutable after
//! construction and is shared by reference (`Arc`) with the credential issuer.

use anyhow::{Context, Result};
use ethereum_types::{Address, H256};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use tracing::info;

use crate::config::Config;

// ============================================================================
// HASHING AND ENCODING HELPERS
// ============================================================================

/// Computes keccak256 over `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Parses a 20-byte EVM address from a hex string (with or without 0x prefix).
pub fn parse_address(value: &str) -> std::result::Result<Address, String> {
    let bytes = decode_hex(value)?;
    if bytes.len() != 20 {
        return Err(format!(
            "invalid address length: expected 20 bytes, got {}",
            bytes.len()
        ));
    }
    Ok(Address::from_slice(&bytes))
}

/// Parses a 32-byte hash from a hex string (with or without 0x prefix).
pub fn parse_h256(value: &str) -> std::result::Result<H256, String> {
    let bytes = decode_hex(value)?;
    if bytes.len() != 32 {
        return Err(format!(
            "invalid hash length: expected 32 bytes, got {}",
            bytes.len()
        ));
    }
    Ok(H256::from_slice(&bytes))
}

/// Decodes a hex string, tolerating an optional 0x prefix and an empty payload.
pub fn decode_hex(value: &str) -> std::result::Result<Vec<u8>, String> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(stripped).map_err(|e| format!("invalid hex '{}': {}", value, e))
}

/// Formats an address as lowercase 0x-prefixed hex (40 characters).
pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

/// Formats an address with the EIP-55 mixed-case checksum.
pub fn to_checksum_address(address: &Address) -> String {
    let lower = hex::encode(address.as_bytes());
    let hash = keccak256(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Derives the Ethereum address of a secp256k1 public key.
///
/// The address is the last 20 bytes of keccak256 over the uncompressed
/// public key without its 0x04 prefix byte.
pub fn ethereum_address(verifying_key: &VerifyingKey) -> Address {
    let point = verifying_key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

// ============================================================================
// ISSUER KEY
// ============================================================================

/// Credential issuer key material.
///
/// Holds the secp256k1 signing key together with the identity derived from
/// it: the Ethereum address, the `did:ethr` DID and the verification method
/// that external verifiers resolve to find the public key.
pub struct IssuerKey {
    signing_key: SigningKey,
    address: Address,
    did: String,
    verification_method: String,
}

impl std::fmt::Debug for IssuerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerKey")
            .field("did", &self.did)
            .finish_non_exhaustive()
    }
}

impl IssuerKey {
    /// Loads the issuer key from the environment variable named in the config.
    ///
    /// # Arguments
    ///
    /// * `config` - Service configuration (issuer key env var and chain ID)
    ///
    /// # Returns
    ///
    /// * `Ok(IssuerKey)` - Key loaded and identity derived
    /// * `Err(anyhow::Error)` - Env var missing or key malformed
    pub fn from_config(config: &Config) -> Result<Self> {
        let private_key_hex = config.issuer.get_private_key()?;
        let key = Self::from_hex(&private_key_hex, config.chain.chain_id)
            .with_context(|| {
                format!(
                    "Invalid issuer key in environment variable '{}'",
                    config.issuer.private_key_env
                )
            })?;

        info!("Issuer key loaded: {}", key.did());
        Ok(key)
    }

    /// Builds the issuer key from a hex-encoded 32-byte secret.
    pub fn from_hex(private_key_hex: &str, chain_id: u64) -> Result<Self> {
        let bytes = decode_hex(private_key_hex.trim()).map_err(|e| anyhow::anyhow!(e))?;
        if bytes.len() != 32 {
            return Err(anyhow::anyhow!(
                "Invalid private key length: expected 32 bytes, got {}",
                bytes.len()
            ));
        }

        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| anyhow::anyhow!("Failed to create ECDSA signing key: {}", e))?;

        Ok(Self::from_signing_key(signing_key, chain_id))
    }

    /// Generates a fresh random issuer key.
    pub fn generate(chain_id: u64) -> Self {
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        Self::from_signing_key(signing_key, chain_id)
    }

    fn from_signing_key(signing_key: SigningKey, chain_id: u64) -> Self {
        let address = ethereum_address(signing_key.verifying_key());
        let did = format!("did:ethr:{}:{}", chain_id, to_checksum_address(&address));
        let verification_method = format!("{}#controller", did);

        Self {
            signing_key,
            address,
            did,
            verification_method,
        }
    }

    /// Ethereum address of the issuer.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Issuer DID, e.g. `did:ethr:137:0xAbC...`.
    pub fn did(&self) -> &str {
        &self.did
    }

    /// DID URL identifying the signing key.
    pub fn verification_method(&self) -> &str {
        &self.verification_method
    }

    /// Public half of the issuer key.
    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Hex-encoded secret, used only by the key generation utility.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Signs a precomputed 32-byte digest.
    ///
    /// Returns the compact signature `r || s`, each a 32-byte big-endian
    /// integer (low-S normalized).
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> std::result::Result<[u8; 64], String> {
        let signature: Signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|e| format!("failed to sign digest: {}", e))?;
        let signature = signature.normalize_s().unwrap_or(signature);

        let mut out = [0u8; 64];
        out.copy_from_slice(&signature.to_bytes());
        Ok(out)
    }
}

/// Verifies a compact `r || s` signature over a precomputed digest.
pub fn verify_prehash(
    verifying_key: &VerifyingKey,
    digest: &[u8; 32],
    signature: &[u8],
) -> std::result::Result<(), String> {
    let signature =
        Signature::from_slice(signature).map_err(|e| format!("malformed signature: {}", e))?;
    verifying_key
        .verify_prehash(digest, &signature)
        .map_err(|e| format!("signature does not verify: {}", e))
}
