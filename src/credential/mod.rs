//! Vehicle Credential Module
//!
//! Builds and signs W3C Verifiable Credentials that bind a VIN to a vehicle
//! NFT, and verifies them again.
//!
//! ## Proof format
//!
//! Proofs are `EcdsaSecp256k1Signature2019` with a detached ES256K JWS:
//!
//! 1. The credential (without `proof`) and the proof options (the proof
//!    without `jws`, under the credential's `@context`) are canonicalized
//!    independently with URDNA2015.
//! 2. `payload = SHA-256(proof N-Quads) || SHA-256(credential N-Quads)`.
//! 3. `jws = header_b64 + ".." + base64url(r || s)` where the ECDSA digest is
//!    `SHA-256(header_b64 + "." + payload)`.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use ethereum_types::{Address, U256};
use k256::ecdsa::VerifyingKey;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::{to_checksum_address, IssuerKey};
use crate::storage::StoreError;

pub mod canonical;
mod issuer;
mod jws;

pub use canonical::{CanonicalError, CREDENTIALS_V1_CONTEXT, SCHEMA_ORG_CONTEXT};
pub use issuer::{CredentialIssuer, VinCredentialIssuer};

pub const PROOF_TYPE: &str = "EcdsaSecp256k1Signature2019";
pub const PROOF_PURPOSE: &str = "assertionMethod";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no vehicle with VIN {0}")]
    VehicleNotFound(String),
    #[error("vehicle with VIN {0} is not minted under the requested token")]
    NotMinted(String),
    #[error("canonicalization failed: {0}")]
    Canonicalization(#[from] CanonicalError),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("verification failed: {0}")]
    Verification(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Issuance parameters that do not change between credentials.
#[derive(Debug, Clone)]
pub struct IssuerSettings {
    pub chain_id: u64,
    /// Vehicle NFT contract the credential subject lives in
    pub vehicle_nft_address: Address,
    /// Time between issuance and expiration
    pub validity: Duration,
}

/// XSD dateTime in UTC with second precision, e.g. `2022-01-31T05:00:00Z`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// DID of a vehicle NFT: `did:nft:<chainId>_erc721:<contract>_<tokenId>`.
pub fn vehicle_did(chain_id: u64, contract: &Address, token_id: U256) -> String {
    format!(
        "did:nft:{}_erc721:{}_{}",
        chain_id,
        to_checksum_address(contract),
        token_id
    )
}

/// Builds the unsigned VIN credential.
pub fn build_credential(
    settings: &IssuerSettings,
    issuer_did: &str,
    claim_id: Uuid,
    vin: &str,
    token_id: U256,
    issued_at: DateTime<Utc>,
) -> Value {
    json!({
        "@context": [CREDENTIALS_V1_CONTEXT, SCHEMA_ORG_CONTEXT],
        "id": format!("urn:uuid:{}", claim_id),
        "type": ["VerifiableCredential", "Vehicle"],
        "issuer": issuer_did,
        "issuanceDate": format_timestamp(issued_at),
        "expirationDate": format_timestamp(issued_at + settings.validity),
        "credentialSubject": {
            "id": vehicle_did(settings.chain_id, &settings.vehicle_nft_address, token_id),
            "vehicleIdentificationNumber": vin,
        },
    })
}

/// Proof object before the `jws` is attached.
pub fn proof_options(verification_method: &str, created: DateTime<Utc>) -> Value {
    json!({
        "type": PROOF_TYPE,
        "proofPurpose": PROOF_PURPOSE,
        "verificationMethod": verification_method,
        "created": format_timestamp(created),
    })
}

/// Computes the 64-byte proof payload.
///
/// `document` must not carry a `proof`; `proof` must not carry a `jws`.
pub fn proof_digest(document: &Value, proof: &Value) -> Result<[u8; 64], CredentialError> {
    let context = document
        .get("@context")
        .cloned()
        .ok_or_else(|| CredentialError::Verification("credential has no @context".to_string()))?;

    let mut proof_document = proof
        .as_object()
        .cloned()
        .ok_or_else(|| CredentialError::Verification("proof must be an object".to_string()))?;
    proof_document.insert("@context".to_string(), context);

    let proof_nquads = canonical::canonicalize(&Value::Object(proof_document))?;
    let document_nquads = canonical::canonicalize(document)?;

    let mut payload = [0u8; 64];
    payload[..32].copy_from_slice(&Sha256::digest(proof_nquads.as_bytes()));
    payload[32..].copy_from_slice(&Sha256::digest(document_nquads.as_bytes()));
    Ok(payload)
}

/// Signs `document` and returns it with the proof attached.
pub fn sign_credential(
    document: Value,
    key: &IssuerKey,
    created: DateTime<Utc>,
) -> Result<Value, CredentialError> {
    let mut proof = proof_options(key.verification_method(), created);
    let payload = proof_digest(&document, &proof)?;
    let jws = jws::sign_detached(key, &payload)?;

    if let Value::Object(fields) = &mut proof {
        fields.insert("jws".to_string(), Value::String(jws));
    }

    let mut signed = into_object(document)?;
    signed.insert("proof".to_string(), proof);
    Ok(Value::Object(signed))
}

/// Recomputes the proof payload of a signed credential and checks its JWS.
pub fn verify_credential(
    document: &Value,
    verifying_key: &VerifyingKey,
) -> Result<(), CredentialError> {
    let mut unsigned = into_object(document.clone())?;
    let mut proof = match unsigned.remove("proof") {
        Some(Value::Object(proof)) => proof,
        Some(_) => {
            return Err(CredentialError::Verification(
                "proof must be an object".to_string(),
            ))
        }
        None => return Err(CredentialError::Verification("credential has no proof".to_string())),
    };
    let jws = match proof.remove("jws") {
        Some(Value::String(jws)) => jws,
        _ => return Err(CredentialError::Verification("proof has no jws".to_string())),
    };
    if proof.get("type").and_then(Value::as_str) != Some(PROOF_TYPE) {
        return Err(CredentialError::Verification(format!(
            "proof type must be {}",
            PROOF_TYPE
        )));
    }

    let payload = proof_digest(&Value::Object(unsigned), &Value::Object(proof))?;
    jws::verify_detached(&jws, &payload, verifying_key)
}

fn into_object(value: Value) -> Result<Map<String, Value>, CredentialError> {
    match value {
        Value::Object(fields) => Ok(fields),
        _ => Err(CredentialError::Verification(
            "credential must be a JSON object".to_string(),
        )),
    }
}
