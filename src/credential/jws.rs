//! Detached ES256K JWS with unencoded payload (RFC 7797).
//!
//! The payload is the 64-byte proof digest; it is not embedded in the token,
//! so the serialized form is `<header>..<signature>`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::CredentialError;
use crate::crypto::{verify_prehash, IssuerKey};

/// Protected header. Field order fixes the serialized bytes.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct Header {
    alg: String,
    b64: bool,
    crit: Vec<String>,
}

fn header() -> Header {
    Header {
        alg: "ES256K".to_string(),
        b64: false,
        crit: vec!["b64".to_string()],
    }
}

fn encoded_header() -> Result<String, CredentialError> {
    let json = serde_json::to_vec(&header())?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// `SHA-256(header_b64 || '.' || payload)`
fn signing_digest(header_b64: &str, payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(header_b64.as_bytes());
    hasher.update(b".");
    hasher.update(payload);
    hasher.finalize().into()
}

/// Signs `payload` and returns the detached JWS.
pub fn sign_detached(key: &IssuerKey, payload: &[u8]) -> Result<String, CredentialError> {
    let header_b64 = encoded_header()?;
    let digest = signing_digest(&header_b64, payload);
    let signature = key
        .sign_prehash(&digest)
        .map_err(CredentialError::Signing)?;
    Ok(format!("{}..{}", header_b64, URL_SAFE_NO_PAD.encode(signature)))
}

/// Verifies a detached JWS over `payload`.
pub fn verify_detached(
    jws: &str,
    payload: &[u8],
    verifying_key: &VerifyingKey,
) -> Result<(), CredentialError> {
    let mut parts = jws.split('.');
    let (header_b64, middle, signature_b64) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(m), Some(s), None) => (h, m, s),
        _ => {
            return Err(CredentialError::Verification(
                "JWS must have three segments".to_string(),
            ))
        }
    };
    if !middle.is_empty() {
        return Err(CredentialError::Verification(
            "JWS payload must be detached".to_string(),
        ));
    }

    let header_json = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|e| CredentialError::Verification(format!("header encoding: {}", e)))?;
    let parsed: Header = serde_json::from_slice(&header_json)
        .map_err(|e| CredentialError::Verification(format!("header: {}", e)))?;
    if parsed != header() {
        return Err(CredentialError::Verification(format!(
            "unsupported JWS header {:?}",
            parsed
        )));
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|e| CredentialError::Verification(format!("signature encoding: {}", e)))?;
    if signature.len() != 64 {
        return Err(CredentialError::Verification(format!(
            "signature must be 64 bytes, got {}",
            signature.len()
        )));
    }

    let digest = signing_digest(header_b64, payload);
    verify_prehash(verifying_key, &digest, &signature).map_err(CredentialError::Verification)
}
