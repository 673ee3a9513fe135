//! VIN credential issuance.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use ethereum_types::U256;
use tracing::info;
use uuid::Uuid;

use super::{build_credential, sign_credential, CredentialError, IssuerSettings};
use crate::crypto::IssuerKey;
use crate::model::CredentialRecord;
use crate::storage::{RegistryStore, StoreError};

/// Issues VIN credentials for minted vehicles.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Signs and stores a new credential and returns its claim id.
    async fn issue_vin_credential(&self, vin: &str, token_id: U256)
        -> Result<Uuid, CredentialError>;
}

/// Issuer signing with the service's secp256k1 key.
pub struct VinCredentialIssuer {
    store: Arc<dyn RegistryStore>,
    key: Arc<IssuerKey>,
    settings: IssuerSettings,
}

impl VinCredentialIssuer {
    pub fn new(store: Arc<dyn RegistryStore>, key: Arc<IssuerKey>, settings: IssuerSettings) -> Self {
        Self {
            store,
            key,
            settings,
        }
    }

    /// Issues a credential as of `now`.
    ///
    /// Nothing is written unless the vehicle exists, is minted under
    /// `token_id`, and the document was canonicalized and signed.
    ///
    /// # Returns
    ///
    /// * `Ok(Uuid)` - Claim id of the stored credential
    /// * `Err(CredentialError::VehicleNotFound)` - No vehicle with this VIN
    /// * `Err(CredentialError::NotMinted)` - Vehicle has no or another token id
    pub async fn issue_at(
        &self,
        vin: &str,
        token_id: U256,
        now: DateTime<Utc>,
    ) -> Result<Uuid, CredentialError> {
        let vehicle = self
            .store
            .get_vehicle_by_vin(vin)
            .await?
            .ok_or_else(|| CredentialError::VehicleNotFound(vin.to_string()))?;
        if vehicle.token_id != Some(token_id) || !vehicle.is_minted() {
            return Err(CredentialError::NotMinted(vin.to_string()));
        }

        // Stored expiration matches the second-precision document dates.
        let now = now.trunc_subsecs(0);
        let claim_id = Uuid::new_v4();
        let document = build_credential(
            &self.settings,
            self.key.did(),
            claim_id,
            vin,
            token_id,
            now,
        );
        let signed = sign_credential(document, &self.key, now)?;

        let record = CredentialRecord {
            claim_id,
            credential: serde_json::to_vec(&signed)?,
            expiration_date: now + self.settings.validity,
        };
        self.store
            .record_credential(&record, vin)
            .await
            .map_err(|e| match e {
                // The vehicle disappeared between lookup and write.
                StoreError::NotFound(_) => CredentialError::VehicleNotFound(vin.to_string()),
                other => CredentialError::Store(other),
            })?;

        info!(
            "Issued VIN credential {} for vehicle {} (token {})",
            claim_id, vehicle.id, token_id
        );
        Ok(claim_id)
    }
}

#[async_trait]
impl CredentialIssuer for VinCredentialIssuer {
    async fn issue_vin_credential(
        &self,
        vin: &str,
        token_id: U256,
    ) -> Result<Uuid, CredentialError> {
        self.issue_at(vin, token_id, Utc::now()).await
    }
}
