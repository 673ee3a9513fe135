//! Registry Client
//!
//! Prepares registry operations for signing and relaying:
//!
//! 1. [`RegistryClient::hash`] / [`RegistryClient::typed_data`] give the
//!    external wallet service the EIP-712 digest and payload to sign.
//! 2. [`RegistryClient::build_call`] ABI-encodes the contract call with the
//!    returned signature appended.
//! 3. [`RegistryClient::submit`] records the meta-transaction request and
//!    publishes the envelope for the relayer. A request whose publish failed
//!    stays `Unsubmitted` and is republished when submitted again under the
//!    same request id.

use std::sync::Arc;

use ethereum_types::H256;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::abi::RegistryContract;
use crate::crypto::format_address;
use crate::eip712::{Eip712Domain, RegistryMessage, TypedDataError};
use crate::model::{MetaTransactionRequest, MetaTransactionStatus, TransactionSubject};
use crate::storage::{RegistryStore, StoreError};

pub mod sink;

pub use sink::{HttpTransactionSink, SinkError, TransactionRequest, TransactionSink};

/// Length of an `r || s || v` signature.
pub const SIGNATURE_LENGTH: usize = 65;

/// Registry client failures.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed arguments or signature. Never retried.
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Publish(#[from] SinkError),
}

impl From<TypedDataError> for ClientError {
    fn from(err: TypedDataError) -> Self {
        ClientError::Encoding(err.to_string())
    }
}

/// Builds, hashes and publishes signed registry operations.
pub struct RegistryClient {
    domain: Eip712Domain,
    contract: Arc<RegistryContract>,
    store: Arc<dyn RegistryStore>,
    sink: Arc<dyn TransactionSink>,
}

impl RegistryClient {
    pub fn new(
        domain: Eip712Domain,
        contract: Arc<RegistryContract>,
        store: Arc<dyn RegistryStore>,
        sink: Arc<dyn TransactionSink>,
    ) -> Self {
        Self {
            domain,
            contract,
            store,
            sink,
        }
    }

    pub fn domain(&self) -> &Eip712Domain {
        &self.domain
    }

    /// EIP-712 digest the wallet service signs.
    pub fn hash(&self, message: &RegistryMessage) -> Result<H256, ClientError> {
        Ok(self.domain.hash(message)?)
    }

    /// `eth_signTypedData_v4` payload for the wallet service.
    pub fn typed_data(&self, message: &RegistryMessage) -> Result<Value, ClientError> {
        Ok(self.domain.typed_data(&message.to_typed_message()?))
    }

    /// ABI-encodes the contract call for `message` and wraps it in a
    /// transaction request envelope.
    ///
    /// # Arguments
    ///
    /// * `request_id` - Correlation id for relayer status events
    /// * `message` - The signed operation
    /// * `signature` - 65-byte `r || s || v` signature over [`Self::hash`]
    pub fn build_call(
        &self,
        request_id: &str,
        message: &RegistryMessage,
        signature: &[u8],
    ) -> Result<TransactionRequest, ClientError> {
        message.validate()?;
        if signature.len() != SIGNATURE_LENGTH {
            return Err(ClientError::Encoding(format!(
                "signature must be {} bytes, got {}",
                SIGNATURE_LENGTH,
                signature.len()
            )));
        }

        let call_data = message.call_data(signature);

        Ok(TransactionRequest {
            request_id: request_id.to_string(),
            target_address: format_address(&self.contract.address()),
            encoded_call_data: format!("0x{}", hex::encode(call_data)),
        })
    }

    /// Records the request as `Unsubmitted` and publishes it to the relayer.
    ///
    /// Encoding failures are detected before anything is written. When the
    /// publish fails the row stays `Unsubmitted`; submitting the same
    /// operation again under `request_id` republishes it.
    pub async fn submit(
        &self,
        request_id: &str,
        message: &RegistryMessage,
        signature: &[u8],
        subject: Option<TransactionSubject>,
    ) -> Result<TransactionRequest, ClientError> {
        let request = self.build_call(request_id, message, signature)?;
        self.record_unsubmitted(request_id, subject).await?;

        if let Err(e) = self.sink.publish(&request).await {
            error!("Failed to publish {} request {}: {}", message.name(), request_id, e);
            return Err(e.into());
        }

        info!("Submitted {} request {}", message.name(), request_id);
        Ok(request)
    }

    /// Inserts the request row, or accepts an existing row for the same
    /// subject that was never published.
    async fn record_unsubmitted(
        &self,
        request_id: &str,
        subject: Option<TransactionSubject>,
    ) -> Result<(), ClientError> {
        let conflict = match self
            .store
            .insert_meta_transaction(&MetaTransactionRequest::new(request_id, subject.clone()))
            .await
        {
            Ok(()) => return Ok(()),
            Err(StoreError::Conflict(what)) => what,
            Err(e) => return Err(e.into()),
        };

        match self.store.get_meta_transaction(request_id).await? {
            Some(existing)
                if existing.status == MetaTransactionStatus::Unsubmitted
                    && existing.subject == subject =>
            {
                warn!("Request {} was never published; publishing again", request_id);
                Ok(())
            }
            _ => Err(StoreError::Conflict(conflict).into()),
        }
    }
}
