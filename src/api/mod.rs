//! REST API Server Module
//!
//! HTTP ingestion for the relayer's transaction status channel and the
//! device fingerprint channel. Requests are answered after processing, so
//! the response code carries the acknowledgement decision.

// Shared structures, rejection handling and the server
mod generic;

// Status and fingerprint ingestion handlers
mod ingest;

pub use generic::{handle_rejection, ApiResponse, ApiServer, JsonDeserializeError};
pub use ingest::DeliveryReceipt;
