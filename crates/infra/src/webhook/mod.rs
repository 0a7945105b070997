//! Inbound webhook ingestion: signature check, validation, enqueue.

pub mod ingest;
pub mod signing;

pub use ingest::{IngestError, IngestReceipt, WebhookIngestor};
pub use signing::{SIGNATURE_HEADER, sign_payload, verify_signature};
