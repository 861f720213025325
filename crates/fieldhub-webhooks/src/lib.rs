//! FieldHub webhook trust boundary
//!
//! Authenticates inbound deliveries with an HMAC over the exact raw body
//! bytes, then runs the ingestion pipeline: parse, derive a content hash,
//! dedupe against the store, persist the event with its paired job. No
//! synchronous processing happens here — the handler only enqueues.

mod authenticator;
mod error;
mod ingest;

pub use authenticator::{WebhookAuthenticator, sign};
pub use error::{Error, Result};
pub use ingest::{Ingestor, Outcome};
