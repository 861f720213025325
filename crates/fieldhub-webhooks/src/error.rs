//! Webhook ingestion error types

use thiserror::Error;

/// Errors from the ingestion pipeline. The HTTP layer maps these to 401,
/// 400 and 500 respectively; a dedupe is not an error (see
/// [`crate::Outcome::Deduped`]).
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Store(#[from] fieldhub_store::Error),
}

/// Result alias for webhook operations.
pub type Result<T> = std::result::Result<T, Error>;
