//! Error types for token broker operations

use thiserror::Error;

/// Errors from the token broker.
#[derive(Error, Debug)]
pub enum Error {
    #[error("connection not found: {0}")]
    NotFound(String),

    #[error("token exchange failed: {0}")]
    Exchange(String),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error(transparent)]
    Store(#[from] fieldhub_store::Error),
}

/// Result alias for broker operations.
pub type Result<T> = std::result::Result<T, Error>;
