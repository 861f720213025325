//! Error types for OAuth and signed-token operations

/// Errors from signed-token verification and OAuth endpoint calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed token")]
    MalformedToken,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("malformed token payload: {0}")]
    MalformedPayload(String),

    #[error("state token expired")]
    StateExpired,

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
