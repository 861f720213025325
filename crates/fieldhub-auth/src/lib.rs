//! FieldHub OAuth authentication library
//!
//! Provides the signed anti-forgery state token, the OAuth token endpoint
//! client (code exchange + refresh), and the authorize-URL builder. This
//! crate is a standalone library with no dependency on the service binary —
//! it can be tested and used independently.
//!
//! Authorization flow:
//! 1. Service calls `StateGuard::mint()` and redirects the operator to
//!    `authorize::build_authorization_url()`
//! 2. FieldHub redirects back with `code` + `state`
//! 3. Service calls `StateGuard::verify()` on the returned state
//! 4. Service calls `OAuthClient::exchange_code()` with the code
//! 5. Tokens are persisted by the caller; later refreshes go through
//!    `OAuthClient::refresh()`

pub mod authorize;
pub mod error;
pub mod signed;
pub mod state;
pub mod token;

pub use authorize::build_authorization_url;
pub use error::{Error, Result};
pub use state::{StateClaims, StateGuard, STATE_TTL};
pub use token::{OAuthClient, ProviderConfig, TokenResponse};
