//! OAuth anti-CSRF state guard
//!
//! Mints and verifies the short-lived state value carried through the
//! authorize/callback round trip. The design is stateless: nothing is
//! persisted, authenticity derives entirely from the HMAC, and the nonce is
//! never looked up anywhere. Replay within the validity window is bounded by
//! the 10-minute TTL and the fact that the value only travels over the OAuth
//! redirect channel.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use common::Secret;
use rand::RngExt;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::signed;

/// Validity window for a minted state token.
pub const STATE_TTL: Duration = Duration::from_secs(600);

/// Random nonce length in bytes. RFC 6749 asks for unguessable state; 32
/// bytes is comfortably past the 24-byte floor we hold ourselves to.
const NONCE_LEN: usize = 32;

/// Claims carried inside a state token. Kept minimal — expiry plus a random
/// nonce, no PII in transit.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StateClaims {
    /// Issued-at, unix seconds
    pub iat: i64,
    /// Expires-at, unix seconds
    pub exp: i64,
    /// Random nonce, base64url
    pub nonce: String,
}

/// Mints and verifies signed OAuth state tokens with a server-held secret.
pub struct StateGuard {
    secret: Secret<String>,
}

impl StateGuard {
    pub fn new(secret: Secret<String>) -> Self {
        Self { secret }
    }

    /// Mint a state token valid for [`STATE_TTL`] from now.
    pub fn mint(&self) -> Result<String> {
        self.mint_at(Utc::now())
    }

    /// Mint with an explicit clock, for tests that pin time.
    pub fn mint_at(&self, now: DateTime<Utc>) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce);

        let claims = StateClaims {
            iat: now.timestamp(),
            exp: now.timestamp() + STATE_TTL.as_secs() as i64,
            nonce: URL_SAFE_NO_PAD.encode(nonce),
        };
        signed::encode(&claims, self.secret.expose_bytes())
    }

    /// Verify a state token returned on the callback.
    ///
    /// Signature first (constant time, via the codec), then the expiry
    /// check: `exp >= now` passes, anything older fails `StateExpired`.
    pub fn verify(&self, token: &str) -> Result<StateClaims> {
        self.verify_at(token, Utc::now())
    }

    /// Verify with an explicit clock, for tests that pin time.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<StateClaims> {
        let claims: StateClaims = signed::decode_and_verify(token, self.secret.expose_bytes())?;
        if claims.exp < now.timestamp() {
            return Err(Error::StateExpired);
        }
        Ok(claims)
    }
}
