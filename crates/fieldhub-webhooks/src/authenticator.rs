//! Raw-body HMAC signature verification
//!
//! FieldHub signs each delivery with `base64(HMAC-SHA256(client_secret,
//! raw_body))` in the `X-FieldHub-Hmac-SHA256` header. Verification must run
//! over the exact bytes received on the wire, before any JSON parsing —
//! re-encoding can change the byte-for-byte representation and invalidate
//! the signature.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const DIGEST_LEN: usize = 32;

/// Verifies inbound webhook signatures with the provider client secret.
pub struct WebhookAuthenticator {
    secret: Secret<String>,
}

impl WebhookAuthenticator {
    pub fn new(secret: Secret<String>) -> Self {
        Self { secret }
    }

    /// Check a delivery's signature header against the raw body bytes.
    ///
    /// A header that is not base64, or decodes to the wrong digest length,
    /// short-circuits to `false` without comparing — length inequality is
    /// not secret. The digest comparison itself is constant time
    /// (`Mac::verify_slice`), never a string compare.
    pub fn verify(&self, raw_body: &[u8], signature_header: &str) -> bool {
        let claimed = match STANDARD.decode(signature_header.trim()) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        if claimed.len() != DIGEST_LEN {
            return false;
        }

        // HMAC accepts keys of any length
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_bytes())
            .expect("HMAC key of any length");
        mac.update(raw_body);
        mac.verify_slice(&claimed).is_ok()
    }
}

/// Sign a body the way the provider does. Used by tests and local tooling.
pub fn sign(secret: &str, raw_body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key of any length");
    mac.update(raw_body);
    STANDARD.encode(mac.finalize().into_bytes())
}
