//! HMAC-signed token codec
//!
//! Encodes a small claim set as `base64url(json).base64url(hmac)` — a
//! stateless, tamper-evident value verified by recomputation. The codec
//! carries no expiry semantics of its own; callers put expiry in the claims
//! (see `state`).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Separator between payload and signature. Not in the base64url alphabet.
const SEPARATOR: char = '.';

fn keyed(secret: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length
    HmacSha256::new_from_slice(secret).expect("HMAC key of any length")
}

/// Serialize `payload` to JSON and produce a signed token string.
pub fn encode<T: Serialize>(payload: &T, secret: &[u8]) -> Result<String> {
    let bytes = serde_json::to_vec(payload).map_err(|e| Error::MalformedPayload(e.to_string()))?;
    let encoded = URL_SAFE_NO_PAD.encode(bytes);

    let mut mac = keyed(secret);
    mac.update(encoded.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{encoded}{SEPARATOR}{signature}"))
}

/// Verify a token's signature and parse its payload.
///
/// The signature is checked before the payload is decoded, and the
/// comparison goes through the hmac crate's constant-time `verify_slice` —
/// never a string compare.
pub fn decode_and_verify<T: DeserializeOwned>(token: &str, secret: &[u8]) -> Result<T> {
    let (payload, signature) = match token.split_once(SEPARATOR) {
        Some((p, s)) if !p.is_empty() && !s.is_empty() && !s.contains(SEPARATOR) => (p, s),
        _ => return Err(Error::MalformedToken),
    };

    let claimed = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| Error::InvalidSignature)?;

    let mut mac = keyed(secret);
    mac.update(payload.as_bytes());
    mac.verify_slice(&claimed)
        .map_err(|_| Error::InvalidSignature)?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| Error::MalformedPayload(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::MalformedPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Claims {
        sub: String,
        exp: i64,
    }

    fn claims() -> Claims {
        Claims {
            sub: "conn-42".into(),
            exp: 1_900_000_000,
        }
    }

    #[test]
    fn roundtrip_preserves_payload() {
        let token = encode(&claims(), b"secret-a").unwrap();
        let decoded: Claims = decode_and_verify(&token, b"secret-a").unwrap();
        assert_eq!(decoded, claims());
    }

    #[test]
    fn token_is_urlsafe_with_single_separator() {
        let token = encode(&claims(), b"secret-a").unwrap();
        assert_eq!(token.matches('.').count(), 1, "exactly one separator");
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'),
            "token must be URL-safe: {token}"
        );
    }

    #[test]
    fn wrong_secret_fails_with_invalid_signature() {
        let token = encode(&claims(), b"secret-a").unwrap();
        let result = decode_and_verify::<Claims>(&token, b"secret-b");
        assert!(matches!(result, Err(Error::InvalidSignature)));
    }

    #[test]
    fn tampered_signature_character_fails() {
        let token = encode(&claims(), b"secret-a").unwrap();
        let (payload, signature) = token.split_once('.').unwrap();
        // Flip one character of the signature segment
        let flipped = if signature.starts_with('A') { 'B' } else { 'A' };
        let tampered = format!("{payload}.{flipped}{}", &signature[1..]);
        let result = decode_and_verify::<Claims>(&tampered, b"secret-a");
        assert!(matches!(result, Err(Error::InvalidSignature)));
    }

    #[test]
    fn tampered_payload_fails() {
        let token = encode(&claims(), b"secret-a").unwrap();
        let (payload, signature) = token.split_once('.').unwrap();
        let flipped = if payload.starts_with('A') { 'B' } else { 'A' };
        let tampered = format!("{flipped}{}.{signature}", &payload[1..]);
        let result = decode_and_verify::<Claims>(&tampered, b"secret-a");
        assert!(matches!(result, Err(Error::InvalidSignature)));
    }

    #[test]
    fn missing_separator_is_malformed() {
        let result = decode_and_verify::<Claims>("no-separator-here", b"secret-a");
        assert!(matches!(result, Err(Error::MalformedToken)));
    }

    #[test]
    fn empty_parts_are_malformed() {
        for token in [".sig-only", "payload-only.", ".", ""] {
            let result = decode_and_verify::<Claims>(token, b"secret-a");
            assert!(
                matches!(result, Err(Error::MalformedToken)),
                "token {token:?} must be rejected as malformed"
            );
        }
    }

    #[test]
    fn extra_separator_is_malformed() {
        let token = encode(&claims(), b"secret-a").unwrap();
        let result = decode_and_verify::<Claims>(&format!("{token}.extra"), b"secret-a");
        assert!(matches!(result, Err(Error::MalformedToken)));
    }

    #[test]
    fn signed_garbage_payload_is_malformed_payload() {
        // Correctly signed, but the payload is not the expected claim set
        let token = encode(&serde_json::json!({"unrelated": true}), b"secret-a").unwrap();
        let result = decode_and_verify::<Claims>(&token, b"secret-a");
        assert!(matches!(result, Err(Error::MalformedPayload(_))));
    }

    #[test]
    fn non_base64_signature_is_invalid_signature() {
        let token = encode(&claims(), b"secret-a").unwrap();
        let (payload, _) = token.split_once('.').unwrap();
        let result = decode_and_verify::<Claims>(&format!("{payload}.!!!"), b"secret-a");
        assert!(matches!(result, Err(Error::InvalidSignature)));
    }
}
