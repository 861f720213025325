//! Authorization URL construction
//!
//! Builds the redirect target for the start of the OAuth flow. The `state`
//! parameter is the signed anti-forgery token from [`crate::state`]; the
//! provider returns it unchanged on the callback.

use crate::token::ProviderConfig;

/// Build the full authorization URL with all required OAuth parameters.
pub fn build_authorization_url(config: &ProviderConfig, state: &str) -> String {
    format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&state={}",
        config.authorize_url,
        urlencoded(&config.client_id),
        urlencoded(&config.redirect_uri),
        state,
    )
}

/// Minimal URL encoding for parameter values.
/// Only encodes characters that would break URL parameter parsing. The state
/// token is base64url plus '.' and never needs encoding.
fn urlencoded(s: &str) -> String {
    s.replace('%', "%25")
        .replace(' ', "%20")
        .replace(':', "%3A")
        .replace('/', "%2F")
        .replace('&', "%26")
        .replace('?', "%3F")
}
