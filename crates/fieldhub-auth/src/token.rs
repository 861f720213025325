//! OAuth token exchange and refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (initial OAuth flow completion)
//! 2. Token refresh (on-demand, before expiry)
//!
//! Both operations POST a form to the provider's token endpoint with
//! different grant types. FieldHub is a confidential client, so both carry
//! the client secret. Every call runs under the client's bounded timeout; a
//! timed-out refresh surfaces as an error, never as a stale token.

use std::time::Duration;

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Provider endpoints and client identity, threaded in at construction.
/// No ambient globals: tests point this at a local mock server.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub authorize_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_uri: String,
}

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time; the caller
/// converts it to an absolute timestamp when storing the credential.
/// `refresh_token` and `scope` are optional because the provider may omit
/// them on refresh — the caller then carries the previous values forward.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
    /// Space-separated granted scopes, when the provider reports them
    #[serde(default)]
    pub scope: Option<String>,
}

/// HTTP client for the provider's token endpoint.
pub struct OAuthClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl OAuthClient {
    /// Build a client with a bounded per-request timeout.
    pub fn new(config: ProviderConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Exchange an authorization code for tokens (initial OAuth flow).
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose().as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::TokenExchange(format!(
                "token endpoint returned {status}: {}",
                error_detail(response).await
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
    }

    /// Refresh an access token using a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose().as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response).await;

            // 401/403 means the refresh token is revoked or invalid
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(Error::InvalidCredentials(format!(
                    "refresh token rejected ({status}): {detail}"
                )));
            }

            return Err(Error::TokenExchange(format!(
                "token refresh returned {status}: {detail}"
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
    }
}

/// Pull the provider's `error_description` out of an error body when there
/// is one, falling back to the raw body text.
async fn error_detail(response: reqwest::Response) -> String {
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("error_description")
                .and_then(|d| d.as_str())
                .map(String::from)
        })
        .unwrap_or(body)
}
