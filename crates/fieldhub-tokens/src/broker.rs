//! Refresh-before-expiry token brokerage
//!
//! Any component that needs to call FieldHub on behalf of a connection asks
//! the broker for a valid access token. If the stored token expires within
//! [`REFRESH_WINDOW`], the broker refreshes first and only then answers; a
//! failed refresh propagates instead of handing out a token that is about to
//! die mid-request.
//!
//! Refresh carries no per-connection lock. Two concurrent near-expiry calls
//! may both refresh; each is a complete provider exchange and the store
//! write is a full overwrite, so the credential converges to the last
//! response received (last-writer-wins).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fieldhub_auth::OAuthClient;
use fieldhub_store::{Connection, Credential, NewCredential, Store, parse_scopes};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Refresh when the access token expires within this window.
pub const REFRESH_WINDOW: Duration = Duration::from_secs(120);

/// Orchestrates code exchange and token refresh over the store.
pub struct TokenBroker {
    store: Arc<Store>,
    oauth: OAuthClient,
}

impl TokenBroker {
    pub fn new(store: Arc<Store>, oauth: OAuthClient) -> Self {
        Self { store, oauth }
    }

    /// Complete the OAuth flow: exchange the authorization code and persist
    /// the new connection with its credential in one transaction.
    pub async fn connect(&self, code: &str) -> Result<Connection> {
        let token = self
            .oauth
            .exchange_code(code)
            .await
            .map_err(|e| Error::Exchange(e.to_string()))?;

        // The provider must grant a refresh token on the initial exchange;
        // without one the credential cannot be maintained.
        let refresh_token = token
            .refresh_token
            .ok_or_else(|| Error::Exchange("exchange response carried no refresh token".into()))?;

        let expires_at = absolute_expiry(Utc::now(), token.expires_in);
        let scopes = token.scope.as_deref().map(parse_scopes).unwrap_or_default();

        let connection = self.store.create_connection(
            "fieldhub",
            NewCredential {
                access_token: token.access_token,
                refresh_token,
                expires_at,
                scopes,
            },
        )?;
        info!(connection_id = %connection.id, "connected FieldHub account");
        Ok(connection)
    }

    /// Disconnect: remove the connection and its credential.
    pub fn disconnect(&self, connection_id: &str) -> Result<()> {
        if !self.store.delete_connection(connection_id)? {
            return Err(Error::NotFound(connection_id.to_owned()));
        }
        info!(connection_id, "disconnected FieldHub account");
        Ok(())
    }

    /// A currently valid access token for the connection, refreshing first
    /// when the stored one is inside the refresh window.
    pub async fn get_valid_access_token(&self, connection_id: &str) -> Result<String> {
        let credential = self
            .store
            .get_credential(connection_id)?
            .ok_or_else(|| Error::NotFound(connection_id.to_owned()))?;

        let window = chrono::Duration::seconds(REFRESH_WINDOW.as_secs() as i64);
        if credential.expires_at - Utc::now() <= window {
            debug!(connection_id, "access token inside refresh window");
            let refreshed = self.refresh(connection_id, &credential).await?;
            return Ok(refreshed.access_token);
        }

        Ok(credential.access_token)
    }

    /// Refresh a connection's credential against the provider and persist
    /// the result.
    ///
    /// The previous refresh token is carried forward when the provider does
    /// not rotate it, and scopes are only replaced when the response names
    /// them. On any failure the stored credential is left untouched.
    pub async fn refresh(
        &self,
        connection_id: &str,
        current: &Credential,
    ) -> Result<Credential> {
        let token = match self.oauth.refresh(&current.refresh_token).await {
            Ok(token) => token,
            Err(e) => {
                warn!(connection_id, error = %e, "token refresh failed");
                return Err(Error::Refresh(e.to_string()));
            }
        };

        let expires_at = absolute_expiry(Utc::now(), token.expires_in);
        let refresh_token = token
            .refresh_token
            .unwrap_or_else(|| current.refresh_token.clone());
        let scopes = token.scope.as_deref().map(parse_scopes);

        self.store.apply_refresh(
            connection_id,
            &token.access_token,
            &refresh_token,
            expires_at,
            scopes.as_ref(),
        )?;
        info!(connection_id, "refreshed access token");

        Ok(Credential {
            connection_id: connection_id.to_owned(),
            access_token: token.access_token,
            refresh_token,
            expires_at,
            scopes: scopes.unwrap_or_else(|| current.scopes.clone()),
        })
    }
}

/// Absolute expiry from the provider's `expires_in` delta. The delta is an
/// untrusted u64: values past the i64 or chrono range saturate to the far
/// future instead of wrapping negative or panicking in Duration math.
fn absolute_expiry(now: DateTime<Utc>, expires_in: u64) -> DateTime<Utc> {
    i64::try_from(expires_in)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
