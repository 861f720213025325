//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Secrets (provider client secret, state signing secret) are loaded from
//! env vars or `*_file` paths, never stored in the TOML directly. A missing
//! secret is fatal at startup — the service cannot limp along without them.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use fieldhub_auth::ProviderConfig;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub app: AppConfig,
    pub provider: ProviderSection,
}

/// HTTP server settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Local application settings
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Base URL for operator-facing redirects (the connections page)
    pub base_url: String,
    pub database_path: PathBuf,
    /// Path to a file containing the provider client secret
    /// (alternative to the FIELDHUB_CLIENT_SECRET env var)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    /// Path to a file containing the state signing secret
    /// (alternative to the STATE_SIGNING_SECRET env var)
    #[serde(default)]
    pub state_secret_file: Option<PathBuf>,
}

/// FieldHub endpoints and client identity
#[derive(Debug, Deserialize)]
pub struct ProviderSection {
    pub authorize_url: String,
    pub token_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Secrets resolved at load time, kept out of the deserialized config.
#[derive(Debug)]
pub struct Secrets {
    /// FieldHub client secret: token endpoint auth and webhook HMAC key
    pub client_secret: Secret<String>,
    /// Server-held key for the anti-forgery state token
    pub state_secret: Secret<String>,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file and resolve secrets.
    ///
    /// Secret resolution order, per secret:
    /// 1. env var (`FIELDHUB_CLIENT_SECRET` / `STATE_SIGNING_SECRET`)
    /// 2. the corresponding `*_file` path from config
    pub fn load(path: &Path) -> common::Result<(Self, Secrets)> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        for (name, url) in [
            ("provider.authorize_url", &config.provider.authorize_url),
            ("provider.token_url", &config.provider.token_url),
            ("app.base_url", &config.app.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if config.provider.timeout_secs == 0 {
            return Err(common::Error::Config(
                "provider.timeout_secs must be greater than 0".into(),
            ));
        }
        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "server.max_connections must be greater than 0".into(),
            ));
        }

        let secrets = Secrets {
            client_secret: resolve_secret(
                "FIELDHUB_CLIENT_SECRET",
                config.app.client_secret_file.as_deref(),
            )?,
            state_secret: resolve_secret(
                "STATE_SIGNING_SECRET",
                config.app.state_secret_file.as_deref(),
            )?,
        };

        Ok((config, secrets))
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("fieldlink-connect-api.toml")
    }

    /// The provider config handed to the OAuth client.
    pub fn provider_config(&self, secrets: &Secrets) -> ProviderConfig {
        ProviderConfig {
            authorize_url: self.provider.authorize_url.clone(),
            token_url: self.provider.token_url.clone(),
            client_id: self.provider.client_id.clone(),
            client_secret: secrets.client_secret.clone(),
            redirect_uri: self.provider.redirect_uri.clone(),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_secs)
    }
}

fn resolve_secret(env_var: &str, file: Option<&Path>) -> common::Result<Secret<String>> {
    if let Ok(value) = std::env::var(env_var) {
        if !value.is_empty() {
            return Ok(Secret::new(value));
        }
    }
    if let Some(path) = file {
        let value = std::fs::read_to_string(path).map_err(|e| {
            common::Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let value = value.trim().to_owned();
        if !value.is_empty() {
            return Ok(Secret::new(value));
        }
    }
    Err(common::Error::Config(format!(
        "{env_var} not set and no secret file configured"
    )))
}
