//! Identity core configuration: lifetimes, PKCE policy, signing and client registrations.

use std::collections::HashSet;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ConfigError;
use super::key_material::SigningAlgorithm;
use super::types::{Client, GrantType};

/// Upper bound for every lifetime and interval: ten years.
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 3600;

/// Top-level configuration for an [`IdentityServer`](super::server::IdentityServer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpConfig {
    /// Issuer identifier placed in every token (`iss`).
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Authorization code lifetime in seconds (default: 5 minutes)
    #[serde(default = "default_code_lifetime")]
    pub authorization_code_lifetime_secs: u64,

    /// Access token lifetime in seconds (default: 1 hour)
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime_secs: u64,

    /// ID token lifetime in seconds (default: 5 minutes)
    #[serde(default = "default_id_token_lifetime")]
    pub id_token_lifetime_secs: u64,

    /// Absolute refresh token chain lifetime in seconds (default: 30 days)
    #[serde(default = "default_refresh_token_lifetime")]
    pub refresh_token_lifetime_secs: u64,

    /// How long a rotated-out signing key still verifies tokens.
    /// Must cover the access token lifetime.
    #[serde(default = "default_key_grace")]
    pub key_rotation_grace_secs: u64,

    /// Scheduled key rotation interval; `None` disables scheduled rotation.
    #[serde(default)]
    pub key_rotation_interval_secs: Option<u64>,

    /// Interval between background sweeps of expired grants.
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,

    /// Require PKCE for every authorization request, not just flagged clients.
    #[serde(default = "default_true")]
    pub require_pkce: bool,

    /// Accept `code_challenge_method=plain`.
    #[serde(default)]
    pub allow_plain_pkce: bool,

    #[serde(default)]
    pub signing_algorithm: SigningAlgorithm,

    /// Use `{issuer}/resources` as the access token audience instead of the client id.
    #[serde(default = "default_true")]
    pub static_audience: bool,

    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

/// A client registration as it appears in configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    /// Plaintext secret, hashed on load. Prefer `client_secret_hash` in files.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Pre-hashed secret (SHA-256, base64url).
    #[serde(default)]
    pub client_secret_hash: Option<String>,
    #[serde(default)]
    pub grant_types: Vec<GrantType>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub require_pkce: bool,
}

impl ClientConfig {
    pub fn to_client(&self) -> Client {
        let mut client = Client::new(&self.client_id)
            .with_grant_types(self.grant_types.iter().copied())
            .with_scopes(self.scopes.iter().cloned())
            .with_require_pkce(self.require_pkce);
        for uri in &self.redirect_uris {
            client = client.with_redirect_uri(uri.clone());
        }
        if let Some(hash) = &self.client_secret_hash {
            client = client.with_secret_hash(hash.clone());
        } else if let Some(secret) = &self.client_secret {
            client = client.with_secret(secret);
        }
        client
    }
}

fn default_issuer() -> String {
    "https://localhost:5001".to_string()
}

fn default_code_lifetime() -> u64 {
    300
}

fn default_access_token_lifetime() -> u64 {
    3600
}

fn default_id_token_lifetime() -> u64 {
    300
}

fn default_refresh_token_lifetime() -> u64 {
    30 * 24 * 3600
}

fn default_key_grace() -> u64 {
    2 * 3600
}

fn default_eviction_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            authorization_code_lifetime_secs: default_code_lifetime(),
            access_token_lifetime_secs: default_access_token_lifetime(),
            id_token_lifetime_secs: default_id_token_lifetime(),
            refresh_token_lifetime_secs: default_refresh_token_lifetime(),
            key_rotation_grace_secs: default_key_grace(),
            key_rotation_interval_secs: None,
            eviction_interval_secs: default_eviction_interval(),
            require_pkce: true,
            allow_plain_pkce: false,
            signing_algorithm: SigningAlgorithm::default(),
            static_audience: true,
            clients: Vec::new(),
        }
    }
}

impl IdpConfig {
    pub fn builder() -> IdpConfigBuilder {
        IdpConfigBuilder::new()
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: IdpConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        let config = Self::from_json_str(&content)?;
        info!(
            path = %path.display(),
            clients = config.clients.len(),
            "loaded identity configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Invalid("issuer must not be empty".into()));
        }
        if !(1..=600).contains(&self.authorization_code_lifetime_secs) {
            return Err(ConfigError::Invalid(
                "authorization code lifetime must be 1..=600 seconds".into(),
            ));
        }
        for (name, value) in [
            ("access token lifetime", self.access_token_lifetime_secs),
            ("id token lifetime", self.id_token_lifetime_secs),
            ("refresh token lifetime", self.refresh_token_lifetime_secs),
            ("eviction interval", self.eviction_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        for (name, value) in [
            ("access token lifetime", Some(self.access_token_lifetime_secs)),
            ("id token lifetime", Some(self.id_token_lifetime_secs)),
            ("refresh token lifetime", Some(self.refresh_token_lifetime_secs)),
            ("eviction interval", Some(self.eviction_interval_secs)),
            ("key rotation grace", Some(self.key_rotation_grace_secs)),
            ("key rotation interval", self.key_rotation_interval_secs),
        ] {
            if value.is_some_and(|v| v > MAX_DURATION_SECS) {
                return Err(ConfigError::Invalid(format!("{} exceeds ten years", name)));
            }
        }
        if self.key_rotation_grace_secs < self.access_token_lifetime_secs {
            return Err(ConfigError::Invalid(
                "key rotation grace must cover the access token lifetime".into(),
            ));
        }
        if self.key_rotation_interval_secs == Some(0) {
            return Err(ConfigError::Invalid("key rotation interval must be positive".into()));
        }
        let mut seen = HashSet::new();
        for client in &self.clients {
            if client.client_id.is_empty() {
                return Err(ConfigError::Invalid("client_id must not be empty".into()));
            }
            if !seen.insert(client.client_id.as_str()) {
                let message = format!("duplicate client `{}`", client.client_id);
                return Err(ConfigError::Invalid(message));
            }
        }
        Ok(())
    }

    /// Audience placed in access tokens issued to `client_id`.
    pub fn access_token_audience(&self, client_id: &str) -> String {
        if self.static_audience {
            format!("{}/resources", self.issuer.trim_end_matches('/'))
        } else {
            client_id.to_string()
        }
    }

    pub fn authorization_code_lifetime(&self) -> Duration {
        secs(self.authorization_code_lifetime_secs)
    }

    pub fn access_token_lifetime(&self) -> Duration {
        secs(self.access_token_lifetime_secs)
    }

    pub fn id_token_lifetime(&self) -> Duration {
        secs(self.id_token_lifetime_secs)
    }

    pub fn refresh_token_lifetime(&self) -> Duration {
        secs(self.refresh_token_lifetime_secs)
    }

    pub fn key_rotation_grace(&self) -> Duration {
        secs(self.key_rotation_grace_secs)
    }
}

fn secs(value: u64) -> Duration {
    let capped = value.min((i64::MAX / 1000) as u64) as i64;
    Duration::seconds(capped)
}

/// Builder for [`IdpConfig`]; unset fields keep their defaults.
#[derive(Debug, Default)]
pub struct IdpConfigBuilder {
    config: IdpConfig,
}

impl IdpConfigBuilder {
    pub fn new() -> Self {
        Self { config: IdpConfig::default() }
    }

    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.config.issuer = issuer.into();
        self
    }

    pub fn authorization_code_lifetime_secs(mut self, secs: u64) -> Self {
        self.config.authorization_code_lifetime_secs = secs;
        self
    }

    pub fn access_token_lifetime_secs(mut self, secs: u64) -> Self {
        self.config.access_token_lifetime_secs = secs;
        self
    }

    pub fn id_token_lifetime_secs(mut self, secs: u64) -> Self {
        self.config.id_token_lifetime_secs = secs;
        self
    }

    pub fn refresh_token_lifetime_secs(mut self, secs: u64) -> Self {
        self.config.refresh_token_lifetime_secs = secs;
        self
    }

    pub fn key_rotation_grace_secs(mut self, secs: u64) -> Self {
        self.config.key_rotation_grace_secs = secs;
        self
    }

    pub fn key_rotation_interval_secs(mut self, secs: Option<u64>) -> Self {
        self.config.key_rotation_interval_secs = secs;
        self
    }

    pub fn eviction_interval_secs(mut self, secs: u64) -> Self {
        self.config.eviction_interval_secs = secs;
        self
    }

    pub fn require_pkce(mut self, require: bool) -> Self {
        self.config.require_pkce = require;
        self
    }

    pub fn allow_plain_pkce(mut self, allow: bool) -> Self {
        self.config.allow_plain_pkce = allow;
        self
    }

    pub fn signing_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.config.signing_algorithm = algorithm;
        self
    }

    pub fn static_audience(mut self, enabled: bool) -> Self {
        self.config.static_audience = enabled;
        self
    }

    pub fn client(mut self, client: ClientConfig) -> Self {
        self.config.clients.push(client);
        self
    }

    pub fn build(self) -> Result<IdpConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
