//! Connector configuration.
//!
//! All secrets and tunables are read once, at construction, into an
//! explicit config object that is passed by `Arc` to the cipher and the
//! orchestrator. Operations never consult the process environment, so
//! tests can substitute configurations without env mutation.

use std::collections::HashMap;

use serde::Deserialize;

use crate::crypto::kdf::DEFAULT_PBKDF2_ITERATIONS;
use crate::error::{Error, Result};

/// Environment variable holding the 64-hex-char master encryption key.
pub const MASTER_KEY_ENV: &str = "INTEGRATION_ENCRYPTION_KEY";

/// Complete connector configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// OAuth client credentials keyed by provider id
    #[serde(default)]
    pub providers: HashMap<String, ClientCredentials>,
}

/// Encryption configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CryptoConfig {
    /// Master encryption key, 32 bytes hex-encoded (64 chars)
    #[serde(default)]
    pub master_key: String,
    /// PBKDF2 iteration count. Security parameter: lower values trade
    /// brute-force resistance for latency. The default reproduces the
    /// deployed count; do not raise it silently.
    #[serde(default = "default_pbkdf2_iterations")]
    pub pbkdf2_iterations: u32,
}

fn default_pbkdf2_iterations() -> u32 {
    DEFAULT_PBKDF2_ITERATIONS
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            master_key: String::new(),
            pbkdf2_iterations: default_pbkdf2_iterations(),
        }
    }
}

/// OAuth flow configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// PKCE session lifetime; the functional timeout for a full
    /// connect -> callback round trip
    #[serde(default = "default_state_ttl_minutes")]
    pub state_ttl_minutes: i64,
}

fn default_state_ttl_minutes() -> i64 {
    10
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_minutes: default_state_ttl_minutes(),
        }
    }
}

/// Per-tier cache sizing
#[derive(Debug, Clone, Deserialize)]
pub struct TierConfig {
    pub capacity: usize,
    pub ttl_seconds: u64,
}

impl TierConfig {
    const fn new(capacity: usize, ttl_seconds: u64) -> Self {
        Self {
            capacity,
            ttl_seconds,
        }
    }
}

/// Cache tier configuration with the deployed defaults
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Provider configs: static data, long TTL
    #[serde(default = "default_provider_tier")]
    pub provider: TierConfig,
    /// Decrypted tokens: sensitive, short TTL
    #[serde(default = "default_token_tier")]
    pub token: TierConfig,
    /// Derived encryption keys: expensive to compute
    #[serde(default = "default_derived_key_tier")]
    pub derived_key: TierConfig,
    /// OAuth states: TTL must match the store-side session expiry
    #[serde(default = "default_oauth_state_tier")]
    pub oauth_state: TierConfig,
    /// Integration metadata: frequently read status/health
    #[serde(default = "default_integration_tier")]
    pub integration: TierConfig,
}

fn default_provider_tier() -> TierConfig {
    TierConfig::new(50, 60 * 60)
}

fn default_token_tier() -> TierConfig {
    TierConfig::new(1000, 5 * 60)
}

fn default_derived_key_tier() -> TierConfig {
    TierConfig::new(10, 60 * 60)
}

fn default_oauth_state_tier() -> TierConfig {
    TierConfig::new(5000, 10 * 60)
}

fn default_integration_tier() -> TierConfig {
    TierConfig::new(2000, 15 * 60)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            provider: default_provider_tier(),
            token: default_token_tier(),
            derived_key: default_derived_key_tier(),
            oauth_state: default_oauth_state_tier(),
            integration: default_integration_tier(),
        }
    }
}

/// OAuth client id/secret for one provider
#[derive(Debug, Clone, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    /// Loads credentials for a provider from `{ID}_CLIENT_ID` /
    /// `{ID}_CLIENT_SECRET` environment variables. Absence of either is a
    /// hard configuration error.
    pub fn from_env(provider_id: &str) -> Result<Self> {
        let prefix = provider_id.to_uppercase();
        let id_key = format!("{}_CLIENT_ID", prefix);
        let secret_key = format!("{}_CLIENT_SECRET", prefix);

        let client_id = std::env::var(&id_key)
            .map_err(|_| Error::Configuration(format!("{} not configured in environment", id_key)))?;
        let client_secret = std::env::var(&secret_key).map_err(|_| {
            Error::Configuration(format!("{} not configured in environment", secret_key))
        })?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }
}

impl ConnectorConfig {
    /// Builds a configuration from the process environment for the given
    /// provider ids. Reads the master key and every provider's client
    /// credentials once; any missing secret fails the whole construction.
    pub fn from_env(provider_ids: &[&str]) -> Result<Self> {
        let master_key = std::env::var(MASTER_KEY_ENV).map_err(|_| {
            Error::Configuration(format!(
                "{} not configured. Generate with: openssl rand -hex 32",
                MASTER_KEY_ENV
            ))
        })?;

        let mut providers = HashMap::new();
        for id in provider_ids {
            providers.insert((*id).to_string(), ClientCredentials::from_env(id)?);
        }

        Ok(Self {
            crypto: CryptoConfig {
                master_key,
                ..CryptoConfig::default()
            },
            oauth: OAuthConfig::default(),
            cache: CacheConfig::default(),
            providers,
        })
    }

    /// Looks up client credentials for a provider. Missing entries are a
    /// configuration error naming the expected environment keys.
    pub fn client_credentials(&self, provider_id: &str) -> Result<&ClientCredentials> {
        self.providers.get(provider_id).ok_or_else(|| {
            let prefix = provider_id.to_uppercase();
            Error::Configuration(format!(
                "{}_CLIENT_ID / {}_CLIENT_SECRET not configured",
                prefix, prefix
            ))
        })
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> Result<ConnectorConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Configuration(format!("failed to read config file: {}", e)))?;
    let config: ConnectorConfig =
        toml::from_str(&contents).map_err(|e| Error::Configuration(format!("invalid config: {}", e)))?;
    Ok(config)
}
