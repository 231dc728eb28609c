//! Five-tier cache manager facade.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{CacheMetrics, CacheStats, TierCache, TierMetrics};
use crate::config::CacheConfig;
use crate::crypto::kdf::DerivedKey;
use crate::store::{HealthStatus, IntegrationStatus, ProviderConfig};

pub const PROVIDER_TIER: &str = "provider";
pub const TOKEN_TIER: &str = "token";
pub const DERIVED_KEY_TIER: &str = "derived_key";
pub const OAUTH_STATE_TIER: &str = "oauth_state";
pub const INTEGRATION_TIER: &str = "integration";

const TIERS: [&str; 5] = [
    PROVIDER_TIER,
    TOKEN_TIER,
    DERIVED_KEY_TIER,
    OAUTH_STATE_TIER,
    INTEGRATION_TIER,
];

/// Cached in-flight OAuth session, keyed by state token.
///
/// `expires_at` mirrors the store-side session expiry; the tier treats a
/// past-expiry entry as a miss on read.
#[derive(Clone, Debug)]
pub struct OAuthStateEntry {
    pub state: String,
    pub code_verifier: String,
    pub provider_id: String,
    pub organization_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Cached integration status/health, keyed by integration id
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntegrationMeta {
    pub id: String,
    pub organization_id: String,
    pub provider_id: String,
    pub provider_display_name: String,
    pub status: IntegrationStatus,
    pub health_status: HealthStatus,
    pub consecutive_failures: u32,
    pub error_message: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub connected_by: String,
    pub scopes_granted: Vec<String>,
}

/// Per-tier and aggregate cache statistics
#[derive(Clone, Debug)]
pub struct CacheManagerStats {
    pub provider: CacheStats,
    pub token: CacheStats,
    pub derived_key: CacheStats,
    pub oauth_state: CacheStats,
    pub integration: CacheStats,
    pub metrics: Vec<TierMetrics>,
}

/// Aggregate health across tiers
#[derive(Clone, Debug)]
pub struct CacheHealth {
    /// Healthy iff the mean hit rate across tiers exceeds 50%
    pub healthy: bool,
    pub hit_rate: f64,
    pub total_size: usize,
}

/// Long-lived cache tiers shared by the cipher and the orchestrator.
///
/// Owned by the composition root and injected; holds no connection to any
/// store, so nothing here is a source of truth.
pub struct CacheManager {
    metrics: Arc<CacheMetrics>,
    pub provider: TierCache<String, ProviderConfig>,
    pub token: TierCache<String, Zeroizing<String>>,
    pub derived_key: TierCache<String, DerivedKey>,
    pub oauth_state: TierCache<String, OAuthStateEntry>,
    pub integration: TierCache<String, IntegrationMeta>,
}

impl CacheManager {
    pub fn new(config: &CacheConfig) -> Self {
        let metrics = Arc::new(CacheMetrics::new());
        Self {
            provider: TierCache::new(PROVIDER_TIER, &config.provider, Arc::clone(&metrics)),
            token: TierCache::new(TOKEN_TIER, &config.token, Arc::clone(&metrics)),
            derived_key: TierCache::new(
                DERIVED_KEY_TIER,
                &config.derived_key,
                Arc::clone(&metrics),
            ),
            oauth_state: TierCache::new(
                OAUTH_STATE_TIER,
                &config.oauth_state,
                Arc::clone(&metrics),
            ),
            integration: TierCache::new(INTEGRATION_TIER, &config.integration, Arc::clone(&metrics)),
            metrics,
        }
    }

    pub fn stats(&self) -> CacheManagerStats {
        CacheManagerStats {
            provider: self.provider.stats(),
            token: self.token.stats(),
            derived_key: self.derived_key.stats(),
            oauth_state: self.oauth_state.stats(),
            integration: self.integration.stats(),
            metrics: TIERS.iter().map(|t| self.metrics.tier_metrics(t)).collect(),
        }
    }

    pub fn health(&self) -> CacheHealth {
        let mean_hit_rate =
            TIERS.iter().map(|t| self.metrics.hit_rate(t)).sum::<f64>() / TIERS.len() as f64;

        CacheHealth {
            healthy: mean_hit_rate > 50.0,
            hit_rate: mean_hit_rate,
            total_size: self.provider.len()
                + self.token.len()
                + self.derived_key.len()
                + self.oauth_state.len()
                + self.integration.len(),
        }
    }

    /// Clears the sensitive tiers and resets metrics. Used by tests and as
    /// the final step of key rotation.
    pub fn clear_all(&self) {
        self.token.clear();
        self.derived_key.clear();
        self.metrics.reset();
    }
}
