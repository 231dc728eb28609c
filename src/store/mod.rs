//! Persistence boundary for integrations, credentials, and OAuth state.
//!
//! The connector core is storage-agnostic: everything it needs from the
//! backing database is expressed through [`IntegrationStore`]. The
//! in-memory implementation in [`memory`] backs the test suite.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use memory::MemoryStore;

/// Lifecycle of an integration row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    Active,
    Pending,
    Disconnected,
}

/// Operational health, maintained by the refresh path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Disconnected,
}

/// Static description of an OAuth provider (Slack, GitHub, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub display_name: String,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub revocation_endpoint: Option<String>,
    pub default_scopes: Vec<String>,
    pub is_active: bool,
}

/// One organization's connection to one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    pub id: String,
    pub organization_id: String,
    pub provider_id: String,
    pub name: String,
    pub status: IntegrationStatus,
    pub health_status: HealthStatus,
    pub consecutive_failures: u32,
    pub error_message: Option<String>,
    pub connected_by: String,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub scopes_granted: Vec<String>,
    pub metadata: serde_json::Value,
}

/// Encrypted token material for one integration. Token fields hold
/// envelopes, never plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationCredentials {
    pub integration_id: String,
    pub access_token_encrypted: String,
    pub refresh_token_encrypted: Option<String>,
    pub token_type: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub encryption_key_id: String,
}

/// Persisted record of one in-flight authorization attempt. `used_at`
/// makes states single-use: a consumed state never matches again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthState {
    pub id: String,
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
    pub provider_id: String,
    pub organization_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub initiated_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

/// Storage operations the connector core depends on.
///
/// Implementations must enforce at most one non-disconnected integration
/// per (organization, provider) pair, returning [`crate::Error::Conflict`]
/// from `insert_integration` when a second would be created.
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    async fn get_provider(&self, provider_id: &str) -> Result<Option<ProviderConfig>>;

    /// The live (non-disconnected) integration for this org/provider
    /// pair, if one exists.
    async fn find_live_integration(
        &self,
        organization_id: &str,
        provider_id: &str,
    ) -> Result<Option<Integration>>;

    async fn insert_oauth_state(&self, state: OAuthState) -> Result<()>;

    /// Looks up an unused state row matching both the token and the
    /// organization. Used rows are invisible here.
    async fn find_unused_oauth_state(
        &self,
        state: &str,
        organization_id: &str,
    ) -> Result<Option<OAuthState>>;

    async fn mark_oauth_state_used(&self, state_id: &str) -> Result<()>;

    async fn insert_integration(&self, integration: Integration) -> Result<Integration>;

    async fn delete_integration(&self, integration_id: &str) -> Result<()>;

    async fn insert_credentials(&self, credentials: IntegrationCredentials) -> Result<()>;

    async fn update_credentials(
        &self,
        integration_id: &str,
        access_token_encrypted: String,
        refresh_token_encrypted: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn get_integration(&self, integration_id: &str) -> Result<Option<Integration>>;

    async fn get_credentials(&self, integration_id: &str)
        -> Result<Option<IntegrationCredentials>>;

    /// Resets the failure counter and marks the integration healthy.
    async fn record_refresh_success(&self, integration_id: &str) -> Result<()>;

    /// Increments the failure counter, marks the integration degraded,
    /// and stores the error message.
    async fn record_refresh_failure(&self, integration_id: &str, error: &str) -> Result<()>;

    /// Marks the integration disconnected (status and health) and stamps
    /// `disconnected_at`.
    async fn mark_disconnected(&self, integration_id: &str) -> Result<()>;

    async fn list_integrations(
        &self,
        organization_id: &str,
        status: Option<IntegrationStatus>,
        provider_id: Option<&str>,
    ) -> Result<Vec<Integration>>;
}
