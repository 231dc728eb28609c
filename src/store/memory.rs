//! In-memory [`IntegrationStore`] used by the test suite and local
//! development. Not durable; everything lives behind one mutex.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

use super::{
    Integration, IntegrationCredentials, IntegrationStore, IntegrationStatus, OAuthState,
    ProviderConfig,
};

#[derive(Default)]
struct Inner {
    providers: HashMap<String, ProviderConfig>,
    integrations: HashMap<String, Integration>,
    credentials: HashMap<String, IntegrationCredentials>,
    oauth_states: HashMap<String, OAuthState>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    // Test hook: makes the next insert_credentials call fail once.
    fail_next_credential_insert: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_provider(&self, provider: ProviderConfig) {
        let mut inner = self.inner.lock().unwrap();
        inner.providers.insert(provider.id.clone(), provider);
    }

    pub fn integration_count(&self) -> usize {
        self.inner.lock().unwrap().integrations.len()
    }

    pub fn credential_count(&self) -> usize {
        self.inner.lock().unwrap().credentials.len()
    }

    pub fn oauth_state(&self, state_id: &str) -> Option<OAuthState> {
        self.inner.lock().unwrap().oauth_states.get(state_id).cloned()
    }

    pub fn fail_next_credential_insert(&self) {
        self.fail_next_credential_insert.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl IntegrationStore for MemoryStore {
    async fn get_provider(&self, provider_id: &str) -> Result<Option<ProviderConfig>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.providers.get(provider_id).cloned())
    }

    async fn find_live_integration(
        &self,
        organization_id: &str,
        provider_id: &str,
    ) -> Result<Option<Integration>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .integrations
            .values()
            .find(|i| {
                i.organization_id == organization_id
                    && i.provider_id == provider_id
                    && i.status != IntegrationStatus::Disconnected
            })
            .cloned())
    }

    async fn insert_oauth_state(&self, state: OAuthState) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.oauth_states.insert(state.id.clone(), state);
        Ok(())
    }

    async fn find_unused_oauth_state(
        &self,
        state: &str,
        organization_id: &str,
    ) -> Result<Option<OAuthState>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .oauth_states
            .values()
            .find(|s| {
                s.state == state
                    && s.organization_id == organization_id
                    && s.used_at.is_none()
            })
            .cloned())
    }

    async fn mark_oauth_state_used(&self, state_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .oauth_states
            .get_mut(state_id)
            .ok_or(Error::NotFound("oauth state"))?;
        state.used_at = Some(Utc::now());
        Ok(())
    }

    async fn insert_integration(&self, integration: Integration) -> Result<Integration> {
        let mut inner = self.inner.lock().unwrap();
        let duplicate = inner.integrations.values().any(|i| {
            i.organization_id == integration.organization_id
                && i.provider_id == integration.provider_id
                && i.status != IntegrationStatus::Disconnected
        });
        if duplicate {
            return Err(Error::Conflict(
                "Integration already exists for this provider".to_string(),
            ));
        }
        inner
            .integrations
            .insert(integration.id.clone(), integration.clone());
        Ok(integration)
    }

    async fn delete_integration(&self, integration_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.integrations.remove(integration_id);
        inner.credentials.remove(integration_id);
        Ok(())
    }

    async fn insert_credentials(&self, credentials: IntegrationCredentials) -> Result<()> {
        if self.fail_next_credential_insert.swap(false, Ordering::SeqCst) {
            return Err(Error::Store("simulated credential insert failure".to_string()));
        }
        let mut inner = self.inner.lock().unwrap();
        inner
            .credentials
            .insert(credentials.integration_id.clone(), credentials);
        Ok(())
    }

    async fn update_credentials(
        &self,
        integration_id: &str,
        access_token_encrypted: String,
        refresh_token_encrypted: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let creds = inner
            .credentials
            .get_mut(integration_id)
            .ok_or(Error::NotFound("integration credentials"))?;
        creds.access_token_encrypted = access_token_encrypted;
        creds.refresh_token_encrypted = refresh_token_encrypted;
        creds.expires_at = expires_at;
        Ok(())
    }

    async fn get_integration(&self, integration_id: &str) -> Result<Option<Integration>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.integrations.get(integration_id).cloned())
    }

    async fn get_credentials(
        &self,
        integration_id: &str,
    ) -> Result<Option<IntegrationCredentials>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.credentials.get(integration_id).cloned())
    }

    async fn record_refresh_success(&self, integration_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let integration = inner
            .integrations
            .get_mut(integration_id)
            .ok_or(Error::NotFound("integration"))?;
        integration.consecutive_failures = 0;
        integration.health_status = super::HealthStatus::Healthy;
        integration.error_message = None;
        Ok(())
    }

    async fn record_refresh_failure(&self, integration_id: &str, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let integration = inner
            .integrations
            .get_mut(integration_id)
            .ok_or(Error::NotFound("integration"))?;
        integration.consecutive_failures += 1;
        integration.health_status = super::HealthStatus::Degraded;
        integration.error_message = Some(error.to_string());
        Ok(())
    }

    async fn mark_disconnected(&self, integration_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let integration = inner
            .integrations
            .get_mut(integration_id)
            .ok_or(Error::NotFound("integration"))?;
        integration.status = IntegrationStatus::Disconnected;
        integration.health_status = super::HealthStatus::Disconnected;
        integration.disconnected_at = Some(Utc::now());
        Ok(())
    }

    async fn list_integrations(
        &self,
        organization_id: &str,
        status: Option<IntegrationStatus>,
        provider_id: Option<&str>,
    ) -> Result<Vec<Integration>> {
        let inner = self.inner.lock().unwrap();
        let mut matches: Vec<Integration> = inner
            .integrations
            .values()
            .filter(|i| i.organization_id == organization_id)
            .filter(|i| status.map_or(true, |s| i.status == s))
            .filter(|i| provider_id.map_or(true, |p| i.provider_id == p))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.connected_at.cmp(&a.connected_at));
        Ok(matches)
    }
}
