//! End-to-end OAuth connection lifecycle: connect, callback, refresh,
//! disconnect.
//!
//! The orchestrator owns no state of its own. It composes the store,
//! the cache tiers, the token cipher, and the token-endpoint client,
//! and enforces the flow invariants: single-use states, encrypted-only
//! token persistence, and no orphaned integration rows.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cache::{CacheManager, IntegrationMeta, OAuthStateEntry};
use crate::config::ConnectorConfig;
use crate::crypto::TokenCipher;
use crate::error::{Error, Result};
use crate::pkce::{self, PkceSession};
use crate::store::{
    HealthStatus, Integration, IntegrationCredentials, IntegrationStatus, IntegrationStore,
    OAuthState, ProviderConfig,
};

use super::exchange::TokenClient;
use super::provider::build_authorization_url;

/// What the caller needs to send the user off to the provider.
#[derive(Debug, Clone)]
pub struct ConnectResult {
    pub authorization_url: String,
    pub state: String,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a refresh attempt. Refresh failures are data, not errors:
/// the integration row records them and callers get a structured result.
#[derive(Debug, Clone)]
pub struct TokenRefreshResult {
    pub success: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

pub struct Orchestrator {
    store: Arc<dyn IntegrationStore>,
    caches: Arc<CacheManager>,
    cipher: TokenCipher,
    tokens: TokenClient,
    config: Arc<ConnectorConfig>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn IntegrationStore>,
        caches: Arc<CacheManager>,
        config: Arc<ConnectorConfig>,
    ) -> Result<Self> {
        let cipher = TokenCipher::new(&config.crypto, Arc::clone(&caches))?;
        Ok(Self {
            store,
            caches,
            cipher,
            tokens: TokenClient::new(),
            config,
        })
    }

    /// Starts an authorization attempt: creates a PKCE session, persists
    /// the state row, and returns the provider authorization URL.
    pub async fn connect(
        &self,
        organization_id: &str,
        provider_id: &str,
        redirect_uri: &str,
        requested_scopes: Option<Vec<String>>,
        initiated_by: &str,
    ) -> Result<ConnectResult> {
        let provider = self.provider_cached(provider_id).await?;
        if provider.authorization_endpoint.is_none() {
            return Err(Error::UnsupportedProvider(provider_id.to_string()));
        }

        if self
            .store
            .find_live_integration(organization_id, provider_id)
            .await?
            .is_some()
        {
            return Err(Error::Conflict(
                "Integration already exists for this provider".to_string(),
            ));
        }

        let credentials = self.config.client_credentials(provider_id)?;
        let session = pkce::create_session(
            provider_id,
            redirect_uri,
            self.config.oauth.state_ttl_minutes,
        );
        let scopes = requested_scopes.unwrap_or_else(|| provider.default_scopes.clone());

        let row = OAuthState {
            id: Uuid::new_v4().to_string(),
            state: session.state.clone(),
            code_verifier: session.verifier.clone(),
            code_challenge: session.challenge.clone(),
            provider_id: provider_id.to_string(),
            organization_id: organization_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            scopes: scopes.clone(),
            initiated_by: initiated_by.to_string(),
            created_at: session.created_at,
            expires_at: session.expires_at,
            used_at: None,
        };
        self.store.insert_oauth_state(row).await?;

        self.caches.oauth_state.set_with_expiry(
            session.state.clone(),
            OAuthStateEntry {
                state: session.state.clone(),
                code_verifier: session.verifier.clone(),
                provider_id: provider_id.to_string(),
                organization_id: organization_id.to_string(),
                expires_at: session.expires_at,
            },
            Some(session.expires_at),
        );

        let authorization_url =
            build_authorization_url(&provider, &credentials.client_id, &session, &scopes)?;

        info!(
            provider = %provider_id,
            organization = %organization_id,
            "oauth flow initiated"
        );

        Ok(ConnectResult {
            authorization_url,
            state: session.state,
            expires_at: session.expires_at,
        })
    }

    /// Completes the flow after the provider redirect: validates and
    /// consumes the state, exchanges the code, and persists the
    /// integration with encrypted credentials.
    pub async fn handle_callback(
        &self,
        organization_id: &str,
        state: &str,
        code: &str,
    ) -> Result<Integration> {
        let row = self
            .store
            .find_unused_oauth_state(state, organization_id)
            .await?
            .ok_or_else(|| Error::Unauthorized("Invalid or expired OAuth state".to_string()))?;

        let session = PkceSession {
            verifier: row.code_verifier.clone(),
            challenge: row.code_challenge.clone(),
            state: row.state.clone(),
            provider: row.provider_id.clone(),
            redirect_uri: row.redirect_uri.clone(),
            created_at: row.created_at,
            expires_at: row.expires_at,
        };
        if !pkce::is_session_valid(&session) {
            return Err(Error::Unauthorized("OAuth state expired".to_string()));
        }

        let provider = self.provider_cached(&row.provider_id).await?;
        let token_endpoint = provider
            .token_endpoint
            .as_deref()
            .ok_or_else(|| Error::MissingTokenEndpoint(row.provider_id.clone()))?;
        let credentials = self.config.client_credentials(&row.provider_id)?;

        let response = self
            .tokens
            .exchange_code(
                token_endpoint,
                &credentials.client_id,
                &credentials.client_secret,
                code,
                &row.redirect_uri,
                &row.code_verifier,
            )
            .await?;

        let scopes_granted = response
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_else(|| row.scopes.clone());
        let expires_at = response.expires_in.map(|s| Utc::now() + Duration::seconds(s));

        let access_token_encrypted = self.cipher.encrypt(&response.access_token)?;
        let refresh_token_encrypted = response
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.encrypt(t))
            .transpose()?;

        let integration = self
            .store
            .insert_integration(Integration {
                id: Uuid::new_v4().to_string(),
                organization_id: organization_id.to_string(),
                provider_id: row.provider_id.clone(),
                name: format!("{} Integration", provider.display_name),
                status: IntegrationStatus::Active,
                health_status: HealthStatus::Healthy,
                consecutive_failures: 0,
                error_message: None,
                connected_by: row.initiated_by.clone(),
                connected_at: Utc::now(),
                disconnected_at: None,
                scopes_granted: scopes_granted.clone(),
                metadata: serde_json::json!({}),
            })
            .await?;

        let insert = self
            .store
            .insert_credentials(IntegrationCredentials {
                integration_id: integration.id.clone(),
                access_token_encrypted,
                refresh_token_encrypted,
                token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
                scopes: scopes_granted,
                expires_at,
                encryption_key_id: "v1".to_string(),
            })
            .await;

        if let Err(e) = insert {
            // Never leave an integration row without credentials
            if let Err(cleanup) = self.store.delete_integration(&integration.id).await {
                warn!(
                    integration = %integration.id,
                    error = %cleanup,
                    "failed to delete integration after credential insert failure"
                );
            }
            warn!(integration = %integration.id, error = %e, "credential insert failed");
            return Err(Error::CredentialStorage(
                "Failed to store credentials".to_string(),
            ));
        }

        self.store.mark_oauth_state_used(&row.id).await?;
        self.caches.oauth_state.invalidate(&row.state);
        self.caches
            .integration
            .set(integration.id.clone(), meta_from(&integration, &provider));

        info!(
            provider = %row.provider_id,
            organization = %organization_id,
            integration = %integration.id,
            "oauth flow completed"
        );

        Ok(integration)
    }

    /// Refreshes the access token for an integration. Only a missing
    /// integration is an `Err`; a failed provider round trip is recorded
    /// on the row and reported in the result.
    pub async fn refresh_tokens(&self, integration_id: &str) -> Result<TokenRefreshResult> {
        let integration = self
            .store
            .get_integration(integration_id)
            .await?
            .ok_or(Error::NotFound("integration"))?;

        // Absent credentials and an absent refresh token report the same
        // way: nothing to refresh with, but not a provider failure
        let refresh_encrypted = self
            .store
            .get_credentials(integration_id)
            .await?
            .and_then(|c| c.refresh_token_encrypted);
        let Some(refresh_encrypted) = refresh_encrypted else {
            return Ok(TokenRefreshResult {
                success: false,
                expires_at: None,
                error: Some("No refresh token available".to_string()),
            });
        };

        match self.try_refresh(&integration, &refresh_encrypted).await {
            Ok(expires_at) => {
                self.store.record_refresh_success(integration_id).await?;
                self.caches.token.invalidate(&integration.id);
                self.caches.integration.invalidate(&integration.id);

                info!(integration = %integration_id, "tokens refreshed");
                Ok(TokenRefreshResult {
                    success: true,
                    expires_at,
                    error: None,
                })
            }
            Err(e) => {
                let message = format!("Token refresh failed: {}", e);
                if let Err(record) = self
                    .store
                    .record_refresh_failure(integration_id, &message)
                    .await
                {
                    warn!(integration = %integration_id, error = %record, "failed to record refresh failure");
                }
                self.caches.integration.invalidate(&integration.id);

                warn!(integration = %integration_id, error = %e, "token refresh failed");
                Ok(TokenRefreshResult {
                    success: false,
                    expires_at: None,
                    error: Some(message),
                })
            }
        }
    }

    async fn try_refresh(
        &self,
        integration: &Integration,
        refresh_encrypted: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let refresh_token = Zeroizing::new(self.cipher.decrypt(refresh_encrypted)?);

        let provider = self.provider_cached(&integration.provider_id).await?;
        let token_endpoint = provider
            .token_endpoint
            .as_deref()
            .ok_or_else(|| Error::MissingTokenEndpoint(integration.provider_id.clone()))?;
        let client = self.config.client_credentials(&integration.provider_id)?;

        let response = self
            .tokens
            .refresh_access_token(
                token_endpoint,
                &client.client_id,
                &client.client_secret,
                &refresh_token,
            )
            .await?;

        let access_encrypted = self.cipher.encrypt(&response.access_token)?;
        // Providers that rotate refresh tokens return a new one; those
        // that don't keep the old grant valid
        let refresh_encrypted = match response.refresh_token.as_deref() {
            Some(t) => Some(self.cipher.encrypt(t)?),
            None => Some(refresh_encrypted.to_string()),
        };
        let expires_at = response.expires_in.map(|s| Utc::now() + Duration::seconds(s));

        self.store
            .update_credentials(&integration.id, access_encrypted, refresh_encrypted, expires_at)
            .await?;

        Ok(expires_at)
    }

    /// Disconnects an integration, optionally revoking the remote grant
    /// first. Revocation is best-effort: the local disconnect proceeds
    /// even when the provider call fails.
    pub async fn disconnect_integration(
        &self,
        integration_id: &str,
        revoke_remote: bool,
    ) -> Result<()> {
        let integration = self
            .store
            .get_integration(integration_id)
            .await?
            .ok_or(Error::NotFound("integration"))?;

        if revoke_remote {
            if let Err(e) = self.revoke_remote_tokens(&integration).await {
                warn!(
                    integration = %integration_id,
                    provider = %integration.provider_id,
                    error = %e,
                    "remote token revocation failed, disconnecting anyway"
                );
            }
        }

        self.store.mark_disconnected(integration_id).await?;
        self.caches.token.invalidate(&integration.id);
        self.caches.integration.invalidate(&integration.id);

        info!(
            integration = %integration_id,
            provider = %integration.provider_id,
            "integration disconnected"
        );
        Ok(())
    }

    async fn revoke_remote_tokens(&self, integration: &Integration) -> Result<()> {
        let provider = self.provider_cached(&integration.provider_id).await?;
        let Some(endpoint) = provider.revocation_endpoint.as_deref() else {
            return Ok(());
        };

        let credentials = self
            .store
            .get_credentials(&integration.id)
            .await?
            .ok_or(Error::NotFound("integration credentials"))?;
        let access_token = Zeroizing::new(self.cipher.decrypt(&credentials.access_token_encrypted)?);
        let client = self.config.client_credentials(&integration.provider_id)?;

        self.tokens
            .revoke_token(
                endpoint,
                &client.client_id,
                &client.client_secret,
                &access_token,
            )
            .await
    }

    /// Current status and health for one integration, served from the
    /// integration tier when fresh.
    pub async fn integration_status(&self, integration_id: &str) -> Result<IntegrationMeta> {
        let key = integration_id.to_string();
        if let Some(meta) = self.caches.integration.get(&key) {
            return Ok(meta);
        }

        let integration = self
            .store
            .get_integration(integration_id)
            .await?
            .ok_or(Error::NotFound("integration"))?;
        let provider = self.provider_cached(&integration.provider_id).await?;

        let meta = meta_from(&integration, &provider);
        self.caches.integration.set(key, meta.clone());
        Ok(meta)
    }

    pub async fn list_integrations(
        &self,
        organization_id: &str,
        status: Option<IntegrationStatus>,
        provider_id: Option<&str>,
    ) -> Result<Vec<Integration>> {
        self.store
            .list_integrations(organization_id, status, provider_id)
            .await
    }

    /// Decrypted access token for API calls, served from the token tier.
    /// Cache entries expire with the token itself.
    pub async fn access_token(&self, integration_id: &str) -> Result<Zeroizing<String>> {
        let key = integration_id.to_string();
        if let Some(token) = self.caches.token.get(&key) {
            return Ok(token);
        }

        let credentials = self
            .store
            .get_credentials(integration_id)
            .await?
            .ok_or(Error::NotFound("integration credentials"))?;
        let token = Zeroizing::new(self.cipher.decrypt(&credentials.access_token_encrypted)?);
        self.caches
            .token
            .set_with_expiry(key, token.clone(), credentials.expires_at);
        Ok(token)
    }

    /// Drops a provider from the provider tier so the next read hits the
    /// store. Call after editing provider rows.
    pub fn invalidate_provider(&self, provider_id: &str) {
        self.caches.provider.invalidate(&provider_id.to_string());
    }

    async fn provider_cached(&self, provider_id: &str) -> Result<ProviderConfig> {
        let key = provider_id.to_string();
        if let Some(provider) = self.caches.provider.get(&key) {
            return Ok(provider);
        }

        let provider = self
            .store
            .get_provider(provider_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or(Error::NotFound("integration provider"))?;
        self.caches.provider.set(key, provider.clone());
        Ok(provider)
    }
}

fn meta_from(integration: &Integration, provider: &ProviderConfig) -> IntegrationMeta {
    IntegrationMeta {
        id: integration.id.clone(),
        organization_id: integration.organization_id.clone(),
        provider_id: integration.provider_id.clone(),
        provider_display_name: provider.display_name.clone(),
        status: integration.status,
        health_status: integration.health_status,
        consecutive_failures: integration.consecutive_failures,
        error_message: integration.error_message.clone(),
        connected_at: integration.connected_at,
        connected_by: integration.connected_by.clone(),
        scopes_granted: integration.scopes_granted.clone(),
    }
}
