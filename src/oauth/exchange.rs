//! HTTP client for provider token endpoints: code exchange, refresh,
//! and best-effort revocation.

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Successful token-endpoint response. Providers vary wildly in which
/// optional fields they return, so everything beyond `access_token`
/// defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, when the provider reports one.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Space-delimited granted scopes, when reported.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Thin wrapper over one shared `reqwest` client. All token-endpoint
/// calls are form-encoded POSTs per RFC 6749.
#[derive(Clone, Default)]
pub struct TokenClient {
    http: reqwest::Client,
}

impl TokenClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exchanges an authorization code (plus its PKCE verifier) for
    /// tokens.
    pub async fn exchange_code(
        &self,
        token_endpoint: &str,
        client_id: &str,
        client_secret: &str,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("code_verifier", code_verifier),
        ];
        self.post_token(token_endpoint, &params).await
    }

    /// Trades a refresh token for a new access token.
    pub async fn refresh_access_token(
        &self,
        token_endpoint: &str,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        self.post_token(token_endpoint, &params).await
    }

    /// RFC 7009 revocation. Errors propagate; the caller decides whether
    /// revocation failures matter.
    pub async fn revoke_token(
        &self,
        revocation_endpoint: &str,
        client_id: &str,
        client_secret: &str,
        access_token: &str,
    ) -> Result<()> {
        let params = [
            ("token", access_token),
            ("token_type_hint", "access_token"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        let response = self
            .http
            .post(revocation_endpoint)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TokenEndpoint(format!(
                "revocation failed with {}: {}",
                status, body
            )));
        }
        Ok(())
    }

    async fn post_token(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<TokenResponse> {
        debug!(endpoint = %endpoint, "posting to token endpoint");
        let response = self.http.post(endpoint).form(params).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TokenEndpoint(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        Ok(response.json::<TokenResponse>().await?)
    }
}
