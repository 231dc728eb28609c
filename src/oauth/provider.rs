//! Authorization URL construction.

use crate::error::{Error, Result};
use crate::pkce::{PkceSession, CHALLENGE_METHOD};
use crate::store::ProviderConfig;

/// Provider-specific query parameters appended to every authorization
/// URL. Slack's v2 flow distinguishes bot and user scopes; sending an
/// empty `user_scope` keeps the grant bot-only.
fn extra_authorize_params(provider_id: &str) -> &'static [(&'static str, &'static str)] {
    match provider_id {
        "slack" => &[("user_scope", "")],
        _ => &[],
    }
}

/// Builds the full authorization URL for one PKCE session.
///
/// Fails with [`Error::UnsupportedProvider`] when the provider has no
/// authorization endpoint (API-key-only providers).
pub fn build_authorization_url(
    provider: &ProviderConfig,
    client_id: &str,
    session: &PkceSession,
    scopes: &[String],
) -> Result<String> {
    let endpoint = provider
        .authorization_endpoint
        .as_deref()
        .ok_or_else(|| Error::UnsupportedProvider(provider.id.clone()))?;

    let mut url = format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&state={}&code_challenge={}&code_challenge_method={}",
        endpoint,
        urlencoding::encode(client_id),
        urlencoding::encode(&session.redirect_uri),
        urlencoding::encode(&session.state),
        urlencoding::encode(&session.challenge),
        CHALLENGE_METHOD,
    );

    if !scopes.is_empty() {
        url.push_str("&scope=");
        url.push_str(&urlencoding::encode(&scopes.join(" ")));
    }

    for (key, value) in extra_authorize_params(&provider.id) {
        url.push('&');
        url.push_str(key);
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }

    Ok(url)
}
