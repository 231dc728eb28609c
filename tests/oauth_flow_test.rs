// End-to-end OAuth flow tests against an in-memory store and a mocked
// provider token endpoint.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tether::cache::CacheManager;
use tether::config::{ClientCredentials, ConnectorConfig, CryptoConfig};
use tether::oauth::Orchestrator;
use tether::pkce;
use tether::store::{
    HealthStatus, IntegrationStatus, IntegrationStore, MemoryStore, OAuthState, ProviderConfig,
};
use tether::Error;

const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

struct Harness {
    store: Arc<MemoryStore>,
    caches: Arc<CacheManager>,
    orchestrator: Orchestrator,
    server: mockito::ServerGuard,
}

async fn harness() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether=debug".into()),
        )
        .with_test_writer()
        .try_init();

    let server = mockito::Server::new_async().await;

    let mut config = ConnectorConfig {
        crypto: CryptoConfig {
            master_key: TEST_KEY.to_string(),
            pbkdf2_iterations: 1000,
        },
        ..ConnectorConfig::default()
    };
    config.providers.insert(
        "slack".to_string(),
        ClientCredentials {
            client_id: "slack-client".to_string(),
            client_secret: "slack-secret".to_string(),
        },
    );
    let config = Arc::new(config);

    let store = Arc::new(MemoryStore::new());
    store.seed_provider(ProviderConfig {
        id: "slack".to_string(),
        display_name: "Slack".to_string(),
        authorization_endpoint: Some("https://slack.com/oauth/v2/authorize".to_string()),
        token_endpoint: Some(format!("{}/token", server.url())),
        revocation_endpoint: Some(format!("{}/revoke", server.url())),
        default_scopes: vec!["chat:write".to_string()],
        is_active: true,
    });

    let caches = Arc::new(CacheManager::new(&config.cache));
    let orchestrator = Orchestrator::new(
        Arc::clone(&store) as Arc<dyn IntegrationStore>,
        Arc::clone(&caches),
        config,
    )
    .unwrap();

    Harness {
        store,
        caches,
        orchestrator,
        server,
    }
}

fn token_response(access: &str, refresh: Option<&str>) -> String {
    match refresh {
        Some(r) => format!(
            r#"{{"access_token": "{}", "refresh_token": "{}", "expires_in": 3600, "token_type": "Bearer", "scope": "chat:write channels:read"}}"#,
            access, r
        ),
        None => format!(r#"{{"access_token": "{}", "token_type": "Bearer"}}"#, access),
    }
}

#[tokio::test]
async fn test_full_connect_callback_cycle() {
    let mut h = harness().await;

    let connect = h
        .orchestrator
        .connect(
            "org-1",
            "slack",
            "https://app.example.com/cb",
            None,
            "user-1",
        )
        .await
        .unwrap();
    assert!(connect.authorization_url.contains(&connect.state));
    assert!(connect.expires_at > Utc::now());

    let mock = h
        .server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            mockito::Matcher::UrlEncoded("code".into(), "auth-code-1".into()),
        ]))
        .with_status(200)
        .with_body(token_response("xoxb-access", Some("xoxr-refresh")))
        .create_async()
        .await;

    let integration = h
        .orchestrator
        .handle_callback("org-1", &connect.state, "auth-code-1")
        .await
        .unwrap();
    mock.assert_async().await;

    assert_eq!(integration.name, "Slack Integration");
    assert_eq!(integration.status, IntegrationStatus::Active);
    assert_eq!(integration.health_status, HealthStatus::Healthy);
    // Exactly one integration row and one credential row were written
    assert_eq!(h.store.integration_count(), 1);
    assert_eq!(h.store.credential_count(), 1);
    assert_eq!(
        integration.scopes_granted,
        vec!["chat:write".to_string(), "channels:read".to_string()]
    );

    // Credentials are stored encrypted, never as plaintext
    let creds = h
        .store
        .get_credentials(&integration.id)
        .await
        .unwrap()
        .unwrap();
    assert!(creds.access_token_encrypted.starts_with("v1:"));
    assert!(!creds.access_token_encrypted.contains("xoxb-access"));
    assert!(creds
        .refresh_token_encrypted
        .as_deref()
        .unwrap()
        .starts_with("v1:"));
    assert_eq!(creds.token_type, "Bearer");
    assert!(creds.expires_at.is_some());

    // Replaying the same state is rejected
    let replay = h
        .orchestrator
        .handle_callback("org-1", &connect.state, "auth-code-2")
        .await
        .unwrap_err();
    assert!(matches!(replay, Error::Unauthorized(_)));

    // The decrypted token round-trips through the token cache tier
    let token = h.orchestrator.access_token(&integration.id).await.unwrap();
    assert_eq!(token.as_str(), "xoxb-access");
    let cached = h.orchestrator.access_token(&integration.id).await.unwrap();
    assert_eq!(cached.as_str(), "xoxb-access");
}

#[tokio::test]
async fn test_callback_from_wrong_organization_rejected() {
    let h = harness().await;

    let connect = h
        .orchestrator
        .connect("org-1", "slack", "https://cb", None, "user-1")
        .await
        .unwrap();

    // No token-endpoint mock: the exchange must never be reached
    let err = h
        .orchestrator
        .handle_callback("org-2", &connect.state, "auth-code")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}

#[tokio::test]
async fn test_callback_rejects_expired_unused_state() {
    let h = harness().await;

    // A state row that was never consumed but whose session window has
    // passed. No token-endpoint mock: the exchange must never be reached.
    let session = pkce::create_session("slack", "https://app.example.com/cb", 10);
    let now = Utc::now();
    h.store
        .insert_oauth_state(OAuthState {
            id: "state-stale".to_string(),
            state: session.state.clone(),
            code_verifier: session.verifier.clone(),
            code_challenge: session.challenge.clone(),
            provider_id: "slack".to_string(),
            organization_id: "org-1".to_string(),
            redirect_uri: session.redirect_uri.clone(),
            scopes: vec![],
            initiated_by: "user-1".to_string(),
            created_at: now - Duration::minutes(20),
            expires_at: now - Duration::minutes(10),
            used_at: None,
        })
        .await
        .unwrap();

    let err = h
        .orchestrator
        .handle_callback("org-1", &session.state, "auth-code")
        .await
        .unwrap_err();

    // Expired is reported distinctly from unknown/consumed states
    match err {
        Error::Unauthorized(msg) => assert_eq!(msg, "OAuth state expired"),
        other => panic!("expected Unauthorized, got {:?}", other),
    }
    assert_eq!(h.store.integration_count(), 0);
}

#[tokio::test]
async fn test_credential_insert_failure_rolls_back_integration() {
    let mut h = harness().await;

    let connect = h
        .orchestrator
        .connect("org-1", "slack", "https://cb", None, "user-1")
        .await
        .unwrap();

    h.server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(token_response("xoxb-access", None))
        .create_async()
        .await;

    h.store.fail_next_credential_insert();
    let err = h
        .orchestrator
        .handle_callback("org-1", &connect.state, "auth-code")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CredentialStorage(_)));

    // No orphaned rows survive the failed callback
    assert_eq!(h.store.integration_count(), 0);
    assert_eq!(h.store.credential_count(), 0);
}

#[tokio::test]
async fn test_refresh_success_and_failure_bookkeeping() {
    let mut h = harness().await;

    let connect = h
        .orchestrator
        .connect("org-1", "slack", "https://cb", None, "user-1")
        .await
        .unwrap();
    h.server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::UrlEncoded(
            "grant_type".into(),
            "authorization_code".into(),
        ))
        .with_status(200)
        .with_body(token_response("xoxb-old", Some("xoxr-refresh")))
        .create_async()
        .await;
    let integration = h
        .orchestrator
        .handle_callback("org-1", &connect.state, "auth-code")
        .await
        .unwrap();

    // Successful refresh rotates the access token and keeps the old
    // refresh token when the provider returns none
    let refresh_mock = h
        .server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            mockito::Matcher::UrlEncoded("refresh_token".into(), "xoxr-refresh".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"access_token": "xoxb-new", "expires_in": 3600}"#)
        .create_async()
        .await;

    let before = h
        .store
        .get_credentials(&integration.id)
        .await
        .unwrap()
        .unwrap();

    let result = h.orchestrator.refresh_tokens(&integration.id).await.unwrap();
    refresh_mock.assert_async().await;
    assert!(result.success);
    assert!(result.expires_at.is_some());
    assert!(result.error.is_none());

    let after = h
        .store
        .get_credentials(&integration.id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(after.access_token_encrypted, before.access_token_encrypted);
    assert_eq!(after.refresh_token_encrypted, before.refresh_token_encrypted);

    let token = h.orchestrator.access_token(&integration.id).await.unwrap();
    assert_eq!(token.as_str(), "xoxb-new");

    // Failed refresh is data, not an error
    h.server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::UrlEncoded(
            "grant_type".into(),
            "refresh_token".into(),
        ))
        .with_status(400)
        .with_body(r#"{"error": "invalid_grant"}"#)
        .create_async()
        .await;

    let result = h.orchestrator.refresh_tokens(&integration.id).await.unwrap();
    assert!(!result.success);
    let message = result.error.unwrap();
    assert!(message.starts_with("Token refresh failed:"));
    assert!(message.contains("invalid_grant"));

    let row = h
        .store
        .get_integration(&integration.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.consecutive_failures, 1);
    assert_eq!(row.health_status, HealthStatus::Degraded);
    assert_eq!(row.error_message, Some(message));

    // Status reflects the degraded state and recovery resets the counter
    let meta = h
        .orchestrator
        .integration_status(&integration.id)
        .await
        .unwrap();
    assert_eq!(meta.health_status, HealthStatus::Degraded);
    assert_eq!(meta.consecutive_failures, 1);

    h.server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::UrlEncoded(
            "grant_type".into(),
            "refresh_token".into(),
        ))
        .with_status(200)
        .with_body(r#"{"access_token": "xoxb-newer", "expires_in": 3600}"#)
        .create_async()
        .await;
    let result = h.orchestrator.refresh_tokens(&integration.id).await.unwrap();
    assert!(result.success);

    let row = h
        .store
        .get_integration(&integration.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.consecutive_failures, 0);
    assert_eq!(row.health_status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_refresh_without_refresh_token() {
    let mut h = harness().await;

    let connect = h
        .orchestrator
        .connect("org-1", "slack", "https://cb", None, "user-1")
        .await
        .unwrap();
    h.server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(token_response("xoxb-access", None))
        .create_async()
        .await;
    let integration = h
        .orchestrator
        .handle_callback("org-1", &connect.state, "auth-code")
        .await
        .unwrap();

    let result = h.orchestrator.refresh_tokens(&integration.id).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("No refresh token available"));

    // Not a provider failure: health bookkeeping is untouched
    let row = h
        .store
        .get_integration(&integration.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.consecutive_failures, 0);
    assert_eq!(row.health_status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_refresh_unknown_integration_is_an_error() {
    let h = harness().await;
    let err = h.orchestrator.refresh_tokens("missing").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_disconnect_with_remote_revocation() {
    let mut h = harness().await;

    let connect = h
        .orchestrator
        .connect("org-1", "slack", "https://cb", None, "user-1")
        .await
        .unwrap();
    h.server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(token_response("xoxb-access", None))
        .create_async()
        .await;
    let integration = h
        .orchestrator
        .handle_callback("org-1", &connect.state, "auth-code")
        .await
        .unwrap();

    let revoke_mock = h
        .server
        .mock("POST", "/revoke")
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::UrlEncoded("token".into(), "xoxb-access".into()),
            mockito::Matcher::UrlEncoded("token_type_hint".into(), "access_token".into()),
        ]))
        .with_status(200)
        .create_async()
        .await;

    h.orchestrator
        .disconnect_integration(&integration.id, true)
        .await
        .unwrap();
    revoke_mock.assert_async().await;

    let row = h
        .store
        .get_integration(&integration.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, IntegrationStatus::Disconnected);
    assert_eq!(row.health_status, HealthStatus::Disconnected);
    assert!(row.disconnected_at.is_some());

    // The slot is free again
    h.orchestrator
        .connect("org-1", "slack", "https://cb", None, "user-1")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_disconnect_survives_revocation_failure() {
    let mut h = harness().await;

    let connect = h
        .orchestrator
        .connect("org-1", "slack", "https://cb", None, "user-1")
        .await
        .unwrap();
    h.server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(token_response("xoxb-access", None))
        .create_async()
        .await;
    let integration = h
        .orchestrator
        .handle_callback("org-1", &connect.state, "auth-code")
        .await
        .unwrap();

    h.server
        .mock("POST", "/revoke")
        .with_status(500)
        .with_body("provider exploded")
        .create_async()
        .await;

    // Revocation failure is logged, not fatal
    h.orchestrator
        .disconnect_integration(&integration.id, true)
        .await
        .unwrap();

    let row = h
        .store
        .get_integration(&integration.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, IntegrationStatus::Disconnected);
}

#[tokio::test]
async fn test_list_and_status_after_lifecycle() {
    let mut h = harness().await;

    let connect = h
        .orchestrator
        .connect("org-1", "slack", "https://cb", None, "user-1")
        .await
        .unwrap();
    h.server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(token_response("xoxb-access", None))
        .create_async()
        .await;
    let integration = h
        .orchestrator
        .handle_callback("org-1", &connect.state, "auth-code")
        .await
        .unwrap();

    let active = h
        .orchestrator
        .list_integrations("org-1", Some(IntegrationStatus::Active), None)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);

    let meta = h
        .orchestrator
        .integration_status(&integration.id)
        .await
        .unwrap();
    assert_eq!(meta.provider_display_name, "Slack");
    assert_eq!(meta.status, IntegrationStatus::Active);

    h.orchestrator
        .disconnect_integration(&integration.id, false)
        .await
        .unwrap();

    assert!(h
        .orchestrator
        .list_integrations("org-1", Some(IntegrationStatus::Active), None)
        .await
        .unwrap()
        .is_empty());
    let meta = h
        .orchestrator
        .integration_status(&integration.id)
        .await
        .unwrap();
    assert_eq!(meta.status, IntegrationStatus::Disconnected);

    // Provider and integration tiers saw traffic during the lifecycle
    let stats = h.caches.stats();
    assert!(stats.provider.hit_rate > 0.0);
}
