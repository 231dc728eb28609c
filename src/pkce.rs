//! PKCE (RFC 7636) challenge generation and verification, plus the
//! anti-replay state tokens that bind an authorization redirect to the
//! session that initiated it.
//!
//! Verifiers, challenges, and state tokens are all derived from 32 bytes
//! of CSPRNG output, base64url-encoded without padding (43 characters).
//! All comparisons are constant-time.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// The only challenge method we emit. Plain-text challenges defeat the
/// point of PKCE and are not supported.
pub const CHALLENGE_METHOD: &str = "S256";

/// Sessions not completed within this window are rejected at callback.
pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 10;

const TOKEN_BYTES: usize = 32;

/// A verifier/challenge pair for one authorization attempt.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
    pub method: &'static str,
}

/// Everything needed to validate one OAuth callback: the PKCE pair, the
/// state token, and the expiry window.
#[derive(Debug, Clone)]
pub struct PkceSession {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
    pub provider: String,
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates a fresh verifier and its S256 challenge.
pub fn generate_challenge() -> PkceChallenge {
    let verifier = random_token();
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    PkceChallenge {
        verifier,
        challenge,
        method: CHALLENGE_METHOD,
    }
}

/// Checks that `verifier` hashes to `challenge`. Constant-time; empty
/// inputs never verify.
pub fn verify_challenge(verifier: &str, challenge: &str) -> bool {
    if verifier.is_empty() || challenge.is_empty() {
        return false;
    }
    let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    expected.as_bytes().ct_eq(challenge.as_bytes()).into()
}

/// Generates an unguessable state token for CSRF protection.
pub fn generate_state() -> String {
    random_token()
}

/// Constant-time state comparison. Empty inputs never validate.
pub fn validate_state(received: &str, stored: &str) -> bool {
    if received.is_empty() || stored.is_empty() {
        return false;
    }
    received.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// Creates a session for one authorization attempt against `provider`.
pub fn create_session(provider: &str, redirect_uri: &str, ttl_minutes: i64) -> PkceSession {
    let pair = generate_challenge();
    let now = Utc::now();
    PkceSession {
        verifier: pair.verifier,
        challenge: pair.challenge,
        state: generate_state(),
        provider: provider.to_string(),
        redirect_uri: redirect_uri.to_string(),
        created_at: now,
        expires_at: now + Duration::minutes(ttl_minutes),
    }
}

/// A session is valid strictly before its expiry instant.
pub fn is_session_valid(session: &PkceSession) -> bool {
    Utc::now() < session.expires_at
}
