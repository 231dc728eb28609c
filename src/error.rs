//! Error taxonomy for the connector core.
//!
//! Configuration and format errors are fatal to the current operation and
//! propagate to the caller. Decryption failures are deliberately generic:
//! callers (and attackers) cannot distinguish a wrong key from tampered
//! data. Token-refresh failures are expected in normal operation and are
//! returned as data (`TokenRefreshResult`), never through this enum.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed secrets/configuration. Fatal, not retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Empty plaintext or envelope passed to the cipher.
    #[error("cannot encrypt or decrypt an empty value")]
    EmptyInput,

    /// Envelope did not split into exactly 5 colon-delimited fields.
    #[error("invalid encrypted token format")]
    Format,

    /// Envelope version field is not a known literal.
    #[error("unsupported encryption version: {0}")]
    UnsupportedVersion(String),

    /// Encryption failed. Internal; should not occur with a valid key.
    #[error("token encryption failed")]
    Encryption,

    /// Authentication-tag verification failed. Covers wrong key, tampered
    /// ciphertext, tampered tag, and corrupted fields alike.
    #[error("token decryption failed - invalid key or corrupted data")]
    Decryption,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    /// OAuth state invalid, expired, or already consumed.
    #[error("{0}")]
    Unauthorized(String),

    /// Provider has no authorization endpoint configured.
    #[error("provider '{0}' does not support OAuth authorization")]
    UnsupportedProvider(String),

    /// Provider has no token endpoint configured.
    #[error("provider '{0}' does not have a token endpoint configured")]
    MissingTokenEndpoint(String),

    /// Credential persistence failed after integration creation; the
    /// integration row has been rolled back.
    #[error("failed to store credentials: {0}")]
    CredentialStorage(String),

    /// External store rejected or failed an operation.
    #[error("store error: {0}")]
    Store(String),

    /// Network-level failure talking to a token/revocation endpoint.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Token/revocation endpoint returned a non-2xx response. Carries the
    /// response body as the failure detail.
    #[error("{0}")]
    TokenEndpoint(String),
}
