// Error taxonomy
pub mod error;

// Configuration and secrets
pub mod config;

// Multi-tier LRU/TTL caches with metrics
pub mod cache;

// Envelope encryption and key derivation
pub mod crypto;

// PKCE challenges and anti-replay state tokens
pub mod pkce;

// Storage boundary
pub mod store;

// OAuth flow orchestration
pub mod oauth;

pub use error::{Error, Result};
