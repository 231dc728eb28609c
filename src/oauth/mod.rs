//! OAuth 2.0 authorization-code flow with PKCE.
//!
//! `provider` builds authorization URLs, `exchange` talks to provider
//! token endpoints, and `orchestrator` ties both to storage, encryption,
//! and the cache tiers.

pub mod exchange;
pub mod orchestrator;
pub mod provider;

pub use exchange::{TokenClient, TokenResponse};
pub use orchestrator::{ConnectResult, Orchestrator, TokenRefreshResult};
