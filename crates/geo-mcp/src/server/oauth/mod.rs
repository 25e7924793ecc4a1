//! Embedded OAuth 2.1 authorization server.
//!
//! Bridges long-lived API keys into short-lived access/refresh tokens via the
//! authorization-code flow with PKCE. The engine is a credential exchange
//! shim: every token resolves back to the API key it was minted from, so
//! revoking the key invalidates all derived tokens at once.

pub mod handlers;
pub mod login;
pub mod pkce;
pub mod store;
pub mod types;

pub use store::{AccessTokenInfo, OAuthStore, RefreshError, TokenPair};
pub use types::OAuthClient;
