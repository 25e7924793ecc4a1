//! OAuth 2.1 types for the embedded authorization server.
//!
//! The engine is a credential exchange shim: every code and token carries the
//! underlying long-lived API key it was minted from, so nothing here is a new
//! secret in its own right.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// A dynamically registered OAuth client.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    /// Absent when `token_endpoint_auth_method` is `none`.
    pub client_secret: Option<String>,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A single-use authorization code bound to a validated API key.
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: String,
    /// The long-lived credential this code represents.
    pub api_key: String,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl AuthorizationCode {
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// An access token mapped back to its originating API key.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub client_id: String,
    pub scope: String,
    pub api_key: String,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl AccessToken {
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// A refresh token pointing at the access token it can renew.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub access_token: String,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl RefreshToken {
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}
