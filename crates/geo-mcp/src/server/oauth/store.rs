//! In-memory OAuth state store.
//!
//! Clients, codes, and tokens are process-local and non-durable; a
//! multi-instance deployment needs these promoted to a shared store. Expired
//! entries are treated as absent on lookup and additionally reaped by a
//! periodic cleanup task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;

use super::types::{AccessToken, AuthorizationCode, OAuthClient, RefreshToken};
use crate::config::Config;
use crate::error::AuthError;

/// In-memory OAuth state store.
#[derive(Clone)]
pub struct OAuthStore {
    clients: Arc<RwLock<HashMap<String, OAuthClient>>>,
    auth_codes: Arc<RwLock<HashMap<String, AuthorizationCode>>>,
    access_tokens: Arc<RwLock<HashMap<String, AccessToken>>>,
    refresh_tokens: Arc<RwLock<HashMap<String, RefreshToken>>>,
    auth_code_ttl: Duration,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    cleanup_interval: Duration,
}

/// A token pair returned from token creation/refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub scope: String,
}

/// Subset of access token state returned from lookups.
#[derive(Debug, Clone)]
pub struct AccessTokenInfo {
    pub client_id: String,
    pub scope: String,
    pub api_key: String,
}

/// Failure modes of refresh token rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshError {
    /// Unknown, expired, or already-rotated refresh token.
    InvalidToken,
    /// The refresh token exists but its access token entry is gone. Should
    /// not occur under correct sequencing.
    MissingAccessToken,
}

impl OAuthStore {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            auth_codes: Arc::new(RwLock::new(HashMap::new())),
            access_tokens: Arc::new(RwLock::new(HashMap::new())),
            refresh_tokens: Arc::new(RwLock::new(HashMap::new())),
            auth_code_ttl: config.auth_code_ttl,
            access_token_ttl: config.access_token_ttl,
            refresh_token_ttl: config.refresh_token_ttl,
            cleanup_interval: config.oauth_cleanup_interval,
        }
    }

    /// Generate a random token using two UUIDs (256 bits).
    fn generate_token() -> String {
        format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
    }

    /// Register a new OAuth client (Dynamic Client Registration).
    ///
    /// Every call creates a new record; there is no uniqueness constraint on
    /// names and no idempotency.
    pub async fn register_client(
        &self,
        client_name: Option<String>,
        redirect_uris: Vec<String>,
        grant_types: Vec<String>,
        token_endpoint_auth_method: Option<&str>,
    ) -> OAuthClient {
        let client_id = Self::generate_token();
        let client_secret = if token_endpoint_auth_method == Some("none") {
            None
        } else {
            Some(Self::generate_token())
        };

        let client = OAuthClient {
            client_id: client_id.clone(),
            client_secret,
            client_name: client_name.unwrap_or_else(|| "Unknown Client".to_string()),
            redirect_uris,
            grant_types: if grant_types.is_empty() {
                vec!["authorization_code".to_string()]
            } else {
                grant_types
            },
            created_at: Utc::now(),
        };

        self.clients.write().await.insert(client_id, client.clone());
        client
    }

    /// Look up a client by ID.
    pub async fn get_client(&self, client_id: &str) -> Option<OAuthClient> {
        self.clients.read().await.get(client_id).cloned()
    }

    /// Number of registered clients (for monitoring).
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Create an authorization code bound to a validated API key.
    pub async fn create_auth_code(
        &self,
        client_id: String,
        redirect_uri: String,
        code_challenge: Option<String>,
        code_challenge_method: Option<String>,
        scope: String,
        api_key: String,
    ) -> String {
        let code = Self::generate_token();

        self.auth_codes.write().await.insert(
            code.clone(),
            AuthorizationCode {
                client_id,
                redirect_uri,
                code_challenge,
                code_challenge_method,
                scope,
                api_key,
                created_at: Instant::now(),
                ttl: self.auth_code_ttl,
            },
        );

        code
    }

    /// Consume an authorization code (one-time use).
    ///
    /// The code is removed whether or not it is still valid, so a second
    /// exchange attempt always fails.
    pub async fn consume_auth_code(&self, code: &str) -> Option<AuthorizationCode> {
        let mut codes = self.auth_codes.write().await;
        let auth_code = codes.remove(code)?;

        if auth_code.is_expired() {
            return None;
        }

        Some(auth_code)
    }

    /// Create an access + refresh token pair carrying the given API key.
    pub async fn create_token_pair(
        &self,
        client_id: &str,
        scope: &str,
        api_key: &str,
    ) -> TokenPair {
        let access = Self::generate_token();
        let refresh = Self::generate_token();

        self.access_tokens.write().await.insert(
            access.clone(),
            AccessToken {
                client_id: client_id.to_owned(),
                scope: scope.to_owned(),
                api_key: api_key.to_owned(),
                created_at: Instant::now(),
                ttl: self.access_token_ttl,
            },
        );

        self.refresh_tokens.write().await.insert(
            refresh.clone(),
            RefreshToken {
                access_token: access.clone(),
                created_at: Instant::now(),
                ttl: self.refresh_token_ttl,
            },
        );

        TokenPair {
            access_token: access,
            refresh_token: refresh,
            expires_in: self.access_token_ttl.as_secs(),
            scope: scope.to_owned(),
        }
    }

    /// Look up an access token.
    ///
    /// Returns `None` for unknown tokens (the bearer may be something else
    /// entirely), `Some(Err)` for expired ones, which are deleted on
    /// detection.
    pub async fn lookup_access_token(
        &self,
        token: &str,
    ) -> Option<Result<AccessTokenInfo, AuthError>> {
        let mut tokens = self.access_tokens.write().await;
        let access = tokens.get(token)?;

        if access.is_expired() {
            tokens.remove(token);
            return Some(Err(AuthError::TokenExpired));
        }

        Some(Ok(AccessTokenInfo {
            client_id: access.client_id.clone(),
            scope: access.scope.clone(),
            api_key: access.api_key.clone(),
        }))
    }

    /// Rotate a refresh token: atomically invalidate the old access+refresh
    /// pair and mint a new one inheriting client id, scope, and API key.
    ///
    /// # Errors
    ///
    /// [`RefreshError::InvalidToken`] for unknown/expired/replayed tokens,
    /// [`RefreshError::MissingAccessToken`] if the old access token entry is
    /// gone (defensive invariant).
    pub async fn refresh_token_pair(&self, refresh_token: &str) -> Result<TokenPair, RefreshError> {
        // Both maps stay locked for the whole rotation so a replay racing
        // this call cannot observe a half-rotated state.
        let mut refresh_tokens = self.refresh_tokens.write().await;
        let mut access_tokens = self.access_tokens.write().await;

        let old_refresh = refresh_tokens.remove(refresh_token).ok_or(RefreshError::InvalidToken)?;
        if old_refresh.is_expired() {
            access_tokens.remove(&old_refresh.access_token);
            return Err(RefreshError::InvalidToken);
        }

        let old_access = access_tokens
            .remove(&old_refresh.access_token)
            .ok_or(RefreshError::MissingAccessToken)?;

        let new_access = Self::generate_token();
        let new_refresh = Self::generate_token();

        access_tokens.insert(
            new_access.clone(),
            AccessToken {
                client_id: old_access.client_id,
                scope: old_access.scope.clone(),
                api_key: old_access.api_key,
                created_at: Instant::now(),
                ttl: self.access_token_ttl,
            },
        );

        refresh_tokens.insert(
            new_refresh.clone(),
            RefreshToken {
                access_token: new_access.clone(),
                created_at: Instant::now(),
                ttl: self.refresh_token_ttl,
            },
        );

        Ok(TokenPair {
            access_token: new_access,
            refresh_token: new_refresh,
            expires_in: self.access_token_ttl.as_secs(),
            scope: old_access.scope,
        })
    }

    /// Start the background cleanup task for expired codes and tokens.
    pub fn start_cleanup_task(&self) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(store.cleanup_interval);
            loop {
                interval.tick().await;
                store.cleanup_expired().await;
            }
        });
    }

    async fn cleanup_expired(&self) {
        {
            let mut codes = self.auth_codes.write().await;
            codes.retain(|_, code| !code.is_expired());
        }

        {
            let mut tokens = self.access_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, token| !token.is_expired());
            let removed = before - tokens.len();
            if removed > 0 {
                tracing::debug!(count = removed, "Cleaned up expired access tokens");
            }
        }

        {
            let mut tokens = self.refresh_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, token| !token.is_expired());
            let removed = before - tokens.len();
            if removed > 0 {
                tracing::debug!(count = removed, "Cleaned up expired refresh tokens");
            }
        }
    }
}

impl std::fmt::Debug for OAuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthStore").finish()
    }
}
