//! Configuration for the GEO MCP server.
//!
//! The `Config` struct is constructed once at process start and handed to each
//! component constructor. Components never read environment variables or other
//! ambient state themselves.

use std::time::Duration;

/// Protocol and lifetime constants.
pub mod lifetimes {
    use std::time::Duration;

    /// Authorization code lifetime: 10 minutes.
    pub const AUTH_CODE_TTL: Duration = Duration::from_secs(600);

    /// Access token lifetime: 1 hour.
    pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(3600);

    /// Refresh token lifetime: 30 days.
    pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

    /// Idle timeout after which sessions are evicted.
    pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

    /// Interval of the session sweep timer.
    pub const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

    /// Interval of the OAuth store cleanup timer.
    pub const OAUTH_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

    /// Ceiling on the wait for a correlated JSON-RPC reply.
    pub const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

    /// Dynamic client registrations allowed per minute (whole process).
    pub const REGISTRATIONS_PER_MINUTE: u32 = 30;
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,

    /// Externally visible base URL, used in OAuth metadata and SSE
    /// endpoint announcements.
    pub base_url: String,

    /// Base URL of the external record store (PostgREST-style). When absent
    /// the in-memory store is used.
    pub record_store_url: Option<String>,

    /// Service key for the external record store.
    pub record_store_key: Option<String>,

    /// Ceiling on the wait for a correlated JSON-RPC reply.
    pub reply_timeout: Duration,

    /// Idle timeout for sessions.
    pub session_idle_timeout: Duration,

    /// Session sweep interval.
    pub session_sweep_interval: Duration,

    /// Authorization code lifetime.
    pub auth_code_ttl: Duration,

    /// Access token lifetime.
    pub access_token_ttl: Duration,

    /// Refresh token lifetime.
    pub refresh_token_ttl: Duration,

    /// OAuth store cleanup interval.
    pub oauth_cleanup_interval: Duration,

    /// Dynamic client registrations allowed per minute.
    pub registrations_per_minute: u32,
}

impl Config {
    /// Create a configuration with production lifetimes.
    #[must_use]
    pub fn new(
        port: u16,
        base_url: String,
        record_store_url: Option<String>,
        record_store_key: Option<String>,
    ) -> Self {
        Self {
            port,
            base_url,
            record_store_url,
            record_store_key,
            reply_timeout: lifetimes::REPLY_TIMEOUT,
            session_idle_timeout: lifetimes::SESSION_IDLE_TIMEOUT,
            session_sweep_interval: lifetimes::SESSION_SWEEP_INTERVAL,
            auth_code_ttl: lifetimes::AUTH_CODE_TTL,
            access_token_ttl: lifetimes::ACCESS_TOKEN_TTL,
            refresh_token_ttl: lifetimes::REFRESH_TOKEN_TTL,
            oauth_cleanup_interval: lifetimes::OAUTH_CLEANUP_INTERVAL,
            registrations_per_minute: lifetimes::REGISTRATIONS_PER_MINUTE,
        }
    }

    /// Create a test configuration with short timeouts.
    #[must_use]
    pub fn for_testing(base_url: &str) -> Self {
        Self {
            port: 0,
            base_url: base_url.to_string(),
            record_store_url: None,
            record_store_key: None,
            reply_timeout: Duration::from_secs(2),
            session_idle_timeout: Duration::from_secs(30 * 60),
            session_sweep_interval: Duration::from_secs(60),
            auth_code_ttl: lifetimes::AUTH_CODE_TTL,
            access_token_ttl: lifetimes::ACCESS_TOKEN_TTL,
            refresh_token_ttl: lifetimes::REFRESH_TOKEN_TTL,
            oauth_cleanup_interval: lifetimes::OAUTH_CLEANUP_INTERVAL,
            registrations_per_minute: 1000,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if `PORT` is set but not a valid number.
    pub fn from_env() -> anyhow::Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(v) => v.parse()?,
            Err(_) => 3001,
        };
        let base_url =
            std::env::var("BASE_URL").unwrap_or_else(|_| format!("http://localhost:{port}"));
        let record_store_url = std::env::var("RECORD_STORE_URL").ok();
        let record_store_key = std::env::var("RECORD_STORE_SERVICE_KEY").ok();
        Ok(Self::new(port, base_url, record_store_url, record_store_key))
    }

    /// Check if an external record store is configured.
    #[must_use]
    pub const fn has_record_store(&self) -> bool {
        self.record_store_url.is_some()
    }

    /// URL of the protected-resource metadata document.
    #[must_use]
    pub fn resource_metadata_url(&self) -> String {
        format!("{}/.well-known/oauth-protected-resource", self.base_url)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(3001, "http://localhost:3001".to_string(), None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.port, 3001);
        assert!(!config.has_record_store());
        assert_eq!(config.reply_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_resource_metadata_url() {
        let config = Config::new(8080, "https://mcp.example.com".into(), None, None);
        assert_eq!(
            config.resource_metadata_url(),
            "https://mcp.example.com/.well-known/oauth-protected-resource"
        );
    }

    #[test]
    fn test_for_testing_shortens_reply_timeout() {
        let config = Config::for_testing("https://example.com");
        assert!(config.reply_timeout < Duration::from_secs(30));
    }
}
