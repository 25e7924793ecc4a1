//! Error types for the GEO MCP server.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.

/// Authentication and authorization failures.
///
/// Every variant maps to a stable machine-readable code surfaced in 401/400
/// responses. Messages are safe to show to callers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No credential was presented.
    #[error("API key is required")]
    MissingCredential,

    /// The presented credential does not match any active record.
    #[error("Invalid API key")]
    InvalidCredential,

    /// The credential's owner has no subscription record at all.
    #[error("No active subscription found")]
    NoSubscription,

    /// The subscription exists but is expired or cancelled.
    #[error("Subscription has expired. Please renew to continue using GEO MCP.")]
    SubscriptionExpired,

    /// The bearer value is not a known access token.
    #[error("Invalid access token")]
    InvalidToken,

    /// The access token was found but is past its expiry.
    #[error("Access token has expired")]
    TokenExpired,
}

impl AuthError {
    /// Stable machine-readable code for API responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidCredential => "invalid_credential",
            Self::NoSubscription => "no_subscription",
            Self::SubscriptionExpired => "subscription_expired",
            Self::InvalidToken => "invalid_token",
            Self::TokenExpired => "token_expired",
        }
    }
}

/// Errors from the record store boundary.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// HTTP transport error (connection, DNS, TLS, etc.)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Middleware error
    #[error("Middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    /// JSON parsing error
    #[error("Failed to parse record: {0}")]
    Parse(#[from] serde_json::Error),

    /// Unexpected status from the store backend
    #[error("Record store error ({status}): {message}")]
    Backend {
        /// HTTP status code
        status: u16,
        /// Response body or message
        message: String,
    },
}

impl StoreError {
    /// Create a backend error.
    #[must_use]
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        Self::Backend { status, message: message.into() }
    }
}

/// Errors from MCP tool execution.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    /// Error from the record store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Input validation failed
    #[error("Validation error: {message}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Validation error message
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal tool logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Convert to a user-friendly error message for MCP response.
    ///
    /// Store errors are collapsed to a generic message so backend details
    /// never reach the client.
    #[must_use]
    pub fn to_user_message(&self) -> String {
        match self {
            Self::Store(_) => "Service temporarily unavailable. Please retry.".to_string(),
            Self::Validation { field, message } => {
                format!("Invalid input for '{field}': {message}")
            }
            _ => self.to_string(),
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;
