//! Bearer credential resolution.
//!
//! The protocol endpoint accepts two kinds of bearer values: OAuth access
//! tokens minted by the embedded authorization server, and raw long-lived API
//! keys. Resolution is an ordered chain of strategies, each of which either
//! resolves an [`Identity`], declines ("not applicable"), or denies.

use super::{CredentialValidator, Identity};
use crate::error::AuthError;
use crate::server::oauth::OAuthStore;

/// Outcome of one resolution strategy.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The bearer resolved to an identity.
    Resolved(Identity),
    /// The bearer is not the kind of credential this strategy handles.
    NotApplicable,
    /// The bearer is this strategy's kind of credential, but invalid.
    Denied(AuthError),
}

/// One credential-resolution strategy.
#[async_trait::async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    async fn resolve(&self, bearer: &str) -> Resolution;
}

/// Resolves OAuth access tokens. Token validity is necessary but not
/// sufficient: the underlying API key is re-validated on every use, so a
/// revoked key or lapsed subscription immediately invalidates every token
/// derived from it.
pub struct AccessTokenResolver {
    oauth: OAuthStore,
    validator: CredentialValidator,
}

impl AccessTokenResolver {
    #[must_use]
    pub fn new(oauth: OAuthStore, validator: CredentialValidator) -> Self {
        Self { oauth, validator }
    }
}

#[async_trait::async_trait]
impl CredentialResolver for AccessTokenResolver {
    fn name(&self) -> &'static str {
        "oauth_access_token"
    }

    async fn resolve(&self, bearer: &str) -> Resolution {
        match self.oauth.lookup_access_token(bearer).await {
            // Unknown tokens fall through: the bearer may be a raw API key.
            None => Resolution::NotApplicable,
            Some(Err(e)) => Resolution::Denied(e),
            Some(Ok(info)) => match self.validator.validate(&info.api_key).await {
                Ok(identity) => Resolution::Resolved(identity),
                Err(e) => Resolution::Denied(e),
            },
        }
    }
}

/// Treats the bearer as a raw long-lived API key.
pub struct ApiKeyResolver {
    validator: CredentialValidator,
}

impl ApiKeyResolver {
    #[must_use]
    pub fn new(validator: CredentialValidator) -> Self {
        Self { validator }
    }
}

#[async_trait::async_trait]
impl CredentialResolver for ApiKeyResolver {
    fn name(&self) -> &'static str {
        "api_key"
    }

    async fn resolve(&self, bearer: &str) -> Resolution {
        match self.validator.validate(bearer).await {
            Ok(identity) => Resolution::Resolved(identity),
            Err(e) => Resolution::Denied(e),
        }
    }
}

/// Ordered chain of resolution strategies, tried until one resolves.
pub struct ResolverChain {
    resolvers: Vec<Box<dyn CredentialResolver>>,
}

impl ResolverChain {
    #[must_use]
    pub fn new(resolvers: Vec<Box<dyn CredentialResolver>>) -> Self {
        Self { resolvers }
    }

    /// The standard chain: OAuth access token first, raw API key fallback.
    #[must_use]
    pub fn standard(oauth: OAuthStore, validator: CredentialValidator) -> Self {
        Self::new(vec![
            Box::new(AccessTokenResolver::new(oauth, validator.clone())),
            Box::new(ApiKeyResolver::new(validator)),
        ])
    }

    /// Resolve a bearer value to an identity.
    ///
    /// The first denial is retained so that, say, an expired access token is
    /// reported as such rather than as an invalid API key.
    ///
    /// # Errors
    ///
    /// Returns the first denial, or [`AuthError::InvalidCredential`] if every
    /// strategy declined.
    pub async fn resolve(&self, bearer: &str) -> Result<Identity, AuthError> {
        let mut first_denial: Option<AuthError> = None;

        for resolver in &self.resolvers {
            match resolver.resolve(bearer).await {
                Resolution::Resolved(identity) => {
                    tracing::debug!(resolver = resolver.name(), client_id = %identity.client_id, "Resolved bearer");
                    return Ok(identity);
                }
                Resolution::NotApplicable => {}
                Resolution::Denied(e) => {
                    tracing::debug!(resolver = resolver.name(), error = %e, "Bearer denied");
                    first_denial.get_or_insert(e);
                }
            }
        }

        Err(first_denial.unwrap_or(AuthError::InvalidCredential))
    }
}

impl std::fmt::Debug for ResolverChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverChain").field("len", &self.resolvers.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::store::{MemoryRecordStore, RecordStore, SubscriptionStatus};

    async fn setup() -> (ResolverChain, OAuthStore, String) {
        let store = Arc::new(MemoryRecordStore::new());
        let key = store.provision_key("client-1").await;
        store.set_subscription("client-1", SubscriptionStatus::Active).await;

        let validator = CredentialValidator::new(store as Arc<dyn RecordStore>);
        let oauth = OAuthStore::new(&Config::for_testing("https://example.com"));
        let chain = ResolverChain::standard(oauth.clone(), validator);
        (chain, oauth, key.key)
    }

    #[tokio::test]
    async fn test_raw_api_key_falls_through_token_resolver() {
        let (chain, _oauth, key) = setup().await;
        let identity = chain.resolve(&key).await.unwrap();
        assert_eq!(identity.client_id, "client-1");
    }

    #[tokio::test]
    async fn test_access_token_resolves() {
        let (chain, oauth, key) = setup().await;
        let pair = oauth.create_token_pair("oauth-client", "mcp:tools", &key).await;

        let identity = chain.resolve(&pair.access_token).await.unwrap();
        assert_eq!(identity.client_id, "client-1");
    }

    #[tokio::test]
    async fn test_garbage_bearer_is_invalid_credential() {
        let (chain, _oauth, _) = setup().await;
        assert_eq!(
            chain.resolve("not-a-key-or-token").await.unwrap_err(),
            AuthError::InvalidCredential
        );
    }

    #[tokio::test]
    async fn test_token_over_revoked_key_is_denied() {
        let store = Arc::new(MemoryRecordStore::new());
        let key = store.provision_key("client-1").await;
        store.set_subscription("client-1", SubscriptionStatus::Active).await;

        let validator = CredentialValidator::new(Arc::clone(&store) as Arc<dyn RecordStore>);
        let oauth = OAuthStore::new(&Config::for_testing("https://example.com"));
        let chain = ResolverChain::standard(oauth.clone(), validator);

        let pair = oauth.create_token_pair("oauth-client", "mcp:tools", &key.key).await;
        store.revoke(&key.digest).await;

        assert_eq!(
            chain.resolve(&pair.access_token).await.unwrap_err(),
            AuthError::InvalidCredential
        );
    }
}
