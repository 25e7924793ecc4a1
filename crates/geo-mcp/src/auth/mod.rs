//! Credential validation.
//!
//! API keys are opaque `sk_live_...` secrets. Only their SHA-256 digest is
//! ever persisted; validation hashes the presented key, resolves the owning
//! client, and gates on subscription state.

pub mod resolver;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::error::AuthError;
use crate::store::RecordStore;

/// Length of the display prefix kept for UI identification.
const KEY_PREFIX_LEN: usize = 12;

/// The resolved auth context handed to every tool invocation.
///
/// Tools receive this instead of the raw credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Owning client identifier.
    pub client_id: String,
    /// The credential record that authenticated this request.
    pub credential_id: String,
}

/// A freshly minted API key. The clear-text `key` is shown once and never
/// stored.
#[derive(Debug, Clone)]
pub struct ProvisionedKey {
    /// Clear-text secret.
    pub key: String,
    /// SHA-256 hex digest, the only form that is persisted.
    pub digest: String,
    /// Display prefix.
    pub prefix: String,
}

/// Compute the SHA-256 hex digest of an API key.
#[must_use]
pub fn digest_key(key: &str) -> String {
    let hash = Sha256::digest(key.as_bytes());
    let mut out = String::with_capacity(hash.len() * 2);
    for byte in hash {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Mint a new API key: `sk_live_` + 256 bits of randomness, base64url.
#[must_use]
pub fn generate_api_key() -> ProvisionedKey {
    let mut random = [0u8; 32];
    random[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    random[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());

    let key = format!("sk_live_{}", URL_SAFE_NO_PAD.encode(random));
    let digest = digest_key(&key);
    let prefix = key[..KEY_PREFIX_LEN].to_string();

    ProvisionedKey { key, digest, prefix }
}

/// Validates raw API keys against the record store.
#[derive(Clone)]
pub struct CredentialValidator {
    store: Arc<dyn RecordStore>,
}

impl CredentialValidator {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Validate an API key and resolve the owning identity.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingCredential`] for an empty key
    /// - [`AuthError::InvalidCredential`] when no non-revoked record matches
    /// - [`AuthError::NoSubscription`] when the owner has no subscription
    /// - [`AuthError::SubscriptionExpired`] for expired/cancelled subscriptions
    pub async fn validate(&self, api_key: &str) -> Result<Identity, AuthError> {
        if api_key.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let digest = digest_key(api_key);

        // A store failure here is indistinguishable from a bad key as far as
        // the caller is concerned.
        let record = match self.store.credential_by_digest(&digest).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(AuthError::InvalidCredential),
            Err(e) => {
                tracing::warn!(error = %e, "Credential lookup failed");
                return Err(AuthError::InvalidCredential);
            }
        };

        let subscription = match self.store.subscription(&record.client_id).await {
            Ok(Some(subscription)) => subscription,
            Ok(None) => return Err(AuthError::NoSubscription),
            Err(e) => {
                tracing::warn!(error = %e, "Subscription lookup failed");
                return Err(AuthError::NoSubscription);
            }
        };

        if !subscription.status.permits_access() {
            return Err(AuthError::SubscriptionExpired);
        }

        // Best-effort; failure to record last-use must not fail validation.
        if let Err(e) = self.store.touch_credential(&record.id).await {
            tracing::debug!(error = %e, credential_id = %record.id, "Failed to touch credential");
        }

        Ok(Identity { client_id: record.client_id, credential_id: record.id })
    }
}

impl std::fmt::Debug for CredentialValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialValidator").finish()
    }
}
