//! In-memory record store for single-instance and test deployments.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{CredentialRecord, RecordStore, Subscription, SubscriptionStatus};
use crate::auth;
use crate::error::StoreResult;

#[derive(Clone)]
struct StoredCredential {
    record: CredentialRecord,
    last_used_at: Option<DateTime<Utc>>,
}

/// In-memory implementation of [`RecordStore`].
///
/// Also exposes provisioning helpers so tests and dev deployments can mint
/// keys without an external system of record.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    // Keyed by credential digest.
    credentials: Arc<RwLock<HashMap<String, StoredCredential>>>,
    subscriptions: Arc<RwLock<HashMap<String, Subscription>>>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a new API key for a client. Returns the clear-text key,
    /// which is never stored.
    pub async fn provision_key(&self, client_id: &str) -> auth::ProvisionedKey {
        let provisioned = auth::generate_api_key();

        self.credentials.write().await.insert(
            provisioned.digest.clone(),
            StoredCredential {
                record: CredentialRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    client_id: client_id.to_owned(),
                    key_prefix: Some(provisioned.prefix.clone()),
                    revoked_at: None,
                },
                last_used_at: None,
            },
        );

        provisioned
    }

    /// Insert a credential with a known digest (for seeding tests).
    pub async fn insert_credential(&self, digest: &str, client_id: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.credentials.write().await.insert(
            digest.to_owned(),
            StoredCredential {
                record: CredentialRecord {
                    id: id.clone(),
                    client_id: client_id.to_owned(),
                    key_prefix: None,
                    revoked_at: None,
                },
                last_used_at: None,
            },
        );
        id
    }

    /// Soft-revoke a credential by digest. Returns whether a record existed.
    pub async fn revoke(&self, digest: &str) -> bool {
        let mut credentials = self.credentials.write().await;
        match credentials.get_mut(digest) {
            Some(stored) => {
                stored.record.revoked_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Set a client's subscription status.
    pub async fn set_subscription(&self, client_id: &str, status: SubscriptionStatus) {
        self.subscriptions.write().await.insert(
            client_id.to_owned(),
            Subscription { client_id: client_id.to_owned(), status, plan: None },
        );
    }

    /// Read back a credential's last-used timestamp (for tests).
    pub async fn last_used_at(&self, digest: &str) -> Option<DateTime<Utc>> {
        self.credentials.read().await.get(digest).and_then(|s| s.last_used_at)
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    async fn credential_by_digest(&self, digest: &str) -> StoreResult<Option<CredentialRecord>> {
        let credentials = self.credentials.read().await;
        Ok(credentials
            .get(digest)
            .filter(|stored| stored.record.revoked_at.is_none())
            .map(|stored| stored.record.clone()))
    }

    async fn touch_credential(&self, credential_id: &str) -> StoreResult<()> {
        let mut credentials = self.credentials.write().await;
        if let Some(stored) = credentials.values_mut().find(|s| s.record.id == credential_id) {
            stored.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn subscription(&self, client_id: &str) -> StoreResult<Option<Subscription>> {
        Ok(self.subscriptions.read().await.get(client_id).cloned())
    }
}

impl std::fmt::Debug for MemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRecordStore").finish()
    }
}
