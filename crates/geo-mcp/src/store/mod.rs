//! The record store boundary.
//!
//! Credentials and subscriptions live in an external system of record. The
//! server only needs a narrow query interface over it, expressed by the
//! [`RecordStore`] trait. Two implementations exist: [`MemoryRecordStore`]
//! for single-instance and test deployments, and [`RestRecordStore`] backed
//! by a PostgREST-style HTTP API. Nothing above this module may assume which
//! backing is in use.

mod memory;
mod rest;

pub use memory::MemoryRecordStore;
pub use rest::RestRecordStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// A stored credential record. The secret itself is never stored; lookups go
/// through its SHA-256 digest.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialRecord {
    /// Opaque record id.
    pub id: String,
    /// Owning client identity.
    pub client_id: String,
    /// Display prefix of the key (first characters, for UI identification).
    #[serde(default)]
    pub key_prefix: Option<String>,
    /// Soft-revocation timestamp. A revoked credential never matches lookups.
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Subscription state gating access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Trial,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    /// Only `active` and `trial` permit continued access.
    #[must_use]
    pub const fn permits_access(self) -> bool {
        matches!(self, Self::Active | Self::Trial)
    }
}

/// A client's subscription record.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    /// Owning client identity.
    pub client_id: String,
    /// Current status.
    pub status: SubscriptionStatus,
    /// Plan name, if the backend records one.
    #[serde(default)]
    pub plan: Option<String>,
}

/// Narrow query interface over the system of record.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Look up a non-revoked credential by its SHA-256 digest.
    async fn credential_by_digest(&self, digest: &str) -> StoreResult<Option<CredentialRecord>>;

    /// Record that a credential was just used. Best-effort; callers must not
    /// fail their primary operation when this errors.
    async fn touch_credential(&self, credential_id: &str) -> StoreResult<()>;

    /// Look up a client's subscription.
    async fn subscription(&self, client_id: &str) -> StoreResult<Option<Subscription>>;
}
