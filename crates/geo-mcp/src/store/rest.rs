//! Record store backed by a PostgREST-style HTTP API.
//!
//! Queries the `api_keys` and `subscriptions` tables through the REST
//! interface with retry middleware and exponential backoff.

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde_json::json;

use super::{CredentialRecord, RecordStore, Subscription};
use crate::error::{StoreError, StoreResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// REST implementation of [`RecordStore`].
#[derive(Clone)]
pub struct RestRecordStore {
    client: ClientWithMiddleware,
    base_url: String,
}

impl RestRecordStore {
    /// Create a new REST record store.
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails.
    pub fn new(base_url: &str, service_key: &str) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            "application/json".parse().expect("valid content-type header"),
        );
        headers.insert("apikey", service_key.parse()?);
        headers.insert(reqwest::header::AUTHORIZATION, format!("Bearer {service_key}").parse()?);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .gzip(true)
            .build()?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(200), Duration::from_secs(5))
            .build_with_max_retries(3);

        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    async fn get_rows<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> StoreResult<Vec<T>> {
        let url = format!("{}/rest/v1/{table}", self.base_url);
        let response = self.client.get(&url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::backend(status.as_u16(), message));
        }

        let body = response.text().await.map_err(StoreError::Http)?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait::async_trait]
impl RecordStore for RestRecordStore {
    async fn credential_by_digest(&self, digest: &str) -> StoreResult<Option<CredentialRecord>> {
        let rows: Vec<CredentialRecord> = self
            .get_rows(
                "api_keys",
                &[
                    ("select", "id,client_id,key_prefix,revoked_at".to_string()),
                    ("key_hash", format!("eq.{digest}")),
                    ("revoked_at", "is.null".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        Ok(rows.into_iter().next())
    }

    async fn touch_credential(&self, credential_id: &str) -> StoreResult<()> {
        let url = format!("{}/rest/v1/api_keys", self.base_url);
        let response = self
            .client
            .patch(&url)
            .query(&[("id", format!("eq.{credential_id}"))])
            .json(&json!({ "last_used_at": Utc::now().to_rfc3339() }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::backend(status.as_u16(), message));
        }
        Ok(())
    }

    async fn subscription(&self, client_id: &str) -> StoreResult<Option<Subscription>> {
        let rows: Vec<Subscription> = self
            .get_rows(
                "subscriptions",
                &[
                    ("select", "client_id,status,plan".to_string()),
                    ("client_id", format!("eq.{client_id}")),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        Ok(rows.into_iter().next())
    }
}

impl std::fmt::Debug for RestRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestRecordStore").field("base_url", &self.base_url).finish()
    }
}
