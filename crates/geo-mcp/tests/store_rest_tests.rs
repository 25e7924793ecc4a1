//! Tests for the REST record store against a mock PostgREST backend.

use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use geo_mcp::store::{RecordStore, RestRecordStore, SubscriptionStatus};

const SERVICE_KEY: &str = "service-key-123";

async fn mock_store() -> (MockServer, RestRecordStore) {
    let server = MockServer::start().await;
    let store = RestRecordStore::new(&server.uri(), SERVICE_KEY).unwrap();
    (server, store)
}

#[tokio::test]
async fn test_credential_lookup_queries_by_digest() {
    let (server, store) = mock_store().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/api_keys"))
        .and(query_param("key_hash", "eq.abc123"))
        .and(query_param("revoked_at", "is.null"))
        .and(header("apikey", SERVICE_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "id": "cred-1",
                "client_id": "client-1",
                "key_prefix": "sk_live_abcd",
                "revoked_at": null
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let record = store.credential_by_digest("abc123").await.unwrap().unwrap();
    assert_eq!(record.id, "cred-1");
    assert_eq!(record.client_id, "client-1");
    assert_eq!(record.key_prefix.as_deref(), Some("sk_live_abcd"));
}

#[tokio::test]
async fn test_credential_lookup_empty_result_is_none() {
    let (server, store) = mock_store().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/api_keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    assert!(store.credential_by_digest("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_backend_error_is_surfaced() {
    let (server, store) = mock_store().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/api_keys"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = store.credential_by_digest("abc").await.unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn test_subscription_lookup() {
    let (server, store) = mock_store().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/subscriptions"))
        .and(query_param("client_id", "eq.client-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "client_id": "client-1",
                "status": "trial",
                "plan": "starter"
            }
        ])))
        .mount(&server)
        .await;

    let subscription = store.subscription("client-1").await.unwrap().unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Trial);
    assert_eq!(subscription.plan.as_deref(), Some("starter"));
}

#[tokio::test]
async fn test_touch_patches_last_used() {
    let (server, store) = mock_store().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/api_keys"))
        .and(query_param("id", "eq.cred-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    store.touch_credential("cred-1").await.unwrap();
}
