//! End-to-end tests for the OAuth 2.1 flow over HTTP.
//!
//! Drives the real axum router with `tower::ServiceExt::oneshot`, backed by
//! the in-memory record store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use geo_mcp::config::Config;
use geo_mcp::server::router::{AppState, create_router};
use geo_mcp::store::{MemoryRecordStore, RecordStore, SubscriptionStatus};
use geo_mcp::tools;

const BASE_URL: &str = "https://mcp.example.com";
const CALLBACK: &str = "https://client.example.com/cb";

async fn build_test_app() -> (axum::Router, Arc<MemoryRecordStore>, String) {
    let store = Arc::new(MemoryRecordStore::new());
    let key = store.provision_key("subscriber-1").await;
    store.set_subscription("subscriber-1", SubscriptionStatus::Active).await;

    let config = Config::for_testing(BASE_URL);
    let state = Arc::new(AppState::new(
        config,
        Arc::clone(&store) as Arc<dyn RecordStore>,
        tools::register_all_tools(),
    ));
    (create_router(state), store, key.key)
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn register_client(app: &axum::Router) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::post("/oauth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({
                        "client_name": "Integration Test Client",
                        "redirect_uris": [CALLBACK]
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = json_body(response).await;
    body["client_id"].as_str().unwrap().to_string()
}

/// POST the consent form and return the Location header of the redirect.
async fn authorize(
    app: &axum::Router,
    client_id: &str,
    api_key: &str,
    code_challenge: &str,
    method: &str,
) -> String {
    let form = serde_urlencoded::to_string([
        ("client_id", client_id),
        ("redirect_uri", CALLBACK),
        ("state", "xyz123"),
        ("code_challenge", code_challenge),
        ("code_challenge_method", method),
        ("scope", "mcp:tools"),
        ("api_key", api_key),
    ])
    .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::post("/oauth/authorize")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    response.headers().get(header::LOCATION).unwrap().to_str().unwrap().to_string()
}

fn query_param(location: &str, name: &str) -> Option<String> {
    let url = url::Url::parse(location).unwrap();
    url.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.into_owned())
}

async fn exchange_code(
    app: &axum::Router,
    params: &[(&str, &str)],
) -> (StatusCode, serde_json::Value) {
    let form = serde_urlencoded::to_string(params).unwrap();
    let response = app
        .clone()
        .oneshot(
            Request::post("/oauth/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, json_body(response).await)
}

#[tokio::test]
async fn test_discovery_documents() {
    let (app, _store, _key) = build_test_app().await;

    let response = app
        .clone()
        .oneshot(Request::get("/.well-known/oauth-protected-resource").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["resource"], BASE_URL);
    assert_eq!(body["authorization_servers"][0], BASE_URL);

    let response = app
        .clone()
        .oneshot(
            Request::get("/.well-known/oauth-authorization-server").body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["token_endpoint"], format!("{BASE_URL}/oauth/token"));
    assert!(
        body["code_challenge_methods_supported"]
            .as_array()
            .unwrap()
            .contains(&json!("S256"))
    );
}

#[tokio::test]
async fn test_full_authorization_code_flow() {
    let (app, _store, api_key) = build_test_app().await;
    let client_id = register_client(&app).await;

    // Consent page round-trips the request parameters.
    let consent_uri = format!(
        "/oauth/authorize?client_id={client_id}&redirect_uri=https%3A%2F%2Fclient.example.com%2Fcb&response_type=code&state=xyz123&code_challenge=ch&code_challenge_method=S256"
    );
    let response =
        app.clone().oneshot(Request::get(&consent_uri).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // PKCE setup (RFC 7636 Appendix B vector).
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));

    let location = authorize(&app, &client_id, &api_key, &challenge, "S256").await;
    assert!(location.starts_with(CALLBACK));
    assert_eq!(query_param(&location, "state").as_deref(), Some("xyz123"));
    let code = query_param(&location, "code").unwrap();

    let (status, body) = exchange_code(
        &app,
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("redirect_uri", CALLBACK),
            ("code_verifier", verifier),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 3600);
    assert_eq!(body["scope"], "mcp:tools");
    assert!(body["access_token"].as_str().is_some());
    assert!(body["refresh_token"].as_str().is_some());

    // The code is single use.
    let (status, body) = exchange_code(
        &app,
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("redirect_uri", CALLBACK),
            ("code_verifier", verifier),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_mismatched_redirect_uri_is_invalid_grant() {
    let (app, _store, api_key) = build_test_app().await;
    let client_id = register_client(&app).await;

    let location = authorize(&app, &client_id, &api_key, "plain-challenge", "plain").await;
    let code = query_param(&location, "code").unwrap();

    let (status, body) = exchange_code(
        &app,
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("redirect_uri", "https://evil/cb"),
            ("code_verifier", "plain-challenge"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
    assert_eq!(body["error_description"], "Redirect URI mismatch");
}

#[tokio::test]
async fn test_wrong_pkce_verifier_is_rejected() {
    let (app, _store, api_key) = build_test_app().await;
    let client_id = register_client(&app).await;

    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(b"the-right-verifier"));
    let location = authorize(&app, &client_id, &api_key, &challenge, "S256").await;
    let code = query_param(&location, "code").unwrap();

    let (status, body) = exchange_code(
        &app,
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("redirect_uri", CALLBACK),
            ("code_verifier", "the-wrong-verifier"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_description"], "Invalid code_verifier");
}

#[tokio::test]
async fn test_invalid_api_key_redirects_access_denied() {
    let (app, _store, _key) = build_test_app().await;
    let client_id = register_client(&app).await;

    let location = authorize(&app, &client_id, "sk_live_wrong", "", "").await;
    assert!(location.starts_with(CALLBACK));
    assert_eq!(query_param(&location, "error").as_deref(), Some("access_denied"));
    assert_eq!(query_param(&location, "error_description").as_deref(), Some("Invalid API key"));
    assert!(query_param(&location, "code").is_none());
}

#[tokio::test]
async fn test_expired_subscription_redirects_access_denied() {
    let (app, store, api_key) = build_test_app().await;
    store.set_subscription("subscriber-1", SubscriptionStatus::Expired).await;
    let client_id = register_client(&app).await;

    let location = authorize(&app, &client_id, &api_key, "", "").await;
    assert_eq!(query_param(&location, "error").as_deref(), Some("access_denied"));
    assert!(query_param(&location, "error_description").unwrap().contains("expired"));
}

#[tokio::test]
async fn test_refresh_rotation_over_http() {
    let (app, _store, api_key) = build_test_app().await;
    let client_id = register_client(&app).await;

    let location = authorize(&app, &client_id, &api_key, "v", "plain").await;
    let code = query_param(&location, "code").unwrap();
    let (_, body) = exchange_code(
        &app,
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("redirect_uri", CALLBACK),
            ("code_verifier", "v"),
        ],
    )
    .await;
    let old_refresh = body["refresh_token"].as_str().unwrap().to_string();

    let (status, body) =
        exchange_code(&app, &[("grant_type", "refresh_token"), ("refresh_token", &old_refresh)])
            .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scope"], "mcp:tools");
    assert_ne!(body["refresh_token"].as_str().unwrap(), old_refresh);

    // Replaying the rotated token fails.
    let (status, body) =
        exchange_code(&app, &[("grant_type", "refresh_token"), ("refresh_token", &old_refresh)])
            .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_register_requires_valid_redirect_uris() {
    let (app, _store, _key) = build_test_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::post("/oauth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"client_name": "No URIs"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_client_metadata");

    let response = app
        .clone()
        .oneshot(
            Request::post("/oauth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"redirect_uris": ["not a url"]}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_redirect_uri");
}

#[tokio::test]
async fn test_public_client_registration_has_no_secret() {
    let (app, _store, _key) = build_test_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::post("/oauth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({
                        "redirect_uris": [CALLBACK],
                        "token_endpoint_auth_method": "none"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = json_body(response).await;
    assert!(body.get("client_secret").is_none());
    assert_eq!(body["token_endpoint_auth_method"], "none");
}

#[tokio::test]
async fn test_unsupported_grant_type() {
    let (app, _store, _key) = build_test_app().await;
    let (status, body) =
        exchange_code(&app, &[("grant_type", "client_credentials")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_token_response_is_uncacheable() {
    let (app, _store, api_key) = build_test_app().await;
    let client_id = register_client(&app).await;

    let location = authorize(&app, &client_id, &api_key, "v", "plain").await;
    let code = query_param(&location, "code").unwrap();

    let form = serde_urlencoded::to_string([
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", CALLBACK),
        ("code_verifier", "v"),
    ])
    .unwrap();
    let response = app
        .clone()
        .oneshot(
            Request::post("/oauth/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
    assert_eq!(response.headers().get(header::PRAGMA).unwrap(), "no-cache");
}
