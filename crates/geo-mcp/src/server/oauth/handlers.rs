//! OAuth 2.1 endpoint handlers.
//!
//! Implements:
//! - RFC 9728: OAuth Protected Resource Metadata
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7636: PKCE (S256 and plain)
//! - RFC 6749: OAuth 2.0 Authorization Code Grant
//!
//! The authorization endpoint collects an API key and exchanges it for a
//! short-lived code; authorization failures after the redirect URI has been
//! validated are always expressed as an `error=access_denied` redirect back
//! to the integrator, never as a 500.

use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;

use super::login::render_consent_page;
use super::pkce;
use super::store::{OAuthStore, RefreshError, TokenPair};
use crate::server::router::AppState;

/// Scopes this resource server understands.
pub const SCOPES: [&str; 3] = ["mcp:tools", "mcp:resources", "mcp:prompts"];

const DEFAULT_SCOPE: &str = "mcp:tools mcp:resources mcp:prompts";

// ─── RFC 9728: Protected Resource Metadata ───────────────────────────────────

/// `GET /.well-known/oauth-protected-resource`
///
/// Tells clients where to find the authorization server for this resource.
pub async fn handle_protected_resource(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let base = &state.config.base_url;
    Json(serde_json::json!({
        "resource": base,
        "authorization_servers": [base],
        "bearer_methods_supported": ["header"],
        "scopes_supported": SCOPES,
        "resource_documentation": format!("{base}/docs")
    }))
}

// ─── RFC 8414: Authorization Server Metadata ─────────────────────────────────

/// `GET /.well-known/oauth-authorization-server`
///
/// Describes the OAuth endpoints and capabilities.
pub async fn handle_auth_server_metadata(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let base = &state.config.base_url;
    Json(serde_json::json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/oauth/authorize"),
        "token_endpoint": format!("{base}/oauth/token"),
        "registration_endpoint": format!("{base}/oauth/register"),
        "scopes_supported": SCOPES,
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "token_endpoint_auth_methods_supported": ["none", "client_secret_post"],
        "code_challenge_methods_supported": ["S256", "plain"]
    }))
}

// ─── RFC 7591: Dynamic Client Registration ───────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub client_name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: Option<String>,
}

/// `POST /oauth/register`
///
/// Register a new OAuth client dynamically. Registration is rate limited per
/// process; clients are otherwise unbounded and non-durable.
pub async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    if state.register_limiter.check().is_err() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "too_many_requests",
                "error_description": "Client registration rate limit exceeded"
            })),
        )
            .into_response();
    }

    let redirect_uris = req.redirect_uris.unwrap_or_default();
    if redirect_uris.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "invalid_client_metadata",
                "error_description": "redirect_uris is required"
            })),
        )
            .into_response();
    }
    if let Some(bad) = redirect_uris.iter().find(|u| url::Url::parse(u).is_err()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "invalid_redirect_uri",
                "error_description": format!("Not an absolute URI: {bad}")
            })),
        )
            .into_response();
    }

    let auth_method =
        req.token_endpoint_auth_method.as_deref().unwrap_or("client_secret_post").to_string();
    let client = state
        .oauth
        .register_client(req.client_name, redirect_uris, req.grant_types, Some(&auth_method))
        .await;

    tracing::info!(client_id = %client.client_id, "Registered OAuth client");

    let mut body = serde_json::json!({
        "client_id": client.client_id,
        "client_name": client.client_name,
        "redirect_uris": client.redirect_uris,
        "grant_types": client.grant_types,
        "response_types": if req.response_types.is_empty() {
            vec!["code".to_string()]
        } else {
            req.response_types
        },
        "token_endpoint_auth_method": auth_method,
        "client_id_issued_at": client.created_at.timestamp()
    });
    if let Some(secret) = client.client_secret {
        body["client_secret"] = serde_json::Value::String(secret);
    }

    (StatusCode::CREATED, Json(body)).into_response()
}

// ─── Authorization Endpoint ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: Option<String>,
}

/// `GET /oauth/authorize`
///
/// Render the consent page. The request parameters are validated here and
/// round-trip through the form so the POST handler receives them unmodified.
pub async fn handle_authorize_get(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let Some(client_id) = query.client_id.as_deref() else {
        return (StatusCode::BAD_REQUEST, "Missing client_id").into_response();
    };
    let Some(redirect_uri) = query.redirect_uri.as_deref() else {
        return (StatusCode::BAD_REQUEST, "Missing redirect_uri").into_response();
    };

    if query.response_type.as_deref().is_some_and(|rt| rt != "code") {
        return (StatusCode::BAD_REQUEST, "response_type must be 'code'").into_response();
    }

    let Some(client) = state.oauth.get_client(client_id).await else {
        return (StatusCode::BAD_REQUEST, "Unknown client_id").into_response();
    };
    if !client.redirect_uris.iter().any(|u| u == redirect_uri) {
        return (StatusCode::BAD_REQUEST, "redirect_uri not registered for this client")
            .into_response();
    }

    Html(render_consent_page(
        &client.client_name,
        client_id,
        redirect_uri,
        query.state.as_deref().unwrap_or(""),
        query.code_challenge.as_deref().unwrap_or(""),
        query.code_challenge_method.as_deref().unwrap_or(""),
        query.scope.as_deref().unwrap_or(DEFAULT_SCOPE),
        None,
    ))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeForm {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: Option<String>,
    pub api_key: Option<String>,
}

/// `POST /oauth/authorize`
///
/// Validate the submitted API key and, on success, redirect back to the
/// integrator with a single-use code. Credential failures redirect with
/// `error=access_denied`; only pre-redirect parameter problems get a 400.
pub async fn handle_authorize_post(
    State(state): State<Arc<AppState>>,
    Form(form): Form<AuthorizeForm>,
) -> Response {
    let Some(client_id) = form.client_id.as_deref() else {
        return (StatusCode::BAD_REQUEST, "Missing client_id").into_response();
    };
    let Some(redirect_uri) = form.redirect_uri.as_deref() else {
        return (StatusCode::BAD_REQUEST, "Missing redirect_uri").into_response();
    };

    // The redirect target must be trusted before anything is sent to it.
    let Some(client) = state.oauth.get_client(client_id).await else {
        return (StatusCode::BAD_REQUEST, "Unknown client_id").into_response();
    };
    if !client.redirect_uris.iter().any(|u| u == redirect_uri) {
        return (StatusCode::BAD_REQUEST, "redirect_uri not registered for this client")
            .into_response();
    }

    let api_key = form.api_key.as_deref().unwrap_or("");
    let scope = form.scope.as_deref().unwrap_or(DEFAULT_SCOPE);

    match state.validator.validate(api_key).await {
        Ok(identity) => {
            let code = state
                .oauth
                .create_auth_code(
                    client_id.to_owned(),
                    redirect_uri.to_owned(),
                    form.code_challenge.filter(|c| !c.is_empty()),
                    form.code_challenge_method.filter(|m| !m.is_empty()),
                    scope.to_owned(),
                    api_key.to_owned(),
                )
                .await;

            tracing::info!(client_id = %client_id, subscriber = %identity.client_id, "Authorization approved");

            let mut params = vec![("code", code)];
            if let Some(oauth_state) = form.state.filter(|s| !s.is_empty()) {
                params.push(("state", oauth_state));
            }
            redirect_with(redirect_uri, &params)
        }
        Err(e) => {
            tracing::debug!(client_id = %client_id, error = %e, "Authorization denied");

            let mut params = vec![
                ("error", "access_denied".to_string()),
                ("error_description", e.to_string()),
            ];
            if let Some(oauth_state) = form.state.filter(|s| !s.is_empty()) {
                params.push(("state", oauth_state));
            }
            redirect_with(redirect_uri, &params)
        }
    }
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
    pub refresh_token: Option<String>,
}

/// `POST /oauth/token`
///
/// Exchange an authorization code for tokens, or rotate a refresh token.
pub async fn handle_token(
    State(state): State<Arc<AppState>>,
    Form(form): Form<TokenRequest>,
) -> Response {
    match form.grant_type.as_str() {
        "authorization_code" => handle_authorization_code_grant(&state.oauth, &form).await,
        "refresh_token" => handle_refresh_token_grant(&state.oauth, &form).await,
        _ => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "unsupported_grant_type"
            })),
        )
            .into_response(),
    }
}

async fn handle_authorization_code_grant(store: &OAuthStore, form: &TokenRequest) -> Response {
    let Some(ref code) = form.code else {
        return token_error("invalid_request", "Missing code");
    };
    let Some(ref redirect_uri) = form.redirect_uri else {
        return token_error("invalid_request", "Missing redirect_uri");
    };

    // One-time: the code is gone after this whether or not the rest passes.
    let Some(auth_code) = store.consume_auth_code(code).await else {
        return token_error("invalid_grant", "Invalid or expired code");
    };

    if *redirect_uri != auth_code.redirect_uri {
        return token_error("invalid_grant", "Redirect URI mismatch");
    }

    if let Some(ref challenge) = auth_code.code_challenge {
        let Some(ref verifier) = form.code_verifier else {
            return token_error("invalid_request", "Missing code_verifier");
        };
        if !pkce::verify(verifier, challenge, auth_code.code_challenge_method.as_deref()) {
            return token_error("invalid_grant", "Invalid code_verifier");
        }
    }

    let pair =
        store.create_token_pair(&auth_code.client_id, &auth_code.scope, &auth_code.api_key).await;

    tracing::info!(client_id = %auth_code.client_id, "Issued token pair");

    token_success(&pair)
}

async fn handle_refresh_token_grant(store: &OAuthStore, form: &TokenRequest) -> Response {
    let Some(ref refresh_token) = form.refresh_token else {
        return token_error("invalid_request", "Missing refresh_token");
    };

    match store.refresh_token_pair(refresh_token).await {
        Ok(pair) => {
            tracing::info!("Refreshed token pair");
            token_success(&pair)
        }
        Err(RefreshError::InvalidToken) => {
            token_error("invalid_grant", "Invalid or expired refresh token")
        }
        Err(RefreshError::MissingAccessToken) => {
            token_error("invalid_grant", "Associated access token not found")
        }
    }
}

/// Build a token response with required OAuth 2.0 cache headers (RFC 6749 §5.1).
fn token_success(pair: &TokenPair) -> Response {
    let mut response = Json(serde_json::json!({
        "access_token": pair.access_token,
        "token_type": "Bearer",
        "expires_in": pair.expires_in,
        "refresh_token": pair.refresh_token,
        "scope": pair.scope
    }))
    .into_response();

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

fn token_error(error: &str, description: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": error,
            "error_description": description
        })),
    )
        .into_response()
}

/// 302 redirect to `base` with the given query parameters appended.
fn redirect_with(base: &str, params: &[(&str, String)]) -> Response {
    let mut url = base.to_owned();
    let mut separator = if url.contains('?') { '&' } else { '?' };
    for (key, value) in params {
        url.push(separator);
        url.push_str(key);
        url.push('=');
        url.push_str(&url_encode(value));
        separator = '&';
    }
    (StatusCode::FOUND, [(header::LOCATION, url)]).into_response()
}

/// Percent-encode a string for use in URL query parameters.
fn url_encode(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_encode() {
        assert_eq!(url_encode("abc-123_~."), "abc-123_~.");
        assert_eq!(url_encode("a b&c"), "a%20b%26c");
        assert_eq!(url_encode("Subscription has expired."), "Subscription%20has%20expired.");
    }

    #[test]
    fn test_redirect_with_appends_to_existing_query() {
        let response = redirect_with("https://x/cb?keep=1", &[("code", "abc".to_string())]);
        let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert_eq!(location, "https://x/cb?keep=1&code=abc");
    }

    #[test]
    fn test_redirect_with_multiple_params() {
        let response = redirect_with(
            "https://x/cb",
            &[
                ("error", "access_denied".to_string()),
                ("error_description", "Invalid API key".to_string()),
            ],
        );
        let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert_eq!(location, "https://x/cb?error=access_denied&error_description=Invalid%20API%20key");
    }
}
