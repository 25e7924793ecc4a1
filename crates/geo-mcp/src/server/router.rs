//! HTTP request router.
//!
//! Dispatch table over (path, method): health and OAuth discovery documents
//! answer with no auth, OAuth endpoints go to the authorization engine, and
//! the `/mcp` protocol endpoint resolves auth through the dual-path chain
//! (OAuth access token first, raw API key fallback) before any message
//! reaches tool dispatch. The legacy `/sse` + `/message` pair is kept for
//! older clients; its `apiKey` query parameter is a compatibility fallback
//! and strictly less secure than the Authorization header.

use std::convert::Infallible;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use futures::stream::{self, Stream, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::jsonrpc::{JsonRpcRequest, JsonRpcResponse, codes};
use super::legacy::{LegacyRegistry, LegacyTransport};
use super::oauth::{OAuthStore, handlers as oauth_handlers};
use super::session::{Session, SessionRegistry};
use super::transport::{PushEvent, TransportError};
use crate::auth::{CredentialValidator, Identity, resolver::ResolverChain};
use crate::config::Config;
use crate::error::AuthError;
use crate::store::RecordStore;
use crate::tools::{McpTool, ToolContext};

const SESSION_ID_HEADER: &str = "Mcp-Session-Id";
const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";

/// Shared state for all HTTP handlers.
pub struct AppState {
    pub config: Config,
    pub oauth: OAuthStore,
    pub validator: CredentialValidator,
    pub resolver: ResolverChain,
    pub sessions: Arc<SessionRegistry>,
    pub legacy: Arc<LegacyRegistry>,
    pub store: Arc<dyn RecordStore>,
    pub tools: Vec<Box<dyn McpTool>>,
    pub register_limiter: DefaultDirectRateLimiter,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn RecordStore>, tools: Vec<Box<dyn McpTool>>) -> Self {
        let oauth = OAuthStore::new(&config);
        let validator = CredentialValidator::new(Arc::clone(&store));
        let resolver = ResolverChain::standard(oauth.clone(), validator.clone());
        let sessions = SessionRegistry::new(&config);
        let legacy = LegacyRegistry::new();

        let per_minute =
            NonZeroU32::new(config.registrations_per_minute).unwrap_or(NonZeroU32::MIN);
        let register_limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        Self { config, oauth, validator, resolver, sessions, legacy, store, tools, register_limiter }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").field("tools", &self.tools.len()).finish()
    }
}

/// Create the HTTP router and start the background sweep tasks.
pub fn create_router(state: Arc<AppState>) -> Router {
    Arc::clone(&state.sessions).start_sweep_task();
    state.oauth.start_cleanup_task();

    Router::new()
        .route("/", get(handle_health))
        .route("/health", get(handle_health))
        .route(
            "/.well-known/oauth-protected-resource",
            get(oauth_handlers::handle_protected_resource),
        )
        .route(
            "/.well-known/oauth-authorization-server",
            get(oauth_handlers::handle_auth_server_metadata),
        )
        .route("/oauth/register", axum::routing::post(oauth_handlers::handle_register))
        .route(
            "/oauth/authorize",
            get(oauth_handlers::handle_authorize_get)
                .post(oauth_handlers::handle_authorize_post),
        )
        .route("/oauth/token", axum::routing::post(oauth_handlers::handle_token))
        // Streamable HTTP transport: one endpoint, three methods
        .route(
            "/mcp",
            axum::routing::post(handle_mcp_post).get(handle_mcp_get).delete(handle_mcp_delete),
        )
        // Legacy HTTP+SSE transport
        .route("/sse", get(handle_sse))
        .route("/message", axum::routing::post(handle_message_post))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "transport": "streamable-http"
    }))
}

// ─── Auth helpers ────────────────────────────────────────────────────────────

fn bearer_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

/// 401 with the error taxonomy code; the bearer challenge header is added
/// for `initialize` so clients can discover the authorization flow.
fn unauthorized(state: &AppState, error: &AuthError, with_challenge: bool) -> Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": error.to_string(),
            "code": error.code()
        })),
    )
        .into_response();

    if with_challenge {
        let challenge =
            format!(r#"Bearer resource_metadata="{}""#, state.config.resource_metadata_url());
        if let Ok(value) = challenge.parse() {
            response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
    }
    response
}

// ─── Streamable HTTP transport ───────────────────────────────────────────────

async fn handle_mcp_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::error(None, codes::PARSE_ERROR, format!("Parse error: {e}"))),
            )
                .into_response();
        }
    };

    let is_initialize = request.method == "initialize";

    let identity = match bearer_from(&headers) {
        None => return unauthorized(&state, &AuthError::MissingCredential, is_initialize),
        Some(bearer) => match state.resolver.resolve(&bearer).await {
            Ok(identity) => identity,
            Err(e) => return unauthorized(&state, &e, is_initialize),
        },
    };

    let session_id = headers.get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok());

    let session = match session_id {
        Some(id) => {
            let Some(session) = state.sessions.get(id).await else {
                return (
                    StatusCode::NOT_FOUND,
                    Json(JsonRpcResponse::error(None, codes::INVALID_REQUEST, "Session not found")),
                )
                    .into_response();
            };
            // Once a session exists, every call must declare the protocol
            // version it was negotiated under.
            if !headers.contains_key(PROTOCOL_VERSION_HEADER) {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(JsonRpcResponse::error(
                        request.id,
                        codes::INVALID_REQUEST,
                        "MCP-Protocol-Version header is required",
                    )),
                )
                    .into_response();
            }
            session
        }
        None => {
            if !is_initialize {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(JsonRpcResponse::error(
                        request.id,
                        codes::INVALID_REQUEST,
                        "No valid session ID provided",
                    )),
                )
                    .into_response();
            }
            state.sessions.create(identity.clone()).await
        }
    };

    let mut response = handle_protocol_message(&state, &session, identity, request).await;
    if let Ok(value) = session.id.parse() {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    response
}

/// Run one JSON-RPC message through the transport: notifications are
/// acknowledged with 202, requests park on the correlation wait while
/// dispatch runs concurrently.
async fn handle_protocol_message(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    identity: Identity,
    request: JsonRpcRequest,
) -> Response {
    let Some(id) = request.id.clone() else {
        let state = Arc::clone(state);
        tokio::spawn(async move {
            dispatch_message(&state, identity, request).await;
        });
        return StatusCode::ACCEPTED.into_response();
    };

    session.transport.expect_reply(&id).await;

    {
        let state = Arc::clone(state);
        let transport = Arc::clone(&session.transport);
        let request = request.clone();
        tokio::spawn(async move {
            if let Some(reply) = dispatch_message(&state, identity, request).await {
                match serde_json::to_value(&reply) {
                    Ok(value) => transport.send(value).await,
                    Err(e) => tracing::error!(error = %e, "Failed to serialize reply"),
                }
            }
        });
    }

    match session.transport.wait_for_reply(&id).await {
        Ok(reply) => Json(reply).into_response(),
        Err(TransportError::ReplyTimeout) => {
            tracing::warn!(session_id = %session.id, method = %request.method, "Reply timed out");
            (StatusCode::GATEWAY_TIMEOUT, Json(serde_json::json!({"error": "Response timeout"})))
                .into_response()
        }
        Err(TransportError::Closed) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "Session closed"})),
        )
            .into_response(),
    }
}

async fn handle_mcp_get(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = headers.get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, "Mcp-Session-Id header is required").into_response();
    };

    let Some(session) = state.sessions.get(session_id).await else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "Session not found"})))
            .into_response();
    };

    tracing::info!(session_id = %session.id, "Opened push channel");

    let (tx, rx) = mpsc::unbounded_channel();
    session.transport.attach_push_channel(tx).await;

    let stream = UnboundedReceiverStream::new(rx).map(|event| to_sse_event(&event));

    sse_response(stream).into_response()
}

async fn handle_mcp_delete(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = headers.get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, "Mcp-Session-Id header is required").into_response();
    };

    if state.sessions.delete(session_id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "Session not found"})))
            .into_response()
    }
}

fn to_sse_event(event: &PushEvent) -> Result<Event, Infallible> {
    Ok(Event::default().id(event.id.to_string()).event("message").data(event.payload.to_string()))
}

fn sse_response<S>(stream: S) -> impl IntoResponse
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    (
        [
            ("X-Accel-Buffering", "no"),
            ("Cache-Control", "no-cache, no-store, must-revalidate"),
        ],
        Sse::new(stream)
            .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping")),
    )
}

// ─── Legacy HTTP+SSE transport ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SseQuery {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn handle_sse(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SseQuery>,
) -> Response {
    // Header first; the query parameter is a legacy fallback.
    let Some(bearer) = bearer_from(&headers).or(query.api_key) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": AuthError::MissingCredential.to_string()})),
        )
            .into_response();
    };

    let identity = match state.resolver.resolve(&bearer).await {
        Ok(identity) => identity,
        Err(e) => {
            return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": e.to_string()})))
                .into_response();
        }
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = Arc::new(LegacyTransport::new(session_id.clone(), identity, tx.clone()));
    state.legacy.register(Arc::clone(&transport)).await;

    tracing::info!(session_id = %session_id, "Opened legacy SSE connection");

    // Drop the registry entry when the client goes away.
    {
        let legacy = Arc::clone(&state.legacy);
        let session_id = session_id.clone();
        tokio::spawn(async move {
            tx.closed().await;
            legacy.remove(&session_id).await;
        });
    }

    // The first event announces where to POST messages for this stream.
    let endpoint =
        format!("{}/message?sessionId={}", state.config.base_url, session_id);
    let initial = stream::once(async move {
        Ok::<_, Infallible>(Event::default().id("0").event("endpoint").data(endpoint))
    });

    let live = UnboundedReceiverStream::new(rx).map(|event| to_sse_event(&event));

    sse_response(initial.chain(live)).into_response()
}

async fn handle_message_post(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let Some(session_id) = query.session_id else {
        return (StatusCode::BAD_REQUEST, "Missing sessionId").into_response();
    };

    let Some(transport) = state.legacy.get(&session_id).await else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "Session not found"})))
            .into_response();
    };

    let mut messages = transport.feed(&body);
    if !body.ends_with('\n') {
        // A POST body is a complete chunk; flush any trailing line.
        messages.extend(transport.feed("\n"));
    }

    for message in messages {
        let request: JsonRpcRequest = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Ignoring non-request message");
                continue;
            }
        };

        let state = Arc::clone(&state);
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            let identity = transport.identity.clone();
            if let Some(reply) = dispatch_message(&state, identity, request).await {
                match serde_json::to_value(&reply) {
                    Ok(value) => transport.push(value),
                    Err(e) => tracing::error!(error = %e, "Failed to serialize reply"),
                }
            }
        });
    }

    StatusCode::ACCEPTED.into_response()
}

// ─── JSON-RPC dispatch ───────────────────────────────────────────────────────

/// Dispatch one protocol message. Returns `None` for notifications.
async fn dispatch_message(
    state: &AppState,
    identity: Identity,
    request: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    tracing::debug!(method = %request.method, "Dispatching protocol message");

    let response = match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(request.id, initialize_result(&request.params)),
        "ping" => JsonRpcResponse::success(request.id, serde_json::json!({})),
        "tools/list" => tools_list(request.id, &state.tools),
        "tools/call" => tools_call(state, identity, request.id, &request.params).await,
        method if method.starts_with("notifications/") => return None,
        method => {
            if request.id.is_none() {
                return None;
            }
            JsonRpcResponse::error(
                request.id,
                codes::METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            )
        }
    };

    // A notification never gets a reply, whatever the method was.
    response.id.as_ref()?;
    Some(response)
}

fn initialize_result(params: &serde_json::Value) -> serde_json::Value {
    let protocol_version =
        params.get("protocolVersion").and_then(|v| v.as_str()).unwrap_or("2024-11-05");

    serde_json::json!({
        "protocolVersion": protocol_version,
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        },
        "serverInfo": {
            "name": "geo-mcp",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn tools_list(id: Option<serde_json::Value>, tools: &[Box<dyn McpTool>]) -> JsonRpcResponse {
    let tool_list: Vec<serde_json::Value> = tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "name": t.name(),
                "description": t.description(),
                "inputSchema": t.input_schema()
            })
        })
        .collect();

    JsonRpcResponse::success(id, serde_json::json!({ "tools": tool_list }))
}

async fn tools_call(
    state: &AppState,
    identity: Identity,
    id: Option<serde_json::Value>,
    params: &serde_json::Value,
) -> JsonRpcResponse {
    let Some(tool_name) = params.get("name").and_then(|v| v.as_str()) else {
        return JsonRpcResponse::error(id, codes::INVALID_PARAMS, "Missing 'name' parameter");
    };

    let arguments = params.get("arguments").cloned().unwrap_or(serde_json::json!({}));

    let Some(tool) = state.tools.iter().find(|t| t.name() == tool_name) else {
        return JsonRpcResponse::error(
            id,
            codes::INVALID_PARAMS,
            format!("Tool not found: {tool_name}"),
        );
    };

    tracing::info!(tool = %tool_name, client_id = %identity.client_id, "Executing tool");

    let ctx = ToolContext::new(Arc::clone(&state.store), identity);
    match tool.execute(&ctx, arguments).await {
        Ok(result) => JsonRpcResponse::success(
            id,
            serde_json::json!({
                "content": [{
                    "type": "text",
                    "text": result
                }]
            }),
        ),
        Err(e) => {
            tracing::error!(tool = %tool_name, error = %e, "Tool execution failed");
            JsonRpcResponse::success(
                id,
                serde_json::json!({
                    "content": [{
                        "type": "text",
                        "text": e.to_user_message()
                    }],
                    "isError": true
                }),
            )
        }
    }
}
