//! HTTP routes
//!
//! - `POST /mcp` - the MCP entry point (thin JSON-RPC boundary over
//!   initialize / tools/list / tools/call; transport framing beyond that
//!   is not this server's concern)
//! - `DELETE /mcp` - transport-session termination; revokes the session's
//!   cached delegation tokens
//! - `GET /.well-known/oauth-authorization-server` - RFC 8414 mirror
//! - `GET /.well-known/oauth-protected-resource` - RFC 9728 document
//! - `GET /healthz` - delegation module health aggregate
//!
//! Every successful `/mcp` response carries `Mcp-Session-Id`: minted on
//! the first request, echoed by the client afterwards, consumed as the
//! exchange-cache scoping key.

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::dispatcher::LLMResponse;
use crate::metadata::{authorization_server_metadata, protected_resource_metadata};
use crate::middleware::{MCP_SESSION_ID, auth_error_response, authenticate_request};
use crate::state::AppState;

/// Build the gateway router with CORS per the MCP transport contract.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::HeaderName::from_static("mcp-session-id"),
            header::HeaderName::from_static("last-event-id"),
        ])
        .expose_headers([
            header::HeaderName::from_static("mcp-session-id"),
            header::WWW_AUTHENTICATE,
        ]);

    Router::new()
        .route("/mcp", post(mcp_post).delete(mcp_delete))
        .route(
            "/.well-known/oauth-authorization-server",
            get(authorization_server),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(protected_resource),
        )
        .route("/healthz", get(healthz))
        .layer(cors)
        .with_state(state)
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message.into() } })
}

async fn mcp_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    // Rate limit before authentication so floods of bad tokens never
    // reach the JWKS or exchange paths. Keyed by transport session, with
    // the raw Authorization value as fallback for first requests.
    if let Some(limiter) = &state.limiter {
        let key = headers
            .get(MCP_SESSION_ID)
            .or_else(|| headers.get(header::AUTHORIZATION))
            .and_then(|value| value.to_str().ok())
            .unwrap_or("anonymous");
        if !limiter.check(key) {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(json!({
                    "status": "failure",
                    "code": "RATE_LIMITED",
                    "message": "Too many requests",
                })),
            )
                .into_response();
        }
    }

    let authenticated = match authenticate_request(&state, &headers).await {
        Ok(authenticated) => authenticated,
        Err(error) => return auth_error_response(&error, &state.server_url),
    };

    let request: Value = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(_) => {
            let body = rpc_error(Value::Null, -32700, "Parse error");
            return with_session_header(
                (StatusCode::BAD_REQUEST, axum::Json(body)).into_response(),
                &authenticated.context.mcp_session_id,
            );
        }
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default();
    debug!(method, session_id = %authenticated.context.mcp_session_id, "mcp request");

    let payload = match method {
        "initialize" => rpc_result(
            id,
            json!({
                "protocolVersion": "2025-06-18",
                "serverInfo": {
                    "name": state.core.config.mcp.server_name,
                    "version": state.core.config.mcp.version,
                },
                "capabilities": { "tools": { "listChanged": false } },
            }),
        ),
        "notifications/initialized" => rpc_result(id, json!({})),
        "ping" => rpc_result(id, json!({})),
        "tools/list" => rpc_result(
            id,
            json!({ "tools": state.tools.list(&authenticated.context) }),
        ),
        "tools/call" => {
            let name = request
                .get("params")
                .and_then(|params| params.get("name"))
                .and_then(Value::as_str);
            match name {
                Some(name) => {
                    let arguments = request
                        .get("params")
                        .and_then(|params| params.get("arguments"))
                        .cloned()
                        .unwrap_or_else(|| json!({}));
                    let result: LLMResponse = state
                        .tools
                        .call(name, arguments, authenticated.context.clone())
                        .await;
                    rpc_result(
                        id,
                        serde_json::to_value(result).unwrap_or_else(|_| {
                            json!({"status": "failure", "code": "SERVER_ERROR",
                                   "message": "An internal processing error occurred."})
                        }),
                    )
                }
                None => rpc_error(id, -32602, "Invalid params: missing tool name"),
            }
        }
        "" => rpc_error(id, -32600, "Invalid Request"),
        other => rpc_error(id, -32601, format!("Method not found: {other}")),
    };

    with_session_header(
        (StatusCode::OK, axum::Json(payload)).into_response(),
        &authenticated.context.mcp_session_id,
    )
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(MCP_SESSION_ID, value);
    }
    response
}

/// Transport-session termination: the primary cache revocation path.
async fn mcp_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = headers.get(MCP_SESSION_ID).and_then(|v| v.to_str().ok()) else {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({
                "status": "failure",
                "code": "INVALID_SESSION_ID",
                "message": "Missing Mcp-Session-Id header",
            })),
        )
            .into_response();
    };

    if let Some(cache) = &state.core.token_cache {
        let cleared = cache.clear_session(session_id);
        debug!(session_id, cleared, "transport session terminated");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn authorization_server(State(state): State<AppState>) -> Response {
    let doc = authorization_server_metadata(state.core.idp_registry.primary());
    axum::Json(doc).into_response()
}

async fn protected_resource(State(state): State<AppState>) -> Response {
    let scopes = state.delegation.scopes_supported().await;
    let doc = protected_resource_metadata(&state.server_url, &state.core.idp_registry, scopes);
    axum::Json(doc).into_response()
}

async fn healthz(State(state): State<AppState>) -> Response {
    let modules = state.delegation.aggregate_health().await;
    let healthy = modules.values().all(|ok| *ok);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        axum::Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "modules": modules,
        })),
    )
        .into_response()
}
