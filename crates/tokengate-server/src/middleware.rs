//! Authentication middleware for the MCP HTTP surface
//!
//! Adapts an inbound request to the core authentication service:
//! extracts the bearer token, authenticates, applies the dual rejection
//! check, and maps failures onto the HTTP contract - 401 with a
//! mandatory `WWW-Authenticate` header for crypto/time/exchange
//! failures, 403 without it for policy rejections.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use tokengate_core::error::{AuthError, AuthResult};
use tokengate_core::session::UserSession;
use tokengate_delegation::DelegationRegistry;

use crate::metadata::www_authenticate;
use crate::state::AppState;

/// Transport session header (MCP streamable HTTP).
pub const MCP_SESSION_ID: &str = "mcp-session-id";

/// Per-request context handed to tool handlers.
#[derive(Debug, Clone)]
pub struct McpContext {
    /// The authenticated session
    pub session: Arc<UserSession>,
    /// Transport session id (UUIDv4); scopes the exchange cache
    pub mcp_session_id: String,
    /// Delegation dispatch for handlers
    pub delegation: Arc<DelegationRegistry>,
}

/// Outcome of the middleware: a context plus whether the transport
/// session id was generated on this request (and must be echoed back).
#[derive(Debug)]
pub struct AuthenticatedRequest {
    /// Context for dispatch
    pub context: McpContext,
    /// True when the server minted the session id on this request
    pub fresh_session: bool,
}

/// Extract the bearer token from `Authorization`.
///
/// # Errors
///
/// [`AuthError::MissingToken`] when the header is absent or not a
/// `Bearer` scheme.
pub fn extract_bearer(headers: &HeaderMap) -> AuthResult<String> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
            Ok(token.to_string())
        }
        _ => Err(AuthError::MissingToken),
    }
}

/// Resolve the transport session id: echo a valid UUIDv4 from the
/// request, otherwise mint a fresh one.
pub fn resolve_session_id(headers: &HeaderMap) -> (String, bool) {
    let echoed = headers
        .get(MCP_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .filter(|id| id.get_version_num() == 4);
    match echoed {
        Some(id) => (id.to_string(), false),
        None => (Uuid::new_v4().to_string(), true),
    }
}

/// Authenticate an inbound request.
///
/// # Errors
///
/// An [`AuthError`] ready for [`auth_error_response`]: `MissingToken` and
/// validation failures map to 401, the dual rejection check maps to 403.
pub async fn authenticate_request(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AuthenticatedRequest, AuthError> {
    let (mcp_session_id, fresh_session) = resolve_session_id(headers);
    let token = extract_bearer(headers)?;

    let result = state
        .core
        .auth_service
        .authenticate(&token, Some(&mcp_session_id))
        .await?;

    // Dual rejection check: the result flag AND the session bit. Either
    // one tripping fails closed.
    if result.rejected || result.session.rejected {
        debug!(
            user_id = %result.session.user_id,
            reason = ?result.rejection_reason,
            "session rejected"
        );
        return Err(AuthError::UnassignedRole);
    }

    Ok(AuthenticatedRequest {
        context: McpContext {
            session: Arc::new(result.session),
            mcp_session_id,
            delegation: Arc::clone(&state.delegation),
        },
        fresh_session,
    })
}

/// Map an [`AuthError`] onto the HTTP contract.
///
/// 401 responses carry `WWW-Authenticate` and a JSON-RPC error envelope;
/// 403 responses carry the LLM failure shape and no `WWW-Authenticate`.
pub fn auth_error_response(error: &AuthError, server_url: &str) -> Response {
    let status = error.http_status();
    match status {
        StatusCode::UNAUTHORIZED => {
            let body = json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": { "code": -32000, "message": error.user_message() },
            });
            let mut response = (status, axum::Json(body)).into_response();
            if let Ok(value) = HeaderValue::from_str(&www_authenticate(server_url)) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
            response
        }
        StatusCode::FORBIDDEN => {
            let body = json!({
                "status": "failure",
                "code": error.code(),
                "message": error.user_message(),
            });
            (status, axum::Json(body)).into_response()
        }
        _ => {
            let body = json!({
                "status": "failure",
                "code": error.code(),
                "message": error.user_message(),
            });
            (status, axum::Json(body)).into_response()
        }
    }
}
