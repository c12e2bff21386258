//! Tool dispatcher with two-tier authorization
//!
//! Each registered tool carries an optional visibility check and a
//! handler. Enforcement is two-tier:
//!
//! 1. **Visibility** - the access check filters `tools/list`, and a call
//!    to an invisible tool returns `INSUFFICIENT_PERMISSIONS` without the
//!    handler ever running.
//! 2. **Execution** - handlers perform hard checks (`require_*`) inline;
//!    anything they raise is caught at the dispatcher edge.
//!
//! Error masking: auth errors become coded failure responses; every other
//! error is audited in full (with `sql`/`params` fields redacted) and
//! surfaced as a generic `SERVER_ERROR`. Stack traces, file paths, and
//! SQL text never reach the client.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, warn};

use tokengate_core::audit::{AuditEntry, AuditService, actions};
use tokengate_core::error::AuthError;
use tokengate_delegation::DelegationResult;

use crate::middleware::McpContext;

/// Tool result delivered to the LLM: a tagged union on `status`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LLMResponse {
    /// The tool ran and produced data
    Success {
        /// Tool output
        data: Value,
    },
    /// The tool did not produce data
    Failure {
        /// Stable machine-readable code
        code: String,
        /// Human-readable, non-leaky message
        message: String,
    },
}

impl LLMResponse {
    /// A success response.
    pub fn success(data: Value) -> Self {
        Self::Success { data }
    }

    /// A failure response.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Map a delegation result onto the LLM failure contract.
pub fn delegation_response(result: DelegationResult) -> LLMResponse {
    if result.success {
        LLMResponse::success(result.data.unwrap_or(Value::Null))
    } else {
        LLMResponse::failure(
            "DELEGATION_ERROR",
            result
                .error
                .unwrap_or_else(|| "Delegation failed".to_string()),
        )
    }
}

/// Visibility check: sees the context, returns whether the tool exists
/// for this caller.
pub type AccessCheck = Arc<dyn Fn(&McpContext) -> bool + Send + Sync>;

type HandlerFuture = Pin<Box<dyn Future<Output = Result<LLMResponse, AuthError>> + Send>>;

/// Tool handler: params + context in, response or error out.
pub type ToolHandler = Arc<dyn Fn(Value, McpContext) -> HandlerFuture + Send + Sync>;

/// Box an async closure into a [`ToolHandler`].
pub fn handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(Value, McpContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<LLMResponse, AuthError>> + Send + 'static,
{
    Arc::new(move |params, context| Box::pin(f(params, context)))
}

/// One registered tool.
#[derive(Clone)]
pub struct ToolRegistration {
    /// Tool name (dispatch key)
    pub name: String,
    /// One-line description for `tools/list`
    pub description: String,
    /// JSON schema of the tool parameters
    pub schema: Value,
    /// Visibility tier; `None` means visible to every authenticated session
    pub access_check: Option<AccessCheck>,
    /// Execution tier
    pub handler: ToolHandler,
}

impl std::fmt::Debug for ToolRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistration")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("has_access_check", &self.access_check.is_some())
            .finish()
    }
}

impl ToolRegistration {
    /// Create a registration without a visibility check.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            access_check: None,
            handler,
        }
    }

    /// Attach a visibility check.
    pub fn with_access_check(
        mut self,
        check: impl Fn(&McpContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.access_check = Some(Arc::new(check));
        self
    }

    fn visible_to(&self, context: &McpContext) -> bool {
        self.access_check
            .as_ref()
            .is_none_or(|check| check(context))
    }
}

/// The tool dispatcher.
#[derive(Debug)]
pub struct ToolDispatcher {
    tools: parking_lot::RwLock<Vec<ToolRegistration>>,
    audit: AuditService,
}

impl ToolDispatcher {
    /// Create an empty dispatcher.
    pub fn new(audit: AuditService) -> Self {
        Self {
            tools: parking_lot::RwLock::new(Vec::new()),
            audit,
        }
    }

    /// Register a tool. Returns false (and registers nothing) when the
    /// name is taken.
    pub fn register(&self, registration: ToolRegistration) -> bool {
        let mut tools = self.tools.write();
        if tools.iter().any(|t| t.name == registration.name) {
            warn!(tool = %registration.name, "duplicate tool registration ignored");
            return false;
        }
        tools.push(registration);
        true
    }

    /// Tool descriptors visible to this context, in registration order.
    pub fn list(&self, context: &McpContext) -> Vec<Value> {
        self.tools
            .read()
            .iter()
            .filter(|tool| tool.visible_to(context))
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.schema,
                })
            })
            .collect()
    }

    /// Dispatch a call. Never errors: every outcome is an [`LLMResponse`].
    pub async fn call(&self, name: &str, params: Value, context: McpContext) -> LLMResponse {
        let tool = {
            let tools = self.tools.read();
            tools.iter().find(|tool| tool.name == name).cloned()
        };

        let Some(tool) = tool else {
            return LLMResponse::failure("TOOL_NOT_FOUND", format!("Unknown tool '{name}'"));
        };

        // Visibility tier: an invisible tool behaves as if it refused.
        if !tool.visible_to(&context) {
            self.audit.record(
                AuditEntry::new("mcp:dispatcher", "tool_call", false)
                    .with_user(context.session.user_id.clone())
                    .with_reason("visibility check refused the call")
                    .with_metadata("tool", json!(name)),
            );
            return LLMResponse::failure(
                "INSUFFICIENT_PERMISSIONS",
                "Unauthorized: Insufficient permissions",
            );
        }

        // Execution tier: the handler's hard checks surface here.
        match (tool.handler)(params.clone(), context.clone()).await {
            Ok(response) => response,
            Err(err) if !matches!(err, AuthError::Internal(_) | AuthError::Configuration { .. }) => {
                self.audit.record(
                    AuditEntry::new("mcp:dispatcher", "tool_call", false)
                        .with_user(context.session.user_id.clone())
                        .with_reason(err.to_string())
                        .with_metadata("tool", json!(name)),
                );
                LLMResponse::failure(err.code(), err.user_message())
            }
            Err(err) => {
                // Unexpected fault: full detail to audit, generic to client.
                error!(tool = %name, error = %err, "tool handler failed");
                self.audit.record(
                    AuditEntry::new("mcp:dispatcher", actions::TOOL_HANDLER_ERROR, false)
                        .with_user(context.session.user_id.clone())
                        .with_error(err.to_string())
                        .with_metadata("tool", json!(name))
                        .with_metadata("params", sanitize_params(params)),
                );
                LLMResponse::failure("SERVER_ERROR", "An internal processing error occurred.")
            }
        }
    }
}

/// Redact `sql` and `params` fields anywhere in the value tree before the
/// value reaches the audit stream.
fn sanitize_params(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, inner)| {
                    if key == "sql" || key == "params" {
                        (key, Value::String("[REDACTED]".into()))
                    } else {
                        (key, sanitize_params(inner))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_params).collect()),
        other => other,
    }
}
