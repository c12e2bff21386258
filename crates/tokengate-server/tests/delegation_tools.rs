//! Tools that delegate to backend modules through the registry.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{TestGateway, body_json};
use serde_json::{Value, json};

use tokengate_core::audit::AuditEntry;
use tokengate_core::authz;
use tokengate_core::session::UserSession;
use tokengate_delegation::{DelegationError, DelegationModule, DelegationResult};
use tokengate_server::dispatcher::{LLMResponse, ToolRegistration, delegation_response, handler};

/// A fake SQL module: succeeds for admins and users, reports row counts.
#[derive(Debug)]
struct FakeSqlModule;

#[async_trait]
impl DelegationModule for FakeSqlModule {
    fn name(&self) -> &str {
        "sql"
    }

    fn module_type(&self) -> &str {
        "sql"
    }

    async fn initialize(&self, _config: &Value) -> Result<(), DelegationError> {
        Ok(())
    }

    async fn delegate(
        &self,
        session: &UserSession,
        action: &str,
        _params: &Value,
    ) -> DelegationResult {
        if action == "query" {
            DelegationResult::ok(
                json!({ "rows": 2, "asUser": session.legacy_username }),
                AuditEntry::new("delegation:sql", action, true)
                    .with_user(session.user_id.clone()),
            )
        } else {
            DelegationResult::fail(
                format!("Unsupported action '{action}'"),
                AuditEntry::new("delegation:sql", action, false)
                    .with_user(session.user_id.clone()),
            )
        }
    }

    fn validate_access(&self, session: &UserSession) -> bool {
        authz::has_any_role(session, &["admin", "user"])
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn destroy(&self) {}

    fn scopes(&self) -> Vec<String> {
        vec!["sql:execute".into()]
    }
}

async fn gateway_with_sql_tool() -> TestGateway {
    let gateway = TestGateway::start(true).await;
    gateway
        .state
        .delegation
        .register(Arc::new(FakeSqlModule))
        .await
        .unwrap();
    gateway.state.tools.register(
        ToolRegistration::new(
            "run-query",
            "Run a read-only query as the caller",
            json!({"type": "object", "properties": {"action": {"type": "string"}}}),
            handler(|params, context| async move {
                authz::require_auth(&context.session)?;
                let action = params
                    .get("action")
                    .and_then(Value::as_str)
                    .unwrap_or("query")
                    .to_string();
                let result = context
                    .delegation
                    .delegate("sql", &context.session, &action, &params)
                    .await;
                Ok(delegation_response(result))
            }),
        )
        .with_access_check(|context| authz::has_any_role(&context.session, &["admin", "user"])),
    );
    gateway
}

#[tokio::test]
async fn delegated_query_runs_under_exchanged_identity() {
    let gateway = gateway_with_sql_tool().await;
    let token = gateway.token(&["app-user"]);

    let response = gateway
        .mcp_post(
            Some(&token),
            None,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": { "name": "run-query", "arguments": { "action": "query" } },
            }),
        )
        .await;
    let body = body_json(response).await;
    assert_eq!(body["result"]["status"], "success");
    // The legacy identity comes from the TE-JWT's legacy_name claim.
    assert_eq!(body["result"]["data"]["asUser"], "DOMAIN\\alice");
}

#[tokio::test]
async fn failed_delegation_surfaces_delegation_error() {
    let gateway = gateway_with_sql_tool().await;
    let token = gateway.token(&["app-user"]);

    let response = gateway
        .mcp_post(
            Some(&token),
            None,
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": { "name": "run-query", "arguments": { "action": "drop-table" } },
            }),
        )
        .await;
    let body = body_json(response).await;
    assert_eq!(body["result"]["status"], "failure");
    assert_eq!(body["result"]["code"], "DELEGATION_ERROR");
}

#[tokio::test]
async fn module_scopes_reach_protected_resource_metadata() {
    let gateway = gateway_with_sql_tool().await;
    let response = gateway
        .request(
            axum::http::Request::builder()
                .uri("/.well-known/oauth-protected-resource")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
    let doc = body_json(response).await;
    assert_eq!(doc["scopes_supported"], json!(["sql:execute"]));
}

#[tokio::test]
async fn delegation_tool_hidden_from_guests() {
    let gateway = gateway_with_sql_tool().await;

    let list = |token: String| {
        let gateway = &gateway;
        async move {
            let response = gateway
                .mcp_post(
                    Some(&token),
                    None,
                    json!({ "jsonrpc": "2.0", "id": 3, "method": "tools/list" }),
                )
                .await;
            let body = body_json(response).await;
            body["result"]["tools"]
                .as_array()
                .unwrap()
                .iter()
                .map(|tool| tool["name"].as_str().unwrap().to_string())
                .collect::<Vec<_>>()
        }
    };

    let user_tools = list(gateway.token(&["app-user"])).await;
    assert!(user_tools.contains(&"run-query".to_string()));

    // Guests never see the tool, and calling it anyway refuses without
    // executing.
    let guest_tools = list(gateway.token(&["viewer"])).await;
    assert!(!guest_tools.contains(&"run-query".to_string()));
    assert!(guest_tools.contains(&"whoami".to_string()));

    let response = gateway
        .mcp_post(
            Some(&gateway.token(&["viewer"])),
            None,
            json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": { "name": "run-query", "arguments": {} },
            }),
        )
        .await;
    let body = body_json(response).await;
    assert_eq!(body["result"]["status"], "failure");
    assert_eq!(body["result"]["code"], "INSUFFICIENT_PERMISSIONS");
}

/// Dispatch test module used by the LLM response mapping check.
#[test]
fn delegation_response_mapping() {
    let ok = DelegationResult::ok(
        json!({"rows": 1}),
        AuditEntry::new("delegation:sql", "query", true),
    );
    assert_eq!(
        delegation_response(ok),
        LLMResponse::success(json!({"rows": 1}))
    );

    let fail: DelegationResult = DelegationResult::fail(
        "backend refused",
        AuditEntry::new("delegation:sql", "query", false),
    );
    let LLMResponse::Failure { code, message } = delegation_response(fail) else {
        panic!("expected failure");
    };
    assert_eq!(code, "DELEGATION_ERROR");
    assert_eq!(message, "backend refused");
}
