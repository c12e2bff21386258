//! Authentication pipeline: validate → map → exchange → session.

mod common;

use std::sync::Arc;

use common::MockIdp;
use serde_json::json;
use uuid::Uuid;

use tokengate_core::audit::{AuditService, AuditSink, MemoryAuditSink, actions};
use tokengate_core::cache::TokenCache;
use tokengate_core::error::AuthError;
use tokengate_core::exchange::TokenExchangeService;
use tokengate_core::idp::IdpRegistry;
use tokengate_core::roles::Role;
use tokengate_core::service::AuthenticationService;

const AUDIENCE: &str = "mcp-oauth";
const DELEGATION_AUD: &str = "urn:sql:database";

fn build_service(
    config: tokengate_core::config::IdpConfig,
    with_exchange: bool,
) -> (AuthenticationService, Arc<MemoryAuditSink>) {
    let sink = Arc::new(MemoryAuditSink::new(256));
    let audit = AuditService::new(sink.clone() as Arc<dyn AuditSink>, 256);
    let registry = Arc::new(IdpRegistry::from_config(vec![config]).unwrap());
    let exchange = with_exchange.then(|| {
        let cache = Arc::new(TokenCache::new(Default::default(), audit.clone()));
        Arc::new(TokenExchangeService::new(Some(cache), audit.clone()).unwrap())
    });
    (
        AuthenticationService::new(registry, exchange, audit),
        sink,
    )
}

#[tokio::test]
async fn happy_path_user_role() {
    let idp = MockIdp::start().await;
    let (service, _) = build_service(idp.idp_config(AUDIENCE), false);

    let token = idp.sign(&idp.claims(AUDIENCE, &["app-user"]));
    let result = service.authenticate(&token, None).await.unwrap();

    assert!(!result.rejected);
    assert_eq!(result.session.role, Role::User);
    assert_eq!(result.session.username, "alice");
    assert_eq!(result.session.session_id.get_version_num(), 4);
    assert!(result.session.rejected == result.rejected);
}

#[tokio::test]
async fn unassigned_role_rejected_not_error() {
    let idp = MockIdp::start().await;
    let (service, sink) = build_service(idp.idp_config(AUDIENCE), false);

    let token = idp.sign(&idp.claims(AUDIENCE, &["billing"]));
    let result = service.authenticate(&token, None).await.unwrap();

    assert!(result.rejected);
    assert!(result.session.rejected);
    assert_eq!(result.session.role, Role::Unassigned);
    assert!(
        result
            .rejection_reason
            .as_deref()
            .unwrap()
            .contains("unassigned")
    );

    // Audit: source auth:service, failure, reason mentions unassigned.
    for _ in 0..50 {
        if !sink.is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    let entries = sink.snapshot();
    let entry = entries
        .iter()
        .find(|e| e.source == "auth:service" && e.action == actions::AUTHENTICATION_FAILURE)
        .expect("rejection audit entry");
    assert!(!entry.success);
    assert!(entry.reason.as_deref().unwrap().contains("unassigned"));
}

#[tokio::test]
async fn expired_token_propagates_as_error() {
    let idp = MockIdp::start().await;
    let (service, _) = build_service(idp.idp_config(AUDIENCE), false);

    let now = chrono::Utc::now().timestamp();
    let mut claims = idp.claims(AUDIENCE, &["app-user"]);
    claims["exp"] = json!(now - 300);
    claims["iat"] = json!(now - 900);
    let token = idp.sign(&claims);

    let result = service.authenticate(&token, None).await;
    assert!(matches!(result, Err(AuthError::TokenExpired)));
}

#[tokio::test]
async fn exchange_happens_before_session_and_sets_legacy_name() {
    let idp = MockIdp::start().await;
    idp.mount_token_exchange(&idp.te_claims(DELEGATION_AUD), Some(1)).await;
    let config = idp.idp_config_with_exchange(AUDIENCE, DELEGATION_AUD, Some("legacy_name"));
    let (service, _) = build_service(config, true);

    let token = idp.sign(&idp.claims(AUDIENCE, &["app-user"]));
    let session_id = Uuid::new_v4().to_string();
    let result = service.authenticate(&token, Some(&session_id)).await.unwrap();

    assert!(!result.rejected);
    assert_eq!(
        result.session.legacy_username.as_deref(),
        Some("DOMAIN\\alice")
    );
    assert!(result.session.delegation_token.is_some());
    assert!(result.session.custom_claims.is_some());
}

#[tokio::test]
async fn roles_remapped_from_exchanged_token() {
    let idp = MockIdp::start().await;
    // The TE-JWT downgrades the caller: requestor claims admin, exchange
    // ratifies only app-user. Authority follows the exchanged token.
    let mut te_claims = idp.te_claims(DELEGATION_AUD);
    te_claims["roles"] = json!(["app-user"]);
    idp.mount_token_exchange(&te_claims, None).await;

    let mut config = idp.idp_config_with_exchange(AUDIENCE, DELEGATION_AUD, None);
    config.role_mappings.admin = vec!["sys-admin".into()];
    let (service, _) = build_service(config, true);

    let token = idp.sign(&idp.claims(AUDIENCE, &["sys-admin"]));
    let session_id = Uuid::new_v4().to_string();
    let result = service.authenticate(&token, Some(&session_id)).await.unwrap();

    assert_eq!(result.session.role, Role::User);
}

#[tokio::test]
async fn missing_required_claim_fails_authentication() {
    let idp = MockIdp::start().await;
    let mut te_claims = idp.te_claims(DELEGATION_AUD);
    te_claims.as_object_mut().unwrap().remove("legacy_name");
    idp.mount_token_exchange(&te_claims, None).await;

    let config = idp.idp_config_with_exchange(AUDIENCE, DELEGATION_AUD, Some("legacy_name"));
    let (service, _) = build_service(config, true);

    let token = idp.sign(&idp.claims(AUDIENCE, &["app-user"]));
    let result = service.authenticate(&token, None).await;
    assert!(matches!(result, Err(AuthError::MissingClaim { .. })));
}
