//! Token exchange behavior against a mock IDP token endpoint.

mod common;

use std::sync::Arc;

use common::MockIdp;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, ResponseTemplate};

use tokengate_core::audit::{AuditService, AuditSink, MemoryAuditSink, actions};
use tokengate_core::cache::TokenCache;
use tokengate_core::error::AuthError;
use tokengate_core::exchange::{ExchangeRequest, TokenExchangeService};

const AUDIENCE: &str = "mcp-oauth";
const DELEGATION_AUD: &str = "urn:sql:database";

fn harness(cache: bool) -> (Option<Arc<TokenCache>>, AuditService, Arc<MemoryAuditSink>) {
    let sink = Arc::new(MemoryAuditSink::new(256));
    let audit = AuditService::new(sink.clone() as Arc<dyn AuditSink>, 256);
    let cache = cache.then(|| Arc::new(TokenCache::new(Default::default(), audit.clone())));
    (cache, audit, sink)
}

#[tokio::test]
async fn twenty_calls_one_outbound_post() {
    let idp = MockIdp::start().await;
    // The endpoint asserts it is hit exactly once.
    idp.mount_token_exchange(&idp.te_claims(DELEGATION_AUD), Some(1)).await;

    let config = idp.idp_config_with_exchange(AUDIENCE, DELEGATION_AUD, None);
    let (cache, audit, sink) = harness(true);
    let service = TokenExchangeService::new(cache, audit.clone()).unwrap();

    let session_id = Uuid::new_v4().to_string();
    let requestor = idp.sign(&idp.claims(AUDIENCE, &["app-user"]));

    let mut tokens = Vec::new();
    for _ in 0..20 {
        let token = service
            .exchange(ExchangeRequest {
                session_id: Some(&session_id),
                requestor_jwt: &requestor,
                idp: &config,
                audience: None,
                scope: None,
            })
            .await
            .unwrap();
        tokens.push(token);
    }

    assert!(tokens.windows(2).all(|pair| pair[0] == pair[1]));

    audit.flush().await;
    let entries = sink.snapshot();
    let successes = entries
        .iter()
        .filter(|e| e.action == actions::TOKEN_EXCHANGE_SUCCESS)
        .count();
    let hits = entries
        .iter()
        .filter(|e| e.action == actions::CACHE_HIT)
        .count();
    assert_eq!(successes, 1);
    assert_eq!(hits, 19);
}

#[tokio::test]
async fn form_body_is_rfc8693() {
    let idp = MockIdp::start().await;
    let te_jwt = idp.sign(&idp.te_claims(DELEGATION_AUD));
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Atoken-exchange",
        ))
        .and(body_string_contains("subject_token_type=urn%3Aietf%3Aparams%3Aoauth%3Atoken-type%3Ajwt"))
        .and(body_string_contains("client_id=tokengate"))
        .and(body_string_contains("audience=urn%3Asql%3Adatabase"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "access_token": te_jwt })),
        )
        .expect(1)
        .mount(&idp.server)
        .await;

    let config = idp.idp_config_with_exchange(AUDIENCE, DELEGATION_AUD, None);
    let (_, audit, _) = harness(false);
    let service = TokenExchangeService::new(None, audit).unwrap();
    let requestor = idp.sign(&idp.claims(AUDIENCE, &["app-user"]));

    let result = service
        .exchange(ExchangeRequest {
            session_id: None,
            requestor_jwt: &requestor,
            idp: &config,
            audience: None,
            scope: None,
        })
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn client_error_fails_without_retry() {
    let idp = MockIdp::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&idp.server)
        .await;

    let config = idp.idp_config_with_exchange(AUDIENCE, DELEGATION_AUD, None);
    let (_, audit, _) = harness(false);
    let service = TokenExchangeService::new(None, audit).unwrap();
    let requestor = idp.sign(&idp.claims(AUDIENCE, &["app-user"]));

    let result = service
        .exchange(ExchangeRequest {
            session_id: None,
            requestor_jwt: &requestor,
            idp: &config,
            audience: None,
            scope: None,
        })
        .await;
    assert!(matches!(
        result,
        Err(AuthError::TokenExchangeFailed {
            upstream_status: Some(403),
            ..
        })
    ));
}

#[tokio::test]
async fn server_error_retried_once() {
    let idp = MockIdp::start().await;
    // Both the initial attempt and the single retry land here.
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&idp.server)
        .await;

    let config = idp.idp_config_with_exchange(AUDIENCE, DELEGATION_AUD, None);
    let (_, audit, _) = harness(false);
    let service = TokenExchangeService::new(None, audit).unwrap();
    let requestor = idp.sign(&idp.claims(AUDIENCE, &["app-user"]));

    let result = service
        .exchange(ExchangeRequest {
            session_id: None,
            requestor_jwt: &requestor,
            idp: &config,
            audience: None,
            scope: None,
        })
        .await;
    assert!(matches!(result, Err(AuthError::TokenExchangeFailed { .. })));
}

#[tokio::test]
async fn missing_required_claim_is_fatal() {
    let idp = MockIdp::start().await;
    let mut te_claims = idp.te_claims(DELEGATION_AUD);
    te_claims.as_object_mut().unwrap().remove("legacy_name");
    idp.mount_token_exchange(&te_claims, None).await;

    let config = idp.idp_config_with_exchange(AUDIENCE, DELEGATION_AUD, Some("legacy_name"));
    let (_, audit, _) = harness(false);
    let service = TokenExchangeService::new(None, audit).unwrap();
    let requestor = idp.sign(&idp.claims(AUDIENCE, &["app-user"]));

    let result = service
        .exchange(ExchangeRequest {
            session_id: None,
            requestor_jwt: &requestor,
            idp: &config,
            audience: None,
            scope: None,
        })
        .await;
    assert!(matches!(
        result,
        Err(AuthError::MissingClaim { claim }) if claim == "legacy_name"
    ));
}

#[tokio::test]
async fn concurrent_misses_collapse_to_one_request() {
    let idp = MockIdp::start().await;
    idp.mount_token_exchange(&idp.te_claims(DELEGATION_AUD), Some(1)).await;

    let config = Arc::new(idp.idp_config_with_exchange(AUDIENCE, DELEGATION_AUD, None));
    let (cache, audit, _) = harness(true);
    let service = Arc::new(TokenExchangeService::new(cache, audit).unwrap());

    let session_id = Arc::new(Uuid::new_v4().to_string());
    let requestor = Arc::new(idp.sign(&idp.claims(AUDIENCE, &["app-user"])));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        let config = Arc::clone(&config);
        let session_id = Arc::clone(&session_id);
        let requestor = Arc::clone(&requestor);
        handles.push(tokio::spawn(async move {
            service
                .exchange(ExchangeRequest {
                    session_id: Some(session_id.as_str()),
                    requestor_jwt: requestor.as_str(),
                    idp: config.as_ref(),
                    audience: None,
                    scope: None,
                })
                .await
        }));
    }

    let mut tokens = Vec::new();
    for handle in handles {
        tokens.push(handle.await.unwrap().unwrap());
    }
    // All awaiters observed the same result; the mock asserts one POST.
    assert!(tokens.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn invalid_session_id_skips_cache_but_exchanges() {
    let idp = MockIdp::start().await;
    idp.mount_token_exchange(&idp.te_claims(DELEGATION_AUD), Some(2)).await;

    let config = idp.idp_config_with_exchange(AUDIENCE, DELEGATION_AUD, None);
    let (cache, audit, _) = harness(true);
    let service = TokenExchangeService::new(cache.clone(), audit).unwrap();
    let requestor = idp.sign(&idp.claims(AUDIENCE, &["app-user"]));

    // Two calls with a malformed session id: no caching, two POSTs.
    for _ in 0..2 {
        let result = service
            .exchange(ExchangeRequest {
                session_id: Some("definitely-not-a-uuid"),
                requestor_jwt: &requestor,
                idp: &config,
                audience: None,
                scope: None,
            })
            .await;
        assert!(result.is_ok());
    }
    assert_eq!(cache.unwrap().stats().total_entries, 0);
}
