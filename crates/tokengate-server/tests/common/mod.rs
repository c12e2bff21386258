//! Test gateway: a wiremock IDP with a real RSA keypair behind the full
//! axum router.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::RsaPrivateKey;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use tower::util::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tokengate_core::audit::{AuditService, AuditSink, MemoryAuditSink};
use tokengate_core::config::GatewayConfig;
use tokengate_core::context::CoreContext;
use tokengate_delegation::DelegationRegistry;
use tokengate_server::dispatcher::{LLMResponse, ToolDispatcher, ToolRegistration, handler};
use tokengate_server::routes::build_router;
use tokengate_server::state::AppState;

pub const AUDIENCE: &str = "mcp-oauth";
pub const SERVER_URL: &str = "http://localhost:3000";
pub const DELEGATION_AUD: &str = "urn:sql:database";
const TEST_KID: &str = "gateway-test-key";

pub struct TestGateway {
    pub idp_server: MockServer,
    pub router: Router,
    pub state: AppState,
    pub sink: Arc<MemoryAuditSink>,
    encoding_key: EncodingKey,
}

impl TestGateway {
    /// Spin up a mock IDP and the full gateway router.
    ///
    /// `with_exchange` adds a tokenExchange block (and mounts `/token`
    /// returning a TE-JWT with `legacy_name`).
    pub async fn start(with_exchange: bool) -> Self {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("keygen");
        let pem = private_key.to_pkcs1_pem(LineEnding::LF).expect("pem");
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("encoding key");

        let jwk = json!({
            "kty": "RSA",
            "kid": TEST_KID,
            "use": "sig",
            "alg": "RS256",
            "n": URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be()),
        });

        let idp_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [jwk] })))
            .mount(&idp_server)
            .await;

        let mut idp_config = json!({
            "name": "primary",
            "issuer": idp_server.uri(),
            "audience": AUDIENCE,
            "jwksUri": format!("{}/jwks", idp_server.uri()),
            "algorithms": ["RS256"],
            "roleMappings": {
                "admin": ["sys-admin"],
                "user": ["app-user"],
                "guest": ["viewer"],
            },
        });
        if with_exchange {
            idp_config["tokenExchange"] = json!({
                "tokenEndpoint": format!("{}/token", idp_server.uri()),
                "clientId": "tokengate",
                "clientSecret": "test-secret",
                "audience": DELEGATION_AUD,
                "requiredClaim": "legacy_name",
            });
        }

        let config = GatewayConfig::from_json(
            &json!({
                "auth": { "trustedIdps": [idp_config] },
                "mcp": {
                    "serverName": "tokengate-test",
                    "version": "0.4.0",
                    "serverUrl": SERVER_URL,
                },
            })
            .to_string(),
        )
        .expect("test config");

        let sink = Arc::new(MemoryAuditSink::new(512));
        let core =
            CoreContext::with_sink(config, sink.clone() as Arc<dyn AuditSink>).expect("core");

        if with_exchange {
            let now = chrono::Utc::now().timestamp();
            let te_claims = json!({
                "iss": idp_server.uri(),
                "aud": DELEGATION_AUD,
                "sub": "user-1",
                "exp": now + 300,
                "iat": now,
                "legacy_name": "DOMAIN\\alice",
            });
            let mut te_header = Header::new(Algorithm::RS256);
            te_header.kid = Some(TEST_KID.to_string());
            let te_jwt =
                jsonwebtoken::encode(&te_header, &te_claims, &encoding_key).expect("sign te");
            Mock::given(method("POST"))
                .and(path("/token"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "access_token": te_jwt,
                    "token_type": "Bearer",
                    "expires_in": 300,
                })))
                .mount(&idp_server)
                .await;
        }

        let delegation = Arc::new(DelegationRegistry::new(core.audit.clone()));
        let tools = Arc::new(ToolDispatcher::new(core.audit.clone()));
        tools.register(ToolRegistration::new(
            "whoami",
            "Report the authenticated identity",
            json!({"type": "object", "properties": {}}),
            handler(|_params, context| async move {
                Ok(LLMResponse::success(json!({
                    "user": context.session.user_id,
                    "role": context.session.role.as_str(),
                })))
            }),
        ));

        let state = AppState::new(core, delegation, tools);
        let router = build_router(state.clone());

        Self {
            idp_server,
            router,
            state,
            sink,
            encoding_key,
        }
    }

    /// Sign claims with the IDP key.
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(TEST_KID.to_string());
        jsonwebtoken::encode(&header, claims, &self.encoding_key).expect("sign")
    }

    /// A valid requestor token with the given roles.
    pub fn token(&self, roles: &[&str]) -> String {
        let now = chrono::Utc::now().timestamp();
        self.sign(&json!({
            "iss": self.idp_server.uri(),
            "aud": AUDIENCE,
            "sub": "user-1",
            "preferred_username": "alice",
            "exp": now + 300,
            "iat": now,
            "roles": roles,
        }))
    }

    /// Fire one request through the router.
    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.expect("infallible")
    }

    /// POST a JSON-RPC body to /mcp with optional bearer and session id.
    pub async fn mcp_post(
        &self,
        bearer: Option<&str>,
        session_id: Option<&str>,
        body: Value,
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(id) = session_id {
            builder = builder.header("mcp-session-id", id);
        }
        let request = builder.body(Body::from(body.to_string())).expect("request");
        self.request(request).await
    }
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}
