//! Shared test harness: a wiremock-backed mock IDP with a real RSA
//! keypair, so signature verification is exercised end to end.

#![allow(dead_code)]

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::RsaPrivateKey;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tokengate_core::config::{IdpConfig, JwtAlgorithm, RoleMappings, TokenExchangeConfig};

pub const TEST_KID: &str = "itest-key-1";

/// A mock IDP: JWKS endpoint plus a signing key for minting tokens.
pub struct MockIdp {
    pub server: MockServer,
    encoding_key: EncodingKey,
    jwk: Value,
}

impl MockIdp {
    /// Start the server, mint a 2048-bit RSA key, and mount `/jwks`.
    pub async fn start() -> Self {
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

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [jwk] })))
            .mount(&server)
            .await;

        Self {
            server,
            encoding_key,
            jwk,
        }
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn jwks_uri(&self) -> String {
        format!("{}/jwks", self.server.uri())
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.server.uri())
    }

    pub fn jwk(&self) -> Value {
        self.jwk.clone()
    }

    /// Sign arbitrary claims with the IDP key under the test kid.
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(TEST_KID.to_string());
        jsonwebtoken::encode(&header, claims, &self.encoding_key).expect("sign")
    }

    /// Sign with an unknown kid (key-rotation scenarios).
    pub fn sign_with_kid(&self, claims: &Value, kid: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        jsonwebtoken::encode(&header, claims, &self.encoding_key).expect("sign")
    }

    /// Baseline valid claims for this IDP; callers override as needed.
    pub fn claims(&self, audience: &str, roles: &[&str]) -> Value {
        let now = chrono::Utc::now().timestamp();
        json!({
            "iss": self.issuer(),
            "aud": audience,
            "sub": "user-1",
            "preferred_username": "alice",
            "exp": now + 300,
            "iat": now,
            "roles": roles,
        })
    }

    /// An IdpConfig pointing at this mock, role map `user: [app-user]`.
    pub fn idp_config(&self, audience: &str) -> IdpConfig {
        IdpConfig {
            name: "mock".into(),
            issuer: self.issuer(),
            audience: audience.into(),
            jwks_uri: self.jwks_uri(),
            algorithms: vec![JwtAlgorithm::RS256],
            claim_mappings: Default::default(),
            role_mappings: RoleMappings {
                admin: vec!["sys-admin".into()],
                user: vec!["app-user".into()],
                guest: vec![],
                default_role: None,
                custom_patterns: vec![],
            },
            security: Default::default(),
            token_exchange: None,
            authorization_endpoint: None,
            metadata_token_endpoint: None,
        }
    }

    /// Same config with a token-exchange block aimed at `/token`.
    pub fn idp_config_with_exchange(
        &self,
        audience: &str,
        delegation_audience: &str,
        required_claim: Option<&str>,
    ) -> IdpConfig {
        let mut config = self.idp_config(audience);
        config.token_exchange = Some(TokenExchangeConfig {
            token_endpoint: self.token_endpoint(),
            client_id: "tokengate".into(),
            client_secret: secrecy::SecretString::new("test-secret".into()),
            audience: delegation_audience.into(),
            scope: Some("delegated".into()),
            required_claim: required_claim.map(String::from),
            cache: Default::default(),
        });
        config
    }

    /// Mount `/token` returning a TE-JWT minted by this IDP.
    pub async fn mount_token_exchange(&self, te_claims: &Value, expect: Option<u64>) {
        let te_jwt = self.sign(te_claims);
        let mock = Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": te_jwt,
                "issued_token_type": "urn:ietf:params:oauth:token-type:jwt",
                "token_type": "Bearer",
                "expires_in": 300,
            })));
        let mock = match expect {
            Some(times) => mock.expect(times),
            None => mock,
        };
        mock.mount(&self.server).await;
    }

    /// Baseline TE-JWT claims carrying a legacy mapping.
    pub fn te_claims(&self, delegation_audience: &str) -> Value {
        let now = chrono::Utc::now().timestamp();
        json!({
            "iss": self.issuer(),
            "aud": delegation_audience,
            "sub": "user-1",
            "exp": now + 300,
            "iat": now,
            "legacy_name": "DOMAIN\\alice",
            "roles": ["app-user"],
        })
    }
}
