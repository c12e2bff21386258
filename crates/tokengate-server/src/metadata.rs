//! OAuth metadata surface
//!
//! Two discovery documents make the resource server findable:
//!
//! - `/.well-known/oauth-authorization-server` (RFC 8414) mirrors the
//!   *primary* (first configured) IDP's endpoints
//! - `/.well-known/oauth-protected-resource` (RFC 9728) describes this
//!   server and lists *every* trusted IDP as an authorization server
//!
//! Plus the `WWW-Authenticate` value every 401 carries, pointing clients
//! at the protected-resource document.

use serde_json::{Value, json};

use tokengate_core::config::IdpConfig;
use tokengate_core::idp::IdpRegistry;

/// RFC 8414 document mirroring the primary IDP.
pub fn authorization_server_metadata(primary: &IdpConfig) -> Value {
    let issuer = primary.issuer.trim_end_matches('/');
    let authorization_endpoint = primary
        .authorization_endpoint
        .clone()
        .unwrap_or_else(|| format!("{issuer}/authorize"));
    let token_endpoint = primary
        .advertised_token_endpoint()
        .map(String::from)
        .unwrap_or_else(|| format!("{issuer}/token"));

    let mut grant_types = vec!["authorization_code".to_string(), "refresh_token".to_string()];
    if primary.token_exchange.is_some() {
        grant_types.push("urn:ietf:params:oauth:grant-type:token-exchange".to_string());
    }

    json!({
        "issuer": primary.issuer,
        "authorization_endpoint": authorization_endpoint,
        "token_endpoint": token_endpoint,
        "jwks_uri": primary.jwks_uri,
        "response_types_supported": ["code"],
        "grant_types_supported": grant_types,
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post"],
    })
}

/// RFC 9728 document for this resource server.
///
/// `scopes_supported` is dynamic: the union of scopes declared by the
/// registered delegation modules at the time of the request.
pub fn protected_resource_metadata(
    server_url: &str,
    registry: &IdpRegistry,
    module_scopes: Vec<String>,
) -> Value {
    let authorization_servers: Vec<&str> =
        registry.all().iter().map(|idp| idp.issuer.as_str()).collect();

    let mut signing_algs: Vec<&'static str> = registry
        .all()
        .iter()
        .flat_map(|idp| idp.algorithms.iter().map(|alg| alg.as_str()))
        .collect();
    signing_algs.sort_unstable();
    signing_algs.dedup();

    json!({
        "resource": server_url,
        "authorization_servers": authorization_servers,
        "bearer_methods_supported": ["header"],
        "resource_signing_alg_values_supported": signing_algs,
        "scopes_supported": module_scopes,
    })
}

/// `WWW-Authenticate` value for 401 responses (RFC 9728 §5.1).
pub fn www_authenticate(server_url: &str) -> String {
    format!(
        "Bearer resource_metadata=\"{}/.well-known/oauth-protected-resource\"",
        server_url.trim_end_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokengate_core::config::{JwtAlgorithm, TokenExchangeConfig};

    fn idp(name: &str, algorithms: Vec<JwtAlgorithm>) -> IdpConfig {
        IdpConfig {
            name: name.into(),
            issuer: format!("https://idp.example/{name}"),
            audience: "mcp-oauth".into(),
            jwks_uri: format!("https://idp.example/{name}/jwks"),
            algorithms,
            claim_mappings: Default::default(),
            role_mappings: Default::default(),
            security: Default::default(),
            token_exchange: None,
            authorization_endpoint: None,
            metadata_token_endpoint: None,
        }
    }

    #[test]
    fn test_authorization_server_mirrors_primary() {
        let primary = idp("realm", vec![JwtAlgorithm::RS256]);
        let doc = authorization_server_metadata(&primary);
        assert_eq!(doc["issuer"], "https://idp.example/realm");
        assert_eq!(doc["jwks_uri"], "https://idp.example/realm/jwks");
        assert_eq!(doc["response_types_supported"], json!(["code"]));
        assert_eq!(doc["code_challenge_methods_supported"], json!(["S256"]));
    }

    #[test]
    fn test_token_exchange_grant_advertised_when_configured() {
        let mut primary = idp("realm", vec![JwtAlgorithm::RS256]);
        primary.token_exchange = Some(TokenExchangeConfig {
            token_endpoint: "https://idp.example/realm/token".into(),
            client_id: "gw".into(),
            client_secret: secrecy::SecretString::new("s".into()),
            audience: "urn:sql".into(),
            scope: None,
            required_claim: None,
            cache: Default::default(),
        });
        let doc = authorization_server_metadata(&primary);
        let grants = doc["grant_types_supported"].as_array().unwrap();
        assert!(grants.contains(&json!("urn:ietf:params:oauth:grant-type:token-exchange")));
        assert_eq!(doc["token_endpoint"], "https://idp.example/realm/token");
    }

    #[test]
    fn test_protected_resource_lists_all_idps() {
        let registry = IdpRegistry::from_config(vec![
            idp("a", vec![JwtAlgorithm::RS256]),
            idp("b", vec![JwtAlgorithm::ES256, JwtAlgorithm::RS256]),
        ])
        .unwrap();
        let doc = protected_resource_metadata(
            "http://localhost:3000",
            &registry,
            vec!["sql:execute".into()],
        );
        assert_eq!(doc["resource"], "http://localhost:3000");
        assert_eq!(
            doc["authorization_servers"],
            json!(["https://idp.example/a", "https://idp.example/b"])
        );
        assert_eq!(doc["bearer_methods_supported"], json!(["header"]));
        assert_eq!(
            doc["resource_signing_alg_values_supported"],
            json!(["ES256", "RS256"])
        );
        assert_eq!(doc["scopes_supported"], json!(["sql:execute"]));
    }

    #[test]
    fn test_www_authenticate_shape() {
        let value = www_authenticate("http://localhost:3000");
        assert_eq!(
            value,
            "Bearer resource_metadata=\"http://localhost:3000/.well-known/oauth-protected-resource\""
        );
        // Trailing slash does not double up.
        assert_eq!(www_authenticate("http://localhost:3000/"), value);
    }
}
