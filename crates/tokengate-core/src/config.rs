//! Gateway configuration types
//!
//! The configuration file is JSON, loaded once at boot, validated eagerly,
//! and immutable for the process lifetime. Three subsets feed the three
//! layers: `auth` (trusted IDPs + audit/rate-limit knobs), `delegation`
//! (per-module config blobs), and `mcp` (transport identity).
//!
//! Validation is strict and fails fast: an empty IDP list, a symmetric JWT
//! algorithm, an out-of-bounds cache TTL, or a duplicate
//! `(issuer, audience)` pair all abort startup.

use std::collections::HashMap;
use std::path::Path;

use jsonwebtoken::Algorithm;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// Asymmetric JWT signing algorithms the gateway accepts.
///
/// HMAC family is deliberately unrepresentable: a resource server sharing a
/// symmetric secret with its IDPs could mint its own tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JwtAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256
    RS256,
    /// ECDSA P-256 with SHA-256
    ES256,
    /// RSASSA-PKCS1-v1_5 with SHA-384
    RS384,
    /// ECDSA P-384 with SHA-384
    ES384,
    /// RSASSA-PKCS1-v1_5 with SHA-512
    RS512,
    /// ECDSA with SHA-512
    ES512,
}

impl JwtAlgorithm {
    /// Convert to the `jsonwebtoken` algorithm
    pub fn to_jsonwebtoken(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::ES256 => Algorithm::ES256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
            Self::RS512 => Algorithm::RS512,
            Self::ES512 => Algorithm::ES512,
        }
    }

    /// Parse a JWT header `alg` value; symmetric and `none` values are
    /// rejected along with anything unknown.
    pub fn from_header_value(alg: &str) -> Option<Self> {
        match alg {
            "RS256" => Some(Self::RS256),
            "ES256" => Some(Self::ES256),
            "RS384" => Some(Self::RS384),
            "ES384" => Some(Self::ES384),
            "RS512" => Some(Self::RS512),
            "ES512" => Some(Self::ES512),
            _ => None,
        }
    }

    /// Whether this algorithm family signs with an RSA key
    pub fn is_rsa(self) -> bool {
        matches!(self, Self::RS256 | Self::RS384 | Self::RS512)
    }

    /// Canonical string form (matches the JWT header value)
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::ES256 => "ES256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
            Self::RS512 => "RS512",
            Self::ES512 => "ES512",
        }
    }
}

/// Named projections of JWT claims into framework fields.
///
/// Each field names the JWT claim to read; `custom_claims` maps framework
/// names to claim names for anything beyond the standard set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClaimMappings {
    /// Claim carrying the role list (default `roles`)
    pub roles: String,
    /// Claim carrying the legacy account name (default `legacy_sam_account`)
    pub legacy_username: String,
    /// Claim carrying the stable user id (default `sub`)
    pub user_id: String,
    /// Claim carrying scopes, as array or space-separated string (default `scope`)
    pub scopes: String,
    /// Extra projections: framework field name -> claim name
    pub custom_claims: HashMap<String, String>,
}

impl Default for ClaimMappings {
    fn default() -> Self {
        Self {
            roles: "roles".to_string(),
            legacy_username: "legacy_sam_account".to_string(),
            user_id: "sub".to_string(),
            scopes: "scope".to_string(),
            custom_claims: HashMap::new(),
        }
    }
}

/// Role bucket configuration for the role mapper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleMappings {
    /// Raw role values that map to the `admin` framework role
    pub admin: Vec<String>,
    /// Raw role values that map to the `user` framework role
    pub user: Vec<String>,
    /// Raw role values that map to the `guest` framework role
    pub guest: Vec<String>,
    /// Fallback framework role when no bucket matches (`admin`/`user`/`guest`)
    pub default_role: Option<String>,
    /// Anchored regex patterns selecting raw roles to carry as custom roles
    pub custom_patterns: Vec<String>,
}

/// Per-IDP validation policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityPolicy {
    /// Clock tolerance applied to `exp`/`nbf` checks, seconds
    pub clock_tolerance_sec: u64,
    /// Maximum accepted token age (`now - iat`), seconds
    pub max_token_age_sec: u64,
    /// Enforce presence and validity of `nbf`
    pub require_nbf: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            clock_tolerance_sec: 60,
            max_token_age_sec: 3600,
            require_nbf: false,
        }
    }
}

/// Bounds for the session-bound exchange cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExchangeCacheConfig {
    /// Entry TTL in seconds; clamped to [60, 600] at validation
    pub ttl_seconds: u64,
    /// Per-session entry cap; [1, 100]
    pub max_entries_per_session: usize,
    /// Global entry cap; [100, 100000]
    pub max_total_entries: usize,
}

impl Default for ExchangeCacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            max_entries_per_session: 10,
            max_total_entries: 10_000,
        }
    }
}

/// RFC 8693 token-exchange settings for one IDP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenExchangeConfig {
    /// IDP token endpoint to POST the exchange grant to
    pub token_endpoint: String,
    /// OAuth client id of the gateway
    pub client_id: String,
    /// OAuth client secret (zeroized on drop, never Debug-printed)
    #[serde(
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub client_secret: SecretString,
    /// Default downstream audience when the caller does not supply one
    pub audience: String,
    /// Scope requested on the exchanged token
    #[serde(default)]
    pub scope: Option<String>,
    /// Claim that must be present on the exchanged token (e.g. `legacy_name`)
    #[serde(default)]
    pub required_claim: Option<String>,
    /// Cache bounds for exchanged tokens
    #[serde(default)]
    pub cache: ExchangeCacheConfig,
}

fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(SecretString::new(s))
}

/// One trusted identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpConfig {
    /// Unique name, used for JWKS-client keying and logging
    pub name: String,
    /// Expected `iss` claim (URL)
    pub issuer: String,
    /// Expected `aud` claim (this resource server's identifier)
    pub audience: String,
    /// JWKS endpoint URL
    pub jwks_uri: String,
    /// Whitelisted signing algorithms (non-empty, asymmetric only)
    pub algorithms: Vec<JwtAlgorithm>,
    /// Claim projections
    #[serde(default)]
    pub claim_mappings: ClaimMappings,
    /// Role bucket configuration
    #[serde(default)]
    pub role_mappings: RoleMappings,
    /// Validation policy knobs
    #[serde(default)]
    pub security: SecurityPolicy,
    /// Token exchange, when this IDP supports RFC 8693 for the gateway
    #[serde(default)]
    pub token_exchange: Option<TokenExchangeConfig>,
    /// OAuth endpoints mirrored on the authorization-server metadata
    /// document (RFC 8414). Optional; issuer-derived defaults apply.
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    /// Token endpoint advertised in metadata (falls back to
    /// `token_exchange.token_endpoint` when unset)
    #[serde(default)]
    pub metadata_token_endpoint: Option<String>,
}

impl IdpConfig {
    /// Token endpoint to advertise in authorization-server metadata
    pub fn advertised_token_endpoint(&self) -> Option<&str> {
        self.metadata_token_endpoint
            .as_deref()
            .or(self.token_exchange.as_ref().map(|t| t.token_endpoint.as_str()))
    }
}

/// Simple fixed-window rate limit knobs (enforced at the boundary).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Requests allowed per window
    pub max_requests: u32,
    /// Window length in seconds
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_requests: 100,
            window_secs: 60,
        }
    }
}

/// Audit sink selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    /// Structured tracing events (the default)
    #[default]
    Tracing,
    /// Bounded in-memory ring, for embedders that drain it themselves
    Memory,
}

/// Audit service knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditConfig {
    /// Which sink to install
    pub sink: AuditSinkKind,
    /// Bounded queue depth between request path and sink
    pub queue_depth: usize,
    /// Ring capacity when the in-memory sink is selected
    pub memory_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::Tracing,
            queue_depth: 1024,
            memory_capacity: 4096,
        }
    }
}

/// `auth` subset of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSettings {
    /// Trusted identity providers (non-empty)
    pub trusted_idps: Vec<IdpConfig>,
    /// Optional boundary rate limiting
    #[serde(default)]
    pub rate_limiting: RateLimitConfig,
    /// Audit service knobs
    #[serde(default)]
    pub audit: AuditConfig,
}

/// `delegation` subset: opaque per-module configuration blobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelegationSettings {
    /// Module name -> module-specific configuration
    #[serde(default)]
    pub modules: HashMap<String, serde_json::Value>,
}

/// `mcp` subset: transport identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpSettings {
    /// Server name reported during MCP initialize
    pub server_name: String,
    /// Server version string
    pub version: String,
    /// Transport selector (`http` is the only one the gateway serves)
    #[serde(default = "default_transport")]
    pub transport: String,
    /// TCP port to bind
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally visible base URL; drives metadata and WWW-Authenticate
    #[serde(default)]
    pub server_url: Option<String>,
}

fn default_transport() -> String {
    "http".to_string()
}

fn default_port() -> u16 {
    3000
}

impl McpSettings {
    /// Externally visible base URL, defaulting to localhost on the bound port
    pub fn effective_server_url(&self) -> String {
        self.server_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.port))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Authentication subset
    pub auth: AuthSettings,
    /// Delegation subset
    #[serde(default)]
    pub delegation: DelegationSettings,
    /// MCP transport subset
    pub mcp: McpSettings,
}

impl GatewayConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read, is not
    /// valid JSON, or fails [`validate`](Self::validate).
    pub fn from_file(path: impl AsRef<Path>) -> AuthResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AuthError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON configuration string.
    ///
    /// # Errors
    ///
    /// Same contract as [`from_file`](Self::from_file), minus the I/O.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tokengate_core::config::GatewayConfig;
    ///
    /// let config = GatewayConfig::from_json(r#"{
    ///     "auth": { "trustedIdps": [{
    ///         "name": "primary",
    ///         "issuer": "https://idp.example.com/realms/mcp",
    ///         "audience": "mcp-oauth",
    ///         "jwksUri": "https://idp.example.com/realms/mcp/jwks",
    ///         "algorithms": ["RS256"],
    ///         "roleMappings": { "user": ["app-user"] }
    ///     }] },
    ///     "mcp": { "serverName": "gateway", "version": "1.0.0" }
    /// }"#)?;
    ///
    /// assert_eq!(config.auth.trusted_idps[0].name, "primary");
    /// assert_eq!(config.mcp.port, 3000);
    /// # Ok::<(), tokengate_core::error::AuthError>(())
    /// ```
    pub fn from_json(raw: &str) -> AuthResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| AuthError::configuration(format!("invalid configuration JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the whole document. All violations are startup-fatal.
    pub fn validate(&self) -> AuthResult<()> {
        if self.auth.trusted_idps.is_empty() {
            return Err(AuthError::configuration_with_key(
                "at least one trusted IDP is required",
                "auth.trustedIdps",
            ));
        }

        let mut seen_names = std::collections::HashSet::new();
        let mut seen_pairs = std::collections::HashSet::new();
        for idp in &self.auth.trusted_idps {
            let key = format!("auth.trustedIdps[{}]", idp.name);

            if !seen_names.insert(idp.name.clone()) {
                return Err(AuthError::configuration_with_key(
                    format!("duplicate IDP name '{}'", idp.name),
                    key,
                ));
            }
            if !seen_pairs.insert((idp.issuer.clone(), idp.audience.clone())) {
                return Err(AuthError::configuration_with_key(
                    format!(
                        "duplicate (issuer, audience) pair ({}, {})",
                        idp.issuer, idp.audience
                    ),
                    key,
                ));
            }
            if idp.algorithms.is_empty() {
                return Err(AuthError::configuration_with_key(
                    "algorithms must be non-empty",
                    format!("{key}.algorithms"),
                ));
            }
            if idp.audience.is_empty() {
                return Err(AuthError::configuration_with_key(
                    "audience is required",
                    format!("{key}.audience"),
                ));
            }
            url::Url::parse(&idp.issuer).map_err(|e| {
                AuthError::configuration_with_key(
                    format!("issuer is not a URL: {e}"),
                    format!("{key}.issuer"),
                )
            })?;
            url::Url::parse(&idp.jwks_uri).map_err(|e| {
                AuthError::configuration_with_key(
                    format!("jwksUri is not a URL: {e}"),
                    format!("{key}.jwksUri"),
                )
            })?;

            if let Some(default_role) = &idp.role_mappings.default_role {
                if !matches!(default_role.as_str(), "admin" | "user" | "guest") {
                    return Err(AuthError::configuration_with_key(
                        format!("defaultRole must be admin/user/guest, got '{default_role}'"),
                        format!("{key}.roleMappings.defaultRole"),
                    ));
                }
            }
            for pattern in &idp.role_mappings.custom_patterns {
                regex::Regex::new(pattern).map_err(|e| {
                    AuthError::configuration_with_key(
                        format!("invalid custom role pattern '{pattern}': {e}"),
                        format!("{key}.roleMappings.customPatterns"),
                    )
                })?;
            }

            if let Some(te) = &idp.token_exchange {
                url::Url::parse(&te.token_endpoint).map_err(|e| {
                    AuthError::configuration_with_key(
                        format!("tokenEndpoint is not a URL: {e}"),
                        format!("{key}.tokenExchange.tokenEndpoint"),
                    )
                })?;
                let cache = &te.cache;
                if !(60..=600).contains(&cache.ttl_seconds) {
                    return Err(AuthError::configuration_with_key(
                        format!("ttlSeconds {} outside [60, 600]", cache.ttl_seconds),
                        format!("{key}.tokenExchange.cache.ttlSeconds"),
                    ));
                }
                if !(1..=100).contains(&cache.max_entries_per_session) {
                    return Err(AuthError::configuration_with_key(
                        format!(
                            "maxEntriesPerSession {} outside [1, 100]",
                            cache.max_entries_per_session
                        ),
                        format!("{key}.tokenExchange.cache.maxEntriesPerSession"),
                    ));
                }
                if !(100..=100_000).contains(&cache.max_total_entries) {
                    return Err(AuthError::configuration_with_key(
                        format!(
                            "maxTotalEntries {} outside [100, 100000]",
                            cache.max_total_entries
                        ),
                        format!("{key}.tokenExchange.cache.maxTotalEntries"),
                    ));
                }
            }
        }

        if self.mcp.server_name.is_empty() {
            return Err(AuthError::configuration_with_key(
                "serverName is required",
                "mcp.serverName",
            ));
        }

        Ok(())
    }
}
