//! JWT validation against the trusted IDP registry
//!
//! Validation order is fixed: structural parse, IDP selection by the
//! unverified `(iss, aud)` pair, algorithm whitelist, key resolution by
//! `kid`, signature verification, time checks, claim mapping. Nothing
//! downstream of signature verification ever sees an unverified claim.
//!
//! # Security notes
//!
//! - `alg: none` and the whole HMAC family are unrepresentable in
//!   [`JwtAlgorithm`] and therefore rejected before key resolution.
//! - The JWK's key type is pinned to the algorithm family (RSA for RS*,
//!   EC for ES*), blocking downgrade-by-`kty`-confusion.
//! - Clock tolerance applies symmetrically: `now < nbf - tol` and
//!   `now >= exp + tol` both reject; a token at exactly `exp + tol` is
//!   expired.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::AlgorithmParameters;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::{ClaimMappings, IdpConfig, JwtAlgorithm};
use crate::error::{AuthError, AuthResult};
use crate::idp::IdpRegistry;

/// Claims projected through an IDP's `claim_mappings`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedClaims {
    /// Raw role values, before role mapping
    pub roles: Vec<String>,
    /// Legacy account name, when the mapped claim is present
    pub legacy_username: Option<String>,
    /// Stable user id
    pub user_id: Option<String>,
    /// OAuth scopes
    pub scopes: Vec<String>,
    /// Extra projections keyed by framework field name
    pub custom_claims: Map<String, Value>,
}

/// Outcome of a successful validation.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    /// Full verified JWT payload
    pub payload: Map<String, Value>,
    /// Claims projected through the IDP's mappings
    pub mapped: MappedClaims,
    /// Name of the IDP that validated the token
    pub idp_name: String,
    /// Algorithm the token was signed with
    pub algorithm: JwtAlgorithm,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    kid: Option<String>,
}

/// JWT validator over a trusted IDP registry.
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use tokengate_core::config::GatewayConfig;
/// # use tokengate_core::idp::IdpRegistry;
/// # use tokengate_core::jwt::JwtValidator;
/// # tokio_test::block_on(async {
/// let config = GatewayConfig::from_file("config.json")?;
/// let registry = Arc::new(IdpRegistry::from_config(config.auth.trusted_idps.clone())?);
/// let validator = JwtValidator::new(registry);
///
/// match validator.validate("eyJhbGciOiJSUzI1NiIs...").await {
///     Ok(validated) => println!("subject: {:?}", validated.mapped.user_id),
///     Err(e) => println!("rejected: {e}"),
/// }
/// # Ok::<(), tokengate_core::error::AuthError>(())
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct JwtValidator {
    registry: Arc<IdpRegistry>,
}

impl JwtValidator {
    /// Create a validator backed by the registry.
    pub fn new(registry: Arc<IdpRegistry>) -> Self {
        Self { registry }
    }

    /// Validate a compact JWS and project its claims.
    ///
    /// # Errors
    ///
    /// `InvalidTokenFormat`, `UntrustedIssuer`, `UntrustedAudience`,
    /// `AlgorithmNotAllowed`, `SignatureInvalid`, `TokenExpired`,
    /// `TokenNotYetValid`, `TokenTooOld`, or `MissingClaim`, depending on
    /// which step refused the token.
    pub async fn validate(&self, token: &str) -> AuthResult<ValidatedToken> {
        let (header, unverified_payload) = peek(token)?;

        let alg_value = header.alg.ok_or_else(|| AuthError::InvalidTokenFormat {
            reason: "missing alg in JWT header".into(),
        })?;

        // Whitelist check before any key material is touched. `none` and
        // HS* fall out here because JwtAlgorithm cannot represent them.
        let algorithm =
            JwtAlgorithm::from_header_value(&alg_value).ok_or_else(|| {
                warn!(alg = %alg_value, "JWT algorithm rejected");
                AuthError::AlgorithmNotAllowed {
                    algorithm: alg_value.clone(),
                }
            })?;

        let issuer = string_claim(&unverified_payload, "iss")
            .ok_or_else(|| AuthError::MissingClaim { claim: "iss".into() })?;
        let audiences = audience_claim(&unverified_payload);

        let idp = self.registry.find(&issuer, &audiences)?;

        if !idp.algorithms.contains(&algorithm) {
            warn!(idp = %idp.name, alg = %alg_value, "algorithm not in IDP whitelist");
            return Err(AuthError::AlgorithmNotAllowed {
                algorithm: alg_value,
            });
        }

        let kid = header.kid.ok_or_else(|| AuthError::InvalidTokenFormat {
            reason: "missing kid in JWT header".into(),
        })?;

        let jwks = self
            .registry
            .jwks_client(&idp.name)
            .ok_or_else(|| AuthError::internal(format!("no JWKS client for {}", idp.name)))?;
        let jwk = jwks.get_key(&kid).await?;

        // Pin the expected key type per algorithm family.
        let key_type_ok = match (&jwk.algorithm, algorithm.is_rsa()) {
            (AlgorithmParameters::RSA(_), true) => true,
            (AlgorithmParameters::EllipticCurve(_), false) => true,
            _ => false,
        };
        if !key_type_ok {
            warn!(idp = %idp.name, kid, alg = %algorithm.as_str(), "JWK key type does not match algorithm family");
            return Err(AuthError::AlgorithmNotAllowed {
                algorithm: algorithm.as_str().to_string(),
            });
        }

        let decoding_key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| AuthError::internal(format!("invalid JWK for kid {kid}: {e}")))?;

        let tol = idp.security.clock_tolerance_sec;
        let mut validation = Validation::new(algorithm.to_jsonwebtoken());
        validation.leeway = tol;
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        let token_data =
            decode::<Map<String, Value>>(token, &decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
                    ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim {
                        claim: claim.clone(),
                    },
                    ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                        AuthError::InvalidTokenFormat {
                            reason: "undecodable token segment".into(),
                        }
                    }
                    _ => {
                        debug!(idp = %idp.name, error = %e, "signature verification failed");
                        AuthError::SignatureInvalid
                    }
                }
            })?;
        let payload = token_data.claims;

        check_time_claims(&payload, idp)?;

        if string_claim(&payload, "sub").is_none() {
            return Err(AuthError::MissingClaim { claim: "sub".into() });
        }

        let mapped = apply_claim_mappings(&payload, &idp.claim_mappings);

        debug!(
            idp = %idp.name,
            subject = ?mapped.user_id,
            alg = %algorithm.as_str(),
            "JWT validated"
        );

        Ok(ValidatedToken {
            payload,
            mapped,
            idp_name: idp.name.clone(),
            algorithm,
        })
    }
}

/// Authoritative time checks with the IDP's tolerance.
fn check_time_claims(payload: &Map<String, Value>, idp: &IdpConfig) -> AuthResult<()> {
    let now = chrono::Utc::now().timestamp();
    let tol = idp.security.clock_tolerance_sec as i64;

    let exp = int_claim(payload, "exp")
        .ok_or_else(|| AuthError::MissingClaim { claim: "exp".into() })?;
    if now >= exp + tol {
        return Err(AuthError::TokenExpired);
    }

    match int_claim(payload, "nbf") {
        Some(nbf) => {
            if now < nbf - tol {
                return Err(AuthError::TokenNotYetValid);
            }
        }
        None if idp.security.require_nbf => {
            return Err(AuthError::MissingClaim { claim: "nbf".into() });
        }
        None => {}
    }

    let iat = int_claim(payload, "iat")
        .ok_or_else(|| AuthError::MissingClaim { claim: "iat".into() })?;
    if now - iat > idp.security.max_token_age_sec as i64 {
        return Err(AuthError::TokenTooOld);
    }

    Ok(())
}

/// Decode header and payload without verifying the signature.
///
/// The unverified payload is used only to select an IDP; everything the
/// pipeline consumes afterwards comes from the verified decode.
fn peek(token: &str) -> AuthResult<(RawHeader, Map<String, Value>)> {
    let mut parts = token.split('.');
    let (header_b64, payload_b64) = match (parts.next(), parts.next(), parts.next(), parts.next())
    {
        (Some(h), Some(p), Some(_sig), None) => (h, p),
        _ => {
            return Err(AuthError::InvalidTokenFormat {
                reason: "token is not a three-part compact JWS".into(),
            });
        }
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| AuthError::InvalidTokenFormat {
            reason: "header is not base64url".into(),
        })?;
    let header: RawHeader =
        serde_json::from_slice(&header_bytes).map_err(|_| AuthError::InvalidTokenFormat {
            reason: "header is not a JSON object".into(),
        })?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidTokenFormat {
            reason: "payload is not base64url".into(),
        })?;
    let payload: Map<String, Value> =
        serde_json::from_slice(&payload_bytes).map_err(|_| AuthError::InvalidTokenFormat {
            reason: "payload is not a JSON object".into(),
        })?;

    Ok((header, payload))
}

/// Decode a JWT payload without signature verification.
///
/// For tokens the gateway consumes but does not trust for identity (the
/// exchanged delegation token is validated by the *downstream* resource).
pub fn decode_unverified(token: &str) -> AuthResult<Map<String, Value>> {
    let (_, payload) = peek(token)?;
    Ok(payload)
}

/// Project the payload through an IDP's claim mappings.
pub fn apply_claim_mappings(payload: &Map<String, Value>, mappings: &ClaimMappings) -> MappedClaims {
    let roles = string_array_claim(payload, &mappings.roles);
    let scopes = scope_claim(payload, &mappings.scopes);
    let legacy_username = string_claim(payload, &mappings.legacy_username);
    let user_id = string_claim(payload, &mappings.user_id);

    let mut custom_claims = Map::new();
    for (framework_name, claim_name) in &mappings.custom_claims {
        if let Some(value) = payload.get(claim_name) {
            custom_claims.insert(framework_name.clone(), value.clone());
        }
    }

    MappedClaims {
        roles,
        legacy_username,
        user_id,
        scopes,
        custom_claims,
    }
}

fn string_claim(payload: &Map<String, Value>, name: &str) -> Option<String> {
    payload.get(name).and_then(Value::as_str).map(String::from)
}

fn int_claim(payload: &Map<String, Value>, name: &str) -> Option<i64> {
    payload.get(name).and_then(Value::as_i64)
}

/// `aud` as a set: bare string and one-element array are identical.
fn audience_claim(payload: &Map<String, Value>) -> Vec<String> {
    match payload.get("aud") {
        Some(Value::String(aud)) => vec![aud.clone()],
        Some(Value::Array(auds)) => auds
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

/// A claim holding strings, as array or single string.
fn string_array_claim(payload: &Map<String, Value>, name: &str) -> Vec<String> {
    match payload.get(name) {
        Some(Value::String(one)) => vec![one.clone()],
        Some(Value::Array(many)) => many
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

/// Scopes arrive either as an OAuth space-separated string or an array.
fn scope_claim(payload: &Map<String, Value>, name: &str) -> Vec<String> {
    match payload.get(name) {
        Some(Value::String(joined)) => joined
            .split_whitespace()
            .map(String::from)
            .collect(),
        Some(Value::Array(many)) => many
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}
