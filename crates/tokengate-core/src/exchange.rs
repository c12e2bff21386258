//! RFC 8693 token exchange
//!
//! Exchanges the requestor JWT for an audience-scoped delegation token at
//! the IDP's token endpoint. Results are cached per
//! `(session_id, audience)`; concurrent misses for the same key collapse
//! into a single outbound request (single-flight), so a burst of
//! delegation calls costs one POST.
//!
//! Retry policy: 4xx responses are authoritative and never retried; 5xx
//! and network errors get exactly one retry with jitter, all inside a
//! 5 second wall-clock budget.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::audit::{AuditEntry, AuditService, actions};
use crate::cache::TokenCache;
use crate::config::IdpConfig;
use crate::error::{AuthError, AuthResult};
use crate::jwt::decode_unverified;

/// RFC 8693 grant type
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
/// Subject token type: the requestor bearer JWT
const SUBJECT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";
/// Whole-exchange wall-clock budget
const EXCHANGE_BUDGET: Duration = Duration::from_secs(5);
/// Per-attempt deadline; leaves room for the retry inside the budget
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// One exchange request.
#[derive(Debug)]
pub struct ExchangeRequest<'a> {
    /// Transport session id; enables the cache when present and valid
    pub session_id: Option<&'a str>,
    /// The requestor's bearer JWT (subject token)
    pub requestor_jwt: &'a str,
    /// IDP whose `token_exchange` block drives the call
    pub idp: &'a IdpConfig,
    /// Downstream audience; defaults to the IDP's configured audience
    pub audience: Option<&'a str>,
    /// Scope override; defaults to the IDP's configured scope
    pub scope: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
}

/// Token exchange service backed by the session-bound cache.
#[derive(Debug)]
pub struct TokenExchangeService {
    http_client: reqwest::Client,
    cache: Option<Arc<TokenCache>>,
    audit: AuditService,
    /// In-flight exchanges keyed `(session_id, audience)`
    flights: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl TokenExchangeService {
    /// Create the service.
    ///
    /// # Errors
    ///
    /// Internal error when the HTTP client cannot be built.
    pub fn new(cache: Option<Arc<TokenCache>>, audit: AuditService) -> AuthResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .build()
            .map_err(|e| AuthError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            cache,
            audit,
            flights: DashMap::new(),
        })
    }

    /// Exchange the requestor token for a delegation token.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenExchangeFailed`] on endpoint failure,
    /// [`AuthError::MissingClaim`] when the exchanged token lacks the
    /// IDP's `required_claim`, configuration error when the IDP has no
    /// `token_exchange` block.
    pub async fn exchange(&self, request: ExchangeRequest<'_>) -> AuthResult<String> {
        let te = request.idp.token_exchange.as_ref().ok_or_else(|| {
            AuthError::configuration(format!(
                "IDP '{}' has no tokenExchange configuration",
                request.idp.name
            ))
        })?;
        let audience = request.audience.unwrap_or(&te.audience).to_string();

        // Cache consult before anything leaves the process.
        if let Some(token) = self.cache_get(request.session_id, &audience, request.idp) {
            return Ok(token);
        }

        // Single-flight per (session, audience): late arrivals wait on the
        // winner's lock, then hit the cache it populated.
        let flight_key = (
            request.session_id.unwrap_or_default().to_string(),
            audience.clone(),
        );
        let flight = self
            .flights
            .entry(flight_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = flight.lock().await;

        if let Some(token) = self.cache_get(request.session_id, &audience, request.idp) {
            self.release_flight(&flight_key, &flight);
            return Ok(token);
        }

        let result = tokio::time::timeout(
            EXCHANGE_BUDGET,
            self.exchange_with_retry(&request, te, &audience),
        )
        .await
        .unwrap_or_else(|_| {
            Err(AuthError::TokenExchangeFailed {
                upstream_status: None,
                detail: "exchange exceeded wall-clock budget".into(),
            })
        });

        match &result {
            Ok(token) => {
                self.cache_store(request.session_id, &audience, token, te);
                self.audit.record(
                    AuditEntry::new("auth:token-exchange", actions::TOKEN_EXCHANGE_SUCCESS, true)
                        .with_metadata("audience", serde_json::json!(audience))
                        .with_metadata("idp", serde_json::json!(request.idp.name)),
                );
            }
            Err(e) => {
                self.audit.record(
                    AuditEntry::new("auth:token-exchange", actions::TOKEN_EXCHANGE_FAILURE, false)
                        .with_reason(e.to_string())
                        .with_metadata("audience", serde_json::json!(audience))
                        .with_metadata("idp", serde_json::json!(request.idp.name)),
                );
            }
        }

        self.release_flight(&flight_key, &flight);
        result
    }

    fn release_flight(&self, key: &(String, String), flight: &Arc<Mutex<()>>) {
        // Drop the map entry once no other waiter holds it.
        self.flights
            .remove_if(key, |_, in_map| Arc::ptr_eq(in_map, flight) && Arc::strong_count(in_map) <= 2);
    }

    fn cache_get(
        &self,
        session_id: Option<&str>,
        audience: &str,
        idp: &IdpConfig,
    ) -> Option<String> {
        let cache = self.cache.as_ref()?;
        let session_id = session_id?;
        let token = cache.get(session_id, audience)?;
        debug!(audience, "delegation token served from cache");
        self.audit.record(
            AuditEntry::new("auth:token-exchange", actions::CACHE_HIT, true)
                .with_metadata("audience", serde_json::json!(audience))
                .with_metadata("idp", serde_json::json!(idp.name)),
        );
        Some(token)
    }

    fn cache_store(
        &self,
        session_id: Option<&str>,
        audience: &str,
        token: &str,
        te: &crate::config::TokenExchangeConfig,
    ) {
        let (Some(cache), Some(session_id)) = (self.cache.as_ref(), session_id) else {
            return;
        };
        // TTL never outlives the token itself.
        let configured = Duration::from_secs(te.cache.ttl_seconds);
        let ttl = token_remaining_lifetime(token)
            .map_or(configured, |remaining| configured.min(remaining));
        if let Err(e) = cache.set(session_id, audience, token.to_string(), Some(ttl)) {
            warn!(error = %e, "failed to cache exchanged token");
        }
    }

    async fn exchange_with_retry(
        &self,
        request: &ExchangeRequest<'_>,
        te: &crate::config::TokenExchangeConfig,
        audience: &str,
    ) -> AuthResult<String> {
        match self.exchange_once(request, te, audience).await {
            Err(AuthError::TokenExchangeFailed {
                upstream_status,
                detail,
            }) if retryable(upstream_status) => {
                // One retry with jitter; 4xx never reaches here.
                let jitter = Duration::from_millis(50 + fastrand::u64(0..200));
                debug!(
                    upstream_status,
                    detail = %detail,
                    jitter_ms = jitter.as_millis() as u64,
                    "token exchange retrying once"
                );
                tokio::time::sleep(jitter).await;
                self.exchange_once(request, te, audience).await
            }
            other => other,
        }
    }

    async fn exchange_once(
        &self,
        request: &ExchangeRequest<'_>,
        te: &crate::config::TokenExchangeConfig,
        audience: &str,
    ) -> AuthResult<String> {
        let scope = request.scope.or(te.scope.as_deref()).unwrap_or_default();
        let mut form = vec![
            ("grant_type", GRANT_TYPE),
            ("client_id", te.client_id.as_str()),
            ("client_secret", te.client_secret.expose_secret().as_str()),
            ("subject_token", request.requestor_jwt),
            ("subject_token_type", SUBJECT_TOKEN_TYPE),
            ("audience", audience),
        ];
        if !scope.is_empty() {
            form.push(("scope", scope));
        }

        let response = self
            .http_client
            .post(&te.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed {
                upstream_status: None,
                detail: format!("token endpoint unreachable: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                endpoint = %te.token_endpoint,
                status = %status,
                "token exchange rejected by IDP"
            );
            return Err(AuthError::TokenExchangeFailed {
                upstream_status: Some(status.as_u16()),
                detail: format!("token endpoint returned {status}"),
            });
        }

        let body: TokenEndpointResponse =
            response.json().await.map_err(|e| AuthError::TokenExchangeFailed {
                upstream_status: Some(status.as_u16()),
                detail: format!("token endpoint body unreadable: {e}"),
            })?;

        // The TE-JWT is consumed by the downstream resource, not trusted
        // for identity here, so no signature verification: decode only to
        // enforce the required claim.
        if let Some(required) = &te.required_claim {
            let payload = decode_unverified(&body.access_token)?;
            if !payload.contains_key(required.as_str()) {
                return Err(AuthError::MissingClaim {
                    claim: required.clone(),
                });
            }
        }

        Ok(body.access_token)
    }
}

/// Remaining lifetime from the token's `exp`, when it carries one.
fn token_remaining_lifetime(token: &str) -> Option<Duration> {
    let payload = decode_unverified(token).ok()?;
    let exp = payload.get("exp").and_then(serde_json::Value::as_i64)?;
    let remaining = exp - chrono::Utc::now().timestamp();
    (remaining > 0).then(|| Duration::from_secs(remaining as u64))
}

fn retryable(upstream_status: Option<u16>) -> bool {
    match upstream_status {
        // Network error, no response.
        None => true,
        Some(status) => status >= 500,
    }
}
