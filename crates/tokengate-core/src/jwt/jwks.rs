//! JWKS (JSON Web Key Set) fetching and caching
//!
//! One [`JwksClient`] exists per trusted IDP. Keys are cached with a TTL
//! (default 10 minutes); an unknown `kid` triggers an early refresh once the
//! cache is older than 60 seconds, which tolerates key rotation without
//! hammering the IDP. Refreshes are single-flight per client.
//!
//! # Security Considerations
//!
//! - HTTPS required for JWKS endpoints (HTTP only for localhost)
//! - Refresh rate limiting prevents DoS amplification against the IDP
//! - Fetches carry a hard deadline so a slow IDP cannot stall requests

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{AuthError, AuthResult};

/// Default cache TTL
const DEFAULT_TTL: Duration = Duration::from_secs(600);
/// Minimum cache age before an unknown `kid` forces a refresh
const ROTATION_REFRESH_AGE: Duration = Duration::from_secs(60);
/// Outbound fetch deadline
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: JwkSet,
    fetched_at: Instant,
}

impl CachedJwks {
    fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// JWKS client for one IDP endpoint.
#[derive(Debug)]
pub struct JwksClient {
    jwks_uri: String,
    cache: RwLock<Option<CachedJwks>>,
    /// Held across a fetch so concurrent refreshes collapse into one
    refresh_lock: Mutex<()>,
    http_client: reqwest::Client,
    cache_ttl: Duration,
}

impl JwksClient {
    /// Create a client with the default TTL.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the HTTP client cannot be built
    /// or the URI scheme is not HTTPS (HTTP is tolerated for localhost).
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use tokengate_core::jwt::JwksClient;
    /// # tokio_test::block_on(async {
    /// let client = JwksClient::new(
    ///     "https://idp.example.com/realms/mcp/jwks".to_string(),
    /// )?;
    ///
    /// // Resolve a signing key; the key set is cached for 10 minutes.
    /// let jwk = client.get_key("signing-key-1").await?;
    /// # let _ = jwk;
    /// # Ok::<(), tokengate_core::error::AuthError>(())
    /// # });
    /// ```
    pub fn new(jwks_uri: String) -> AuthResult<Self> {
        Self::with_ttl(jwks_uri, DEFAULT_TTL)
    }

    /// Create a client with a custom TTL (tests and aggressive rotation).
    pub fn with_ttl(jwks_uri: String, cache_ttl: Duration) -> AuthResult<Self> {
        if !jwks_uri.starts_with("https://")
            && !jwks_uri.starts_with("http://localhost")
            && !jwks_uri.starts_with("http://127.0.0.1")
        {
            return Err(AuthError::configuration(format!(
                "JWKS endpoint must use HTTPS (HTTP only allowed for localhost): {jwks_uri}"
            )));
        }
        let http_client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| AuthError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            jwks_uri,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            http_client,
            cache_ttl,
        })
    }

    /// Resolve a signing key by `kid`.
    ///
    /// Serves from cache while fresh. When the `kid` is absent and the
    /// cache is older than 60 seconds, one refresh is attempted before
    /// giving up: the IDP may have rotated keys.
    pub async fn get_key(&self, kid: &str) -> AuthResult<Jwk> {
        // Fast path: fresh cache, known kid.
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if let Some(key) = cached.jwks.find(kid) {
                    if cached.age() < self.cache_ttl {
                        return Ok(key.clone());
                    }
                } else if cached.age() < ROTATION_REFRESH_AGE {
                    // Recently fetched and the kid is simply not there.
                    debug!(kid, jwks_uri = %self.jwks_uri, "kid absent from fresh JWKS");
                    return Err(AuthError::SignatureInvalid);
                }
            }
        }

        let jwks = self.refresh().await?;
        jwks.find(kid).cloned().ok_or_else(|| {
            warn!(kid, jwks_uri = %self.jwks_uri, "kid not present after JWKS refresh");
            AuthError::SignatureInvalid
        })
    }

    /// Fetch the key set, single-flight.
    ///
    /// Waiters that arrive while a fetch is in flight reuse its result
    /// instead of issuing their own request.
    pub async fn refresh(&self) -> AuthResult<JwkSet> {
        let _flight = self.refresh_lock.lock().await;

        // Another flight may have refreshed while this one waited.
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.age() < ROTATION_REFRESH_AGE {
                    return Ok(cached.jwks.clone());
                }
            }
        }

        let jwks = self.fetch().await?;
        {
            let mut cache = self.cache.write().await;
            *cache = Some(CachedJwks {
                jwks: jwks.clone(),
                fetched_at: Instant::now(),
            });
        }
        Ok(jwks)
    }

    async fn fetch(&self) -> AuthResult<JwkSet> {
        info!(jwks_uri = %self.jwks_uri, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| {
                warn!(jwks_uri = %self.jwks_uri, error = %e, "JWKS fetch failed");
                AuthError::internal(format!("JWKS fetch failed: {e}"))
            })?;

        if !response.status().is_success() {
            warn!(
                jwks_uri = %self.jwks_uri,
                status = %response.status(),
                "JWKS endpoint returned error status"
            );
            return Err(AuthError::internal(format!(
                "JWKS endpoint returned status {}",
                response.status()
            )));
        }

        let jwks: JwkSet = response.json().await.map_err(|e| {
            warn!(jwks_uri = %self.jwks_uri, error = %e, "JWKS body is not a key set");
            AuthError::internal(format!("invalid JWKS format: {e}"))
        })?;

        debug!(
            jwks_uri = %self.jwks_uri,
            key_count = jwks.keys.len(),
            "JWKS fetched"
        );
        Ok(jwks)
    }

    /// The endpoint this client fetches from
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Drop the cached key set (tests)
    pub async fn clear_cache(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }

    /// Probe the endpoint once; used by the boundary's fail-fast startup check.
    pub async fn probe(&self) -> AuthResult<usize> {
        let jwks = self.refresh().await?;
        Ok(jwks.keys.len())
    }

    /// Inject a pre-fetched key set (tests)
    #[doc(hidden)]
    pub async fn prime(&self, jwks: JwkSet) {
        let mut cache = self.cache.write().await;
        *cache = Some(CachedJwks {
            jwks,
            fetched_at: Instant::now(),
        });
    }
}

/// Map of IDP name to shared JWKS client.
pub type JwksClients = std::collections::HashMap<String, Arc<JwksClient>>;
