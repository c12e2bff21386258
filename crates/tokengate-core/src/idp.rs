//! Trusted IDP registry
//!
//! Loaded once at startup from validated configuration and immutable for
//! the process lifetime. `(issuer, audience)` is the sole selection key:
//! user identity never influences which IDP validates a token.

use std::sync::Arc;

use tracing::debug;

use crate::config::IdpConfig;
use crate::error::{AuthError, AuthResult};
use crate::jwt::jwks::{JwksClient, JwksClients};

/// Registry of trusted identity providers.
#[derive(Debug)]
pub struct IdpRegistry {
    idps: Vec<IdpConfig>,
    jwks_clients: JwksClients,
}

impl IdpRegistry {
    /// Build the registry from validated configuration, constructing one
    /// JWKS client per IDP.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a JWKS endpoint is malformed
    /// (non-HTTPS outside localhost).
    pub fn from_config(idps: Vec<IdpConfig>) -> AuthResult<Self> {
        let mut jwks_clients = JwksClients::new();
        for idp in &idps {
            let client = JwksClient::new(idp.jwks_uri.clone())?;
            jwks_clients.insert(idp.name.clone(), Arc::new(client));
        }
        Ok(Self { idps, jwks_clients })
    }

    /// Resolve an IDP by `(issuer, audience)`.
    ///
    /// `audiences` is every value the token's `aud` claim carries (a bare
    /// string arrives as a one-element slice); the match is set-membership
    /// against the configured audience.
    ///
    /// # Errors
    ///
    /// [`AuthError::UntrustedIssuer`] when no IDP has the issuer;
    /// [`AuthError::UntrustedAudience`] when the issuer is known but no
    /// configured audience appears in `audiences`.
    pub fn find(&self, issuer: &str, audiences: &[String]) -> AuthResult<&IdpConfig> {
        let mut issuer_known = false;
        for idp in &self.idps {
            if idp.issuer != issuer {
                continue;
            }
            issuer_known = true;
            if audiences.iter().any(|aud| *aud == idp.audience) {
                debug!(idp = %idp.name, issuer, "IDP resolved");
                return Ok(idp);
            }
        }
        if issuer_known {
            Err(AuthError::UntrustedAudience {
                issuer: issuer.to_string(),
            })
        } else {
            Err(AuthError::UntrustedIssuer {
                issuer: issuer.to_string(),
            })
        }
    }

    /// Look up an IDP by its unique name.
    pub fn by_name(&self, name: &str) -> Option<&IdpConfig> {
        self.idps.iter().find(|idp| idp.name == name)
    }

    /// The first configured IDP; its endpoints are mirrored on the
    /// authorization-server metadata document.
    pub fn primary(&self) -> &IdpConfig {
        // Config validation guarantees at least one IDP.
        &self.idps[0]
    }

    /// All trusted IDPs, in configuration order.
    pub fn all(&self) -> &[IdpConfig] {
        &self.idps
    }

    /// JWKS client for an IDP.
    pub fn jwks_client(&self, idp_name: &str) -> Option<Arc<JwksClient>> {
        self.jwks_clients.get(idp_name).cloned()
    }

    /// Probe every JWKS endpoint once; the boundary calls this at startup
    /// and refuses to serve when an IDP is unreachable.
    pub async fn probe_all(&self) -> AuthResult<()> {
        for idp in &self.idps {
            let client = self
                .jwks_clients
                .get(&idp.name)
                .ok_or_else(|| AuthError::internal(format!("no JWKS client for {}", idp.name)))?;
            let keys = client.probe().await?;
            tracing::info!(idp = %idp.name, key_count = keys, "IDP JWKS reachable");
        }
        Ok(())
    }
}
