//! Delegation module contract
//!
//! A delegation module performs a backend call under the end user's
//! identity: SQL `EXECUTE AS`, Kerberos S4U2Self/S4U2Proxy, a downstream
//! OAuth API with the session's delegation token. Concrete backends live
//! outside this crate; everything here is the contract the registry
//! dispatches through.

use async_trait::async_trait;
use serde_json::Value;

use tokengate_core::session::UserSession;

use crate::result::DelegationResult;

/// Faults in module lifecycle management.
///
/// Delegation *call* failures are not errors - they travel inside
/// [`DelegationResult`] so the registry can audit them.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DelegationError {
    /// Module configuration rejected at initialize
    #[error("Module configuration error: {message}")]
    Configuration {
        /// What is wrong
        message: String,
    },

    /// A module with this name is already registered
    #[error("Module '{name}' is already registered")]
    DuplicateModule {
        /// The conflicting name
        name: String,
    },
}

impl DelegationError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// A pluggable backend delegate.
///
/// Modules sit inside the core trust boundary but are treated as
/// potentially buggy or compromised: the registry re-verifies their
/// self-reported outcomes (see `registry` module).
#[async_trait]
pub trait DelegationModule: Send + Sync + std::fmt::Debug {
    /// Unique module name; also the dispatch key
    fn name(&self) -> &str;

    /// Backend kind, e.g. `sql`, `kerberos`, `http-api`
    fn module_type(&self) -> &str;

    /// Apply module configuration before first use.
    ///
    /// # Errors
    ///
    /// Configuration errors abort startup.
    async fn initialize(&self, config: &Value) -> Result<(), DelegationError>;

    /// Perform a backend call as the session's user.
    ///
    /// Implementations must fill `audit_trail.source` with
    /// `delegation:<name>`; the registry backfills it if they forget.
    async fn delegate(&self, session: &UserSession, action: &str, params: &Value)
    -> DelegationResult;

    /// Whether the session may see and call this module at all.
    fn validate_access(&self, session: &UserSession) -> bool;

    /// Liveness of the backend connection.
    async fn health_check(&self) -> bool;

    /// Release backend resources. Called on unregister and shutdown.
    async fn destroy(&self);

    /// OAuth scopes this module needs; aggregated into the protected
    /// resource metadata's `scopes_supported`.
    fn scopes(&self) -> Vec<String> {
        Vec::new()
    }
}
