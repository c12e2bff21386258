//! Delegation registry with trust-boundary enforcement
//!
//! The registry is the only path from a tool handler to a delegation
//! module. On every call it re-derives the outcome from the one signal it
//! actually observes - `result.success` - and records any disagreement
//! with the module's self-reported audit trail as a security event. A
//! lying module cannot make the audit stream say its call succeeded.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use tokengate_core::audit::{AuditEntry, AuditService, actions};
use tokengate_core::session::UserSession;

use crate::module::{DelegationError, DelegationModule};
use crate::result::DelegationResult;

/// Registry of delegation modules, keyed by name.
#[derive(Debug)]
pub struct DelegationRegistry {
    modules: RwLock<HashMap<String, Arc<dyn DelegationModule>>>,
    audit: AuditService,
}

impl DelegationRegistry {
    /// Create an empty registry.
    pub fn new(audit: AuditService) -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            audit,
        }
    }

    /// Register a module.
    ///
    /// # Errors
    ///
    /// [`DelegationError::DuplicateModule`] when the name is taken.
    pub async fn register(&self, module: Arc<dyn DelegationModule>) -> Result<(), DelegationError> {
        let name = module.name().to_string();
        let mut modules = self.modules.write().await;
        if modules.contains_key(&name) {
            return Err(DelegationError::DuplicateModule { name });
        }
        debug!(module = %name, module_type = %module.module_type(), "delegation module registered");
        modules.insert(name, module);
        Ok(())
    }

    /// Remove a module, calling its `destroy` hook.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = {
            let mut modules = self.modules.write().await;
            modules.remove(name)
        };
        match removed {
            Some(module) => {
                module.destroy().await;
                debug!(module = %name, "delegation module unregistered");
                true
            }
            None => false,
        }
    }

    /// Fetch a module by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn DelegationModule>> {
        self.modules.read().await.get(name).cloned()
    }

    /// Registered module names, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Union of scopes declared by registered modules, sorted and deduplicated.
    pub async fn scopes_supported(&self) -> Vec<String> {
        let modules = self.modules.read().await;
        let mut scopes: Vec<String> = modules.values().flat_map(|m| m.scopes()).collect();
        scopes.sort();
        scopes.dedup();
        scopes
    }

    /// Health of every registered module.
    pub async fn aggregate_health(&self) -> HashMap<String, bool> {
        let modules: Vec<Arc<dyn DelegationModule>> =
            self.modules.read().await.values().cloned().collect();
        let mut health = HashMap::new();
        for module in modules {
            health.insert(module.name().to_string(), module.health_check().await);
        }
        health
    }

    /// Destroy every module. Called on process shutdown.
    pub async fn shutdown(&self) {
        let modules: Vec<Arc<dyn DelegationModule>> = {
            let mut map = self.modules.write().await;
            map.drain().map(|(_, module)| module).collect()
        };
        for module in modules {
            module.destroy().await;
        }
    }

    /// Dispatch a delegated call with trust-boundary enforcement.
    ///
    /// Rejected sessions fail closed before any module code runs. The
    /// returned result carries the registry's enhanced audit trail in
    /// place of the module's own.
    pub async fn delegate(
        &self,
        name: &str,
        session: &UserSession,
        action: &str,
        params: &Value,
    ) -> DelegationResult {
        if session.rejected {
            let entry = AuditEntry::new("delegation:registry", "delegate", false)
                .with_user(session.user_id.clone())
                .with_reason("rejected session refused before module dispatch")
                .with_metadata("module", serde_json::json!(name));
            self.audit.record(entry.clone());
            return DelegationResult::fail("Unauthorized: session is rejected", entry);
        }

        let Some(module) = self.get(name).await else {
            warn!(module = %name, "delegation module not found");
            let entry = AuditEntry::new("delegation:registry", "delegate", false)
                .with_user(session.user_id.clone())
                .with_reason(format!("module '{name}' not registered"))
                .with_metadata("module", serde_json::json!(name));
            self.audit.record(entry.clone());
            return DelegationResult::fail(format!("Delegation module '{name}' not found"), entry);
        };

        if !module.validate_access(session) {
            let entry = AuditEntry::new("delegation:registry", "delegate", false)
                .with_user(session.user_id.clone())
                .with_reason("module access check refused the session")
                .with_metadata("module", serde_json::json!(name));
            self.audit.record(entry.clone());
            return DelegationResult::fail("Unauthorized: Insufficient permissions", entry);
        }

        let result = module.delegate(session, action, params).await;

        // The registry's ground truth and timestamp.
        let registry_verified_success = result.success;
        let registry_timestamp = Utc::now();
        let module_reported_success = result.audit_trail.success;

        let mut enhanced = result.audit_trail.clone();
        enhanced.module_reported_success = Some(module_reported_success);
        enhanced.registry_verified_success = Some(registry_verified_success);
        enhanced.registry_timestamp = Some(registry_timestamp);
        if enhanced.user_id.is_none() {
            enhanced.user_id = Some(session.user_id.clone());
        }
        if enhanced.source.is_empty() || enhanced.source == "unknown" {
            enhanced.source = format!("delegation:{}", module.name());
        }
        enhanced
            .metadata
            .get_or_insert_with(serde_json::Map::new)
            .insert("action".into(), serde_json::json!(action));

        if module_reported_success != registry_verified_success {
            error!(
                module = %name,
                module_reported = module_reported_success,
                registry_verified = registry_verified_success,
                "delegation module audit disagrees with observed result"
            );
            self.audit.record(
                AuditEntry::new(
                    "delegation:registry:security",
                    actions::TRUST_BOUNDARY_VIOLATION,
                    false,
                )
                .with_user(session.user_id.clone())
                .with_reason("module-reported success disagrees with registry observation")
                .with_metadata("module", serde_json::json!(name))
                .with_metadata(
                    "moduleReportedSuccess",
                    serde_json::json!(module_reported_success),
                )
                .with_metadata(
                    "registryVerifiedSuccess",
                    serde_json::json!(registry_verified_success),
                )
                .with_metadata(
                    "registryTimestamp",
                    serde_json::json!(registry_timestamp.to_rfc3339()),
                ),
            );
        }

        self.audit.record(enhanced.clone());

        DelegationResult {
            success: result.success,
            data: result.data,
            error: result.error,
            audit_trail: enhanced,
        }
    }
}
