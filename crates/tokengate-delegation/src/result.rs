//! Delegation call results

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tokengate_core::audit::AuditEntry;

/// Outcome of one delegated backend call.
///
/// `success` is the registry's ground truth: the registry re-derives its
/// audit from this field, not from whatever the module wrote into
/// `audit_trail`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationResult<T = Value> {
    /// Whether the backend call succeeded
    pub success: bool,
    /// Payload on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Client-safe error description on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The module's self-reported audit trail; replaced by the registry
    /// with an enhanced copy before the result leaves the trust boundary
    pub audit_trail: AuditEntry,
}

impl<T> DelegationResult<T> {
    /// A successful result carrying `data`.
    pub fn ok(data: T, audit_trail: AuditEntry) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            audit_trail,
        }
    }

    /// A failed result carrying a client-safe error.
    pub fn fail(error: impl Into<String>, audit_trail: AuditEntry) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            audit_trail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_constructors() {
        let ok: DelegationResult = DelegationResult::ok(
            serde_json::json!({"rows": 3}),
            AuditEntry::new("delegation:sql", "query", true),
        );
        assert!(ok.success);
        assert!(ok.error.is_none());

        let fail: DelegationResult =
            DelegationResult::fail("backend refused", AuditEntry::new("delegation:sql", "query", false));
        assert!(!fail.success);
        assert!(fail.data.is_none());
    }
}
