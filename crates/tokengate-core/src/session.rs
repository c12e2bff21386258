//! Authenticated session records
//!
//! A [`UserSession`] is the immutable authorization record produced once
//! per authenticated request. Authority is carried entirely in token
//! claims: the session holds a framework role and custom roles, and
//! deliberately has **no permission list** - any `permissions` field found
//! in older serialized sessions is dropped during migration. There is no
//! server-side permission table to reintroduce one from.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::jwt::validator::MappedClaims;
use crate::roles::{Role, RoleMapResult};

/// Current session schema version.
pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// Immutable per-request authorization record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    /// Schema version stamped at creation; `migrate` backfills older records
    #[serde(rename = "_version")]
    pub version: u32,
    /// Fresh UUIDv4 per session
    pub session_id: Uuid,
    /// Stable user id (`sub` unless remapped)
    pub user_id: String,
    /// Human-readable username
    pub username: String,
    /// Legacy account name for downstream impersonation, when mapped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_username: Option<String>,
    /// Framework role
    pub role: Role,
    /// Custom roles selected by the IDP's patterns
    pub custom_roles: Vec<String>,
    /// OAuth scopes
    pub scopes: Vec<String>,
    /// Full requestor JWT payload (verified)
    pub claims: Map<String, Value>,
    /// Delegation-token (TE-JWT) payload, when an exchange happened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_claims: Option<Map<String, Value>>,
    /// Compact TE-JWT, stored verbatim for delegation modules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegation_token: Option<String>,
    /// True iff `role == unassigned`; rejected sessions fail closed everywhere
    pub rejected: bool,
}

impl UserSession {
    /// Whether this session may be handed to a delegation module.
    pub fn is_delegable(&self) -> bool {
        !self.rejected
    }
}

/// Builds sessions from validated tokens and mapping results.
#[derive(Debug, Clone, Default)]
pub struct SessionManager;

impl SessionManager {
    /// Create a session manager.
    pub fn new() -> Self {
        Self
    }

    /// Construct a session.
    ///
    /// Derivations:
    /// - `session_id` is a fresh UUIDv4
    /// - `legacy_username` prefers the TE-JWT's `legacy_name`, falling back
    ///   to the requestor mapping
    /// - `rejected` is derived from the role, never set independently
    pub fn create(
        &self,
        payload: &Map<String, Value>,
        mapped: &MappedClaims,
        role_result: &RoleMapResult,
        delegation_token: Option<&str>,
        delegation_claims: Option<&Map<String, Value>>,
    ) -> UserSession {
        let user_id = mapped
            .user_id
            .clone()
            .or_else(|| payload.get("sub").and_then(Value::as_str).map(String::from))
            .unwrap_or_default();
        let username = payload
            .get("preferred_username")
            .or_else(|| payload.get("name"))
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| user_id.clone());

        let legacy_username = delegation_claims
            .and_then(|claims| claims.get("legacy_name"))
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| mapped.legacy_username.clone());

        let role = role_result.primary;

        UserSession {
            version: SESSION_SCHEMA_VERSION,
            session_id: Uuid::new_v4(),
            user_id,
            username,
            legacy_username,
            role,
            custom_roles: role_result.custom.clone(),
            scopes: mapped.scopes.clone(),
            claims: payload.clone(),
            custom_claims: delegation_claims.cloned(),
            delegation_token: delegation_token.map(String::from),
            rejected: role == Role::Unassigned,
        }
    }

    /// Migrate a raw serialized session to the current schema.
    ///
    /// For `_version < 1`: stamp the version, derive `rejected` from the
    /// role, and drop a stray `permissions` field. Records with an unknown
    /// higher version are accepted as-is.
    pub fn migrate(raw: Value) -> AuthResult<UserSession> {
        let mut raw = match raw {
            Value::Object(map) => map,
            _ => {
                return Err(AuthError::internal(
                    "serialized session is not a JSON object",
                ));
            }
        };

        let version = raw
            .get("_version")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;

        if version < 1 {
            // Legacy records carried a server-side permission list; the
            // zero-default policy drops it on sight.
            raw.remove("permissions");
            raw.insert("_version".into(), Value::from(SESSION_SCHEMA_VERSION));

            let role = raw
                .get("role")
                .and_then(Value::as_str)
                .and_then(Role::from_name)
                .unwrap_or(Role::Unassigned);
            raw.insert("role".into(), Value::from(role.as_str()));
            raw.insert(
                "rejected".into(),
                Value::from(role == Role::Unassigned),
            );
            for field in ["customRoles", "scopes"] {
                raw.entry(field).or_insert_with(|| Value::Array(vec![]));
            }
            raw.entry("claims").or_insert_with(|| Value::Object(Map::new()));
        }

        serde_json::from_value(Value::Object(raw))
            .map_err(|e| AuthError::internal(format!("session migration failed: {e}")))
    }
}
