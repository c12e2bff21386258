//! Role mapping from JWT role claims to framework roles
//!
//! The mapper is the only place raw IDP role values are interpreted. It is
//! infallible by contract: any internal problem downgrades to
//! `Unassigned` with `mapping_failed` set, and an unassigned role later
//! forces session rejection. Comparisons are byte-equal; IDP configurators
//! pick canonical spellings.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RoleMappings;

/// Framework role, strictly ordered `admin > user > guest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full administrative authority
    Admin,
    /// Standard authenticated user
    User,
    /// Read-mostly guest
    Guest,
    /// No bucket matched; the session will be rejected
    Unassigned,
}

impl Role {
    /// Canonical lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
            Self::Guest => "guest",
            Self::Unassigned => "unassigned",
        }
    }

    /// Parse a configured role name (`defaultRole` values)
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            "guest" => Some(Self::Guest),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a mapping pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMapResult {
    /// The framework role that won
    pub primary: Role,
    /// Raw roles selected by the custom patterns, order-preserved, deduplicated
    pub custom: Vec<String>,
    /// True when an internal error forced the Unassigned downgrade
    pub mapping_failed: bool,
    /// Why mapping failed, when it did
    pub failure_reason: Option<String>,
}

/// Maps raw JWT role values onto framework roles.
#[derive(Debug, Clone, Default)]
pub struct RoleMapper;

impl RoleMapper {
    /// Create a mapper.
    pub fn new() -> Self {
        Self
    }

    /// Map raw roles through the IDP's bucket configuration.
    ///
    /// Never fails: pattern compilation errors (already screened at config
    /// validation, but re-screened here) and any other internal problem
    /// yield `Unassigned` with `mapping_failed = true`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tokengate_core::config::RoleMappings;
    /// use tokengate_core::roles::{Role, RoleMapper};
    ///
    /// let mappings = RoleMappings {
    ///     admin: vec!["sys-admin".into()],
    ///     user: vec!["app-user".into()],
    ///     ..Default::default()
    /// };
    ///
    /// let result = RoleMapper::new().map(&["app-user".to_string()], &mappings);
    /// assert_eq!(result.primary, Role::User);
    ///
    /// // No bucket matches and no default: unassigned, never an error.
    /// let result = RoleMapper::new().map(&["billing".to_string()], &mappings);
    /// assert_eq!(result.primary, Role::Unassigned);
    /// ```
    pub fn map(&self, raw_roles: &[String], cfg: &RoleMappings) -> RoleMapResult {
        let primary = Self::primary_role(raw_roles, cfg);

        let (custom, failure) = match Self::custom_roles(raw_roles, cfg) {
            Ok(custom) => (custom, None),
            Err(reason) => (Vec::new(), Some(reason)),
        };

        if let Some(reason) = failure {
            debug!(reason = %reason, "role mapping degraded");
            return RoleMapResult {
                primary: Role::Unassigned,
                custom: Vec::new(),
                mapping_failed: true,
                failure_reason: Some(reason),
            };
        }

        RoleMapResult {
            primary,
            custom,
            mapping_failed: false,
            failure_reason: None,
        }
    }

    /// Strict tie-break: the first bucket in `admin > user > guest` order
    /// whose configured list intersects the raw roles wins.
    fn primary_role(raw_roles: &[String], cfg: &RoleMappings) -> Role {
        let buckets: [(&[String], Role); 3] = [
            (&cfg.admin, Role::Admin),
            (&cfg.user, Role::User),
            (&cfg.guest, Role::Guest),
        ];
        for (configured, role) in buckets {
            if configured.iter().any(|c| raw_roles.iter().any(|r| r == c)) {
                return role;
            }
        }
        cfg.default_role
            .as_deref()
            .and_then(Role::from_name)
            .unwrap_or(Role::Unassigned)
    }

    /// Raw roles filtered through the configured patterns, order-preserved
    /// and deduplicated. No patterns means no custom roles.
    fn custom_roles(raw_roles: &[String], cfg: &RoleMappings) -> Result<Vec<String>, String> {
        if cfg.custom_patterns.is_empty() {
            return Ok(Vec::new());
        }
        let mut matchers = Vec::with_capacity(cfg.custom_patterns.len());
        for pattern in &cfg.custom_patterns {
            let re = regex::Regex::new(pattern)
                .map_err(|e| format!("invalid custom role pattern '{pattern}': {e}"))?;
            matchers.push(re);
        }
        let mut seen = std::collections::HashSet::new();
        let mut custom = Vec::new();
        for role in raw_roles {
            if matchers.iter().any(|re| re.is_match(role)) && seen.insert(role.clone()) {
                custom.push(role.clone());
            }
        }
        Ok(custom)
    }
}
