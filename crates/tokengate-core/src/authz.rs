//! Authorization checks over a session
//!
//! Two tiers: soft checks return booleans (used for tool visibility),
//! hard checks return structured errors with status codes (used inside
//! handlers). A rejected session fails every check, soft or hard - the
//! rejected state is terminal.

use crate::error::{AuthError, AuthResult};
use crate::roles::Role;
use crate::session::UserSession;

/// Whether the session is live and usable.
pub fn is_authenticated(session: &UserSession) -> bool {
    !session.rejected && session.role != Role::Unassigned
}

/// Whether the session holds `role` - framework role name or custom role.
pub fn has_role(session: &UserSession, role: &str) -> bool {
    if !is_authenticated(session) {
        return false;
    }
    session.role.as_str() == role || session.custom_roles.iter().any(|custom| custom == role)
}

/// Whether the session holds at least one of `roles`.
pub fn has_any_role(session: &UserSession, roles: &[&str]) -> bool {
    roles.iter().any(|role| has_role(session, role))
}

/// Whether the session holds every one of `roles`.
pub fn has_all_roles(session: &UserSession, roles: &[&str]) -> bool {
    is_authenticated(session) && roles.iter().all(|role| has_role(session, role))
}

/// Hard check: the session must be live.
///
/// # Errors
///
/// [`AuthError::UnassignedRole`] (403) otherwise.
pub fn require_auth(session: &UserSession) -> AuthResult<()> {
    if is_authenticated(session) {
        Ok(())
    } else {
        Err(AuthError::UnassignedRole)
    }
}

/// Hard check: the session must hold `role`.
///
/// # Errors
///
/// [`AuthError::InsufficientPermissions`] (403) otherwise.
pub fn require_role(session: &UserSession, role: &str) -> AuthResult<()> {
    require_auth(session)?;
    if has_role(session, role) {
        Ok(())
    } else {
        Err(AuthError::InsufficientPermissions {
            required: role.to_string(),
        })
    }
}

/// Hard check: the session must hold at least one of `roles`.
///
/// # Errors
///
/// [`AuthError::InsufficientPermissions`] (403) otherwise.
pub fn require_any_role(session: &UserSession, roles: &[&str]) -> AuthResult<()> {
    require_auth(session)?;
    if has_any_role(session, roles) {
        Ok(())
    } else {
        Err(AuthError::InsufficientPermissions {
            required: format!("any of [{}]", roles.join(", ")),
        })
    }
}

/// Hard check: the session must hold every one of `roles`.
///
/// # Errors
///
/// [`AuthError::InsufficientPermissions`] (403) otherwise.
pub fn require_all_roles(session: &UserSession, roles: &[&str]) -> AuthResult<()> {
    require_auth(session)?;
    if has_all_roles(session, roles) {
        Ok(())
    } else {
        Err(AuthError::InsufficientPermissions {
            required: format!("all of [{}]", roles.join(", ")),
        })
    }
}
