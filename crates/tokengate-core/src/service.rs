//! Authentication pipeline orchestration
//!
//! `authenticate` chains validation, role mapping, token exchange, and
//! session construction. Policy outcomes (an unassigned role) travel
//! inside the result - the caller decides how to present them. Only
//! cryptographic/time failures and a failed token exchange propagate as
//! errors, each audited before rethrow.
//!
//! When an IDP is configured for token exchange, the exchange happens
//! *before* session creation and roles are re-mapped from the exchanged
//! token's claims: authority for downstream calls comes from the TE-JWT,
//! which closes the window between MCP-tool authorization and backend
//! delegation.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::audit::{AuditEntry, AuditService, actions};
use crate::error::AuthResult;
use crate::exchange::{ExchangeRequest, TokenExchangeService};
use crate::idp::IdpRegistry;
use crate::jwt::validator::{JwtValidator, apply_claim_mappings};
use crate::jwt::decode_unverified;
use crate::roles::RoleMapper;
use crate::session::{SessionManager, UserSession};

/// Outcome of authentication. `rejected` mirrors `session.rejected`; the
/// middleware checks both (dual rejection check).
#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    /// The constructed session
    pub session: UserSession,
    /// True when the role mapped to unassigned
    pub rejected: bool,
    /// Why, when rejected
    pub rejection_reason: Option<String>,
}

/// The authentication service.
#[derive(Debug, Clone)]
pub struct AuthenticationService {
    registry: Arc<IdpRegistry>,
    validator: JwtValidator,
    role_mapper: RoleMapper,
    session_manager: SessionManager,
    exchange: Option<Arc<TokenExchangeService>>,
    audit: AuditService,
}

impl AuthenticationService {
    /// Assemble the pipeline. `exchange` is optional: without it, IDPs
    /// configured for token exchange authenticate without a TE-JWT.
    pub fn new(
        registry: Arc<IdpRegistry>,
        exchange: Option<Arc<TokenExchangeService>>,
        audit: AuditService,
    ) -> Self {
        let validator = JwtValidator::new(Arc::clone(&registry));
        Self {
            registry,
            validator,
            role_mapper: RoleMapper::new(),
            session_manager: SessionManager::new(),
            exchange,
            audit,
        }
    }

    /// Authenticate a bearer token.
    ///
    /// `transport_session_id` is the `Mcp-Session-Id` when the client
    /// echoed one; it scopes the exchange cache.
    ///
    /// # Errors
    ///
    /// JWT cryptographic/time failures and `TokenExchangeFailed`; both are
    /// audited before propagating. An unassigned role is NOT an error -
    /// it returns `Ok` with `rejected = true`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use std::sync::Arc;
    /// # use tokengate_core::audit::{AuditService, TracingAuditSink};
    /// # use tokengate_core::config::GatewayConfig;
    /// # use tokengate_core::idp::IdpRegistry;
    /// # use tokengate_core::service::AuthenticationService;
    /// # tokio_test::block_on(async {
    /// let config = GatewayConfig::from_file("config.json")?;
    /// let audit = AuditService::new(Arc::new(TracingAuditSink), 1024);
    /// let registry = Arc::new(IdpRegistry::from_config(config.auth.trusted_idps.clone())?);
    /// let service = AuthenticationService::new(registry, None, audit);
    ///
    /// let result = service.authenticate("eyJhbGciOiJSUzI1NiIs...", None).await?;
    /// if result.rejected {
    ///     println!("no usable role: {:?}", result.rejection_reason);
    /// }
    /// # Ok::<(), tokengate_core::error::AuthError>(())
    /// # });
    /// ```
    pub async fn authenticate(
        &self,
        token: &str,
        transport_session_id: Option<&str>,
    ) -> AuthResult<AuthenticationResult> {
        let validated = match self.validator.validate(token).await {
            Ok(validated) => validated,
            Err(e) => {
                self.audit.record(
                    AuditEntry::new("auth:service", actions::AUTHENTICATION_FAILURE, false)
                        .with_reason(e.to_string()),
                );
                return Err(e);
            }
        };

        let idp = self
            .registry
            .by_name(&validated.idp_name)
            .ok_or_else(|| crate::error::AuthError::internal("validated IDP vanished"))?;

        let mut role_result = self
            .role_mapper
            .map(&validated.mapped.roles, &idp.role_mappings);

        // Exchange before session creation, so the session never carries
        // rights the TE-JWT does not ratify.
        let mut delegation_token: Option<String> = None;
        let mut delegation_claims: Option<Map<String, Value>> = None;
        if idp.token_exchange.is_some() {
            if let Some(exchange) = &self.exchange {
                let te_jwt = match exchange
                    .exchange(ExchangeRequest {
                        session_id: transport_session_id,
                        requestor_jwt: token,
                        idp,
                        audience: None,
                        scope: None,
                    })
                    .await
                {
                    Ok(te_jwt) => te_jwt,
                    Err(e) => {
                        warn!(idp = %idp.name, error = %e, "token exchange failed during authentication");
                        self.audit.record(
                            AuditEntry::new(
                                "auth:service",
                                actions::AUTHENTICATION_FAILURE,
                                false,
                            )
                            .with_reason(e.to_string()),
                        );
                        return Err(e);
                    }
                };

                let te_payload = decode_unverified(&te_jwt)?;

                // Authority comes from the exchanged token when present.
                let te_mapped = apply_claim_mappings(&te_payload, &idp.claim_mappings);
                if !te_mapped.roles.is_empty() {
                    role_result = self.role_mapper.map(&te_mapped.roles, &idp.role_mappings);
                }

                delegation_claims = Some(te_payload);
                delegation_token = Some(te_jwt);
            }
        }

        let session = self.session_manager.create(
            &validated.payload,
            &validated.mapped,
            &role_result,
            delegation_token.as_deref(),
            delegation_claims.as_ref(),
        );

        let rejected = session.rejected;
        let rejection_reason = if rejected {
            Some(
                role_result
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "User has no valid roles assigned (unassigned role)".into()),
            )
        } else {
            None
        };

        let mut entry = AuditEntry::new(
            "auth:service",
            if rejected {
                actions::AUTHENTICATION_FAILURE
            } else {
                actions::AUTHENTICATION_SUCCESS
            },
            !rejected,
        )
        .with_user(session.user_id.clone())
        .with_metadata("idp", serde_json::json!(validated.idp_name))
        .with_metadata("role", serde_json::json!(session.role.as_str()));
        if let Some(reason) = &rejection_reason {
            entry = entry.with_reason(reason.clone());
        }
        self.audit.record(entry);

        debug!(
            user_id = %session.user_id,
            role = %session.role,
            rejected,
            "authentication complete"
        );

        Ok(AuthenticationResult {
            session,
            rejected,
            rejection_reason,
        })
    }
}
