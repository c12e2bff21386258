//! # Tokengate Core - OAuth 2.1 Resource Server Pipeline
//!
//! The authentication and token-lifecycle core of the Tokengate MCP
//! gateway:
//!
//! - **JWT validation** - JWKS-backed signature verification against a
//!   registry of trusted IDPs, selected solely by `(issuer, audience)`
//! - **Role mapping** - infallible projection of IDP role claims onto
//!   framework roles (`admin > user > guest`, unassigned rejects)
//! - **Sessions** - immutable, versioned, zero-default-permission records
//! - **Token exchange** - RFC 8693 delegation tokens with a session-bound,
//!   TTL'd, capacity-capped cache
//! - **Audit** - append-only, queue-decoupled, write-only
//!
//! ## Architecture
//!
//! - `config` - configuration types and validation
//! - `idp` - trusted IDP registry
//! - `jwt` - JWKS cache and JWT validator
//! - `roles` - role mapper
//! - `session` - session records and migration
//! - `exchange` / `cache` - RFC 8693 exchange and its cache
//! - `service` - the authentication pipeline
//! - `authz` - soft and hard authorization checks
//! - `audit` - audit entries, sinks, and the audit service
//! - `context` - the `CoreContext` dependency container
//!
//! This crate never references the MCP transport: the dependency gradient
//! is strictly core → delegation → server.

pub mod audit;
pub mod authz;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod exchange;
pub mod idp;
pub mod jwt;
pub mod roles;
pub mod service;
pub mod session;

#[doc(inline)]
pub use audit::{AuditEntry, AuditService, AuditSink, MemoryAuditSink, TracingAuditSink};
#[doc(inline)]
pub use cache::{CacheStats, TokenCache};
#[doc(inline)]
pub use config::{GatewayConfig, IdpConfig, JwtAlgorithm};
#[doc(inline)]
pub use context::CoreContext;
#[doc(inline)]
pub use error::{AuthError, AuthResult};
#[doc(inline)]
pub use exchange::{ExchangeRequest, TokenExchangeService};
#[doc(inline)]
pub use idp::IdpRegistry;
#[doc(inline)]
pub use jwt::{JwtValidator, MappedClaims, ValidatedToken};
#[doc(inline)]
pub use roles::{Role, RoleMapResult, RoleMapper};
#[doc(inline)]
pub use service::{AuthenticationResult, AuthenticationService};
#[doc(inline)]
pub use session::{SESSION_SCHEMA_VERSION, SessionManager, UserSession};
