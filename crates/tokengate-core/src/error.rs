//! Error taxonomy for the gateway core.
//!
//! Every failure the core can surface is one of these kinds, and each kind
//! carries a fixed mapping to `{http_status, code, user_message}` so the
//! boundary never improvises error shapes. User-facing messages are short
//! and non-leaky: no stack traces, file paths, connection strings, or SQL
//! text ever reach a client.

use http::StatusCode;

/// Result type for core operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Authentication, authorization, and token-lifecycle errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No `Authorization: Bearer` header on the request
    #[error("Unauthorized: Missing Authorization header with Bearer token")]
    MissingToken,

    /// Token is not a structurally valid compact JWS
    #[error("Invalid JWT format: {reason}")]
    InvalidTokenFormat {
        /// What was malformed
        reason: String,
    },

    /// Token issuer is not in the trusted IDP registry
    #[error("Invalid JWT: untrusted issuer")]
    UntrustedIssuer {
        /// The issuer the token claimed
        issuer: String,
    },

    /// Token audience does not match any trusted IDP for the issuer
    #[error("Invalid JWT: untrusted audience")]
    UntrustedAudience {
        /// The issuer the token claimed
        issuer: String,
    },

    /// Signing algorithm outside the IDP whitelist (or symmetric/none)
    #[error("Invalid JWT: algorithm {algorithm} not allowed")]
    AlgorithmNotAllowed {
        /// The algorithm from the JWT header
        algorithm: String,
    },

    /// Signature verification failed
    #[error("Invalid JWT: signature verification failed")]
    SignatureInvalid,

    /// `exp` (plus tolerance) is in the past
    #[error("Token has expired")]
    TokenExpired,

    /// `nbf` (minus tolerance) is in the future
    #[error("Token is not yet valid")]
    TokenNotYetValid,

    /// `iat` is older than the configured maximum token age
    #[error("Token is too old")]
    TokenTooOld,

    /// A claim the pipeline requires is absent
    #[error("Invalid JWT: missing required claim '{claim}'")]
    MissingClaim {
        /// Name of the absent claim
        claim: String,
    },

    /// Session carries no framework role
    #[error("Unauthorized: User has no valid roles assigned")]
    UnassignedRole,

    /// RFC 8693 exchange against the IDP token endpoint failed
    #[error("Token exchange failed: {detail}")]
    TokenExchangeFailed {
        /// HTTP status returned by the token endpoint, when one was received
        upstream_status: Option<u16>,
        /// Internal detail, never surfaced to clients
        detail: String,
    },

    /// Session role does not satisfy the check
    #[error("Unauthorized: Insufficient permissions")]
    InsufficientPermissions {
        /// What was required, for audit purposes
        required: String,
    },

    /// Session id is not a UUIDv4
    #[error("Invalid session identifier")]
    InvalidSessionId,

    /// A cache bound would be violated
    #[error("Token cache limit exceeded")]
    CacheLimitExceeded,

    /// Configuration is invalid (startup-time only)
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong
        message: String,
        /// Configuration key that caused the error
        key: Option<String>,
    },

    /// Anything else; detail stays server-side
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error pointing at a specific key
    pub fn configuration_with_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status this kind maps to at the boundary
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::MissingToken
            | Self::InvalidTokenFormat { .. }
            | Self::UntrustedIssuer { .. }
            | Self::UntrustedAudience { .. }
            | Self::AlgorithmNotAllowed { .. }
            | Self::SignatureInvalid
            | Self::TokenExpired
            | Self::TokenNotYetValid
            | Self::TokenTooOld
            | Self::MissingClaim { .. }
            | Self::TokenExchangeFailed { .. } => StatusCode::UNAUTHORIZED,
            Self::UnassignedRole | Self::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Self::InvalidSessionId => StatusCode::BAD_REQUEST,
            Self::CacheLimitExceeded => StatusCode::SERVICE_UNAVAILABLE,
            Self::Configuration { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for LLM-facing failure responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => "MISSING_TOKEN",
            Self::InvalidTokenFormat { .. } => "INVALID_TOKEN_FORMAT",
            Self::UntrustedIssuer { .. } => "UNTRUSTED_ISSUER",
            Self::UntrustedAudience { .. } => "UNTRUSTED_AUDIENCE",
            Self::AlgorithmNotAllowed { .. } => "ALGORITHM_NOT_ALLOWED",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenNotYetValid => "TOKEN_NOT_YET_VALID",
            Self::TokenTooOld => "TOKEN_TOO_OLD",
            Self::MissingClaim { .. } => "MISSING_CLAIM",
            Self::UnassignedRole => "INSUFFICIENT_PERMISSIONS",
            Self::TokenExchangeFailed { .. } => "TOKEN_EXCHANGE_FAILED",
            Self::InsufficientPermissions { .. } => "INSUFFICIENT_PERMISSIONS",
            Self::InvalidSessionId => "INVALID_SESSION_ID",
            Self::CacheLimitExceeded => "CACHE_LIMIT_EXCEEDED",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Internal(_) => "SERVER_ERROR",
        }
    }

    /// Short client-safe message.
    ///
    /// Downstream proxies discriminate auth failures by substring, so 401
    /// messages always contain one of `Authentication`, `Invalid JWT`,
    /// `Token`, `Unauthorized`.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingToken => {
                "Unauthorized: Missing Authorization header with Bearer token".to_string()
            }
            Self::InvalidTokenFormat { .. }
            | Self::UntrustedIssuer { .. }
            | Self::UntrustedAudience { .. }
            | Self::AlgorithmNotAllowed { .. }
            | Self::SignatureInvalid => "Invalid JWT".to_string(),
            Self::TokenExpired => "Token has expired".to_string(),
            Self::TokenNotYetValid => "Token is not yet valid".to_string(),
            Self::TokenTooOld => "Token is too old".to_string(),
            Self::MissingClaim { claim } => format!("Invalid JWT: missing claim '{claim}'"),
            Self::UnassignedRole => "Unauthorized: User has no valid roles assigned".to_string(),
            Self::TokenExchangeFailed { .. } => "Unauthorized: Token exchange failed".to_string(),
            Self::InsufficientPermissions { .. } => {
                "Unauthorized: Insufficient permissions".to_string()
            }
            Self::InvalidSessionId => "Invalid session identifier".to_string(),
            Self::CacheLimitExceeded => "Service temporarily unavailable".to_string(),
            Self::Configuration { .. } | Self::Internal(_) => {
                "An internal processing error occurred.".to_string()
            }
        }
    }

    /// Whether this kind is a policy outcome rather than a fault.
    ///
    /// Policy outcomes (role rejection, permission denial) travel inside
    /// result values; faults propagate as errors.
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            Self::UnassignedRole | Self::InsufficientPermissions { .. }
        )
    }
}
