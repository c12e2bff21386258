//! JWT validation and JWKS management

pub mod jwks;
pub mod validator;

pub use jwks::JwksClient;
pub use validator::{
    JwtValidator, MappedClaims, ValidatedToken, apply_claim_mappings, decode_unverified,
};
