//! # Tokengate Delegation - Module Contract & Trust-Boundary Registry
//!
//! Delegation modules perform backend calls under the end user's identity
//! (SQL impersonation, Kerberos S4U, downstream OAuth APIs). This crate
//! holds the contract they implement and the registry that dispatches to
//! them while re-verifying their self-reported audit trails:
//!
//! - [`DelegationModule`] - the pluggable backend contract
//! - [`DelegationResult`] - result-with-discriminant for call outcomes
//! - [`DelegationRegistry`] - named dispatch + trust-boundary enforcement
//!
//! ## Trust boundary
//!
//! A module lives inside the process but is treated as potentially buggy
//! or compromised. The registry records the outcome it *observed*
//! (`registryVerifiedSuccess`) next to what the module *claimed*
//! (`moduleReportedSuccess`); any disagreement emits a
//! `trust_boundary_violation` security event while the user-visible
//! result stays unchanged.

pub mod module;
pub mod registry;
pub mod result;

#[doc(inline)]
pub use module::{DelegationError, DelegationModule};
#[doc(inline)]
pub use registry::DelegationRegistry;
#[doc(inline)]
pub use result::DelegationResult;
