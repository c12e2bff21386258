//! # Tokengate Server - MCP HTTP Surface
//!
//! The MCP integration layer of the Tokengate gateway:
//!
//! - **Auth middleware** - bearer extraction, the authentication pipeline,
//!   dual rejection check, and the 401/403 HTTP contract
//! - **Tool dispatcher** - two-tier (visibility + execution)
//!   authorization with error masking
//! - **OAuth metadata** - RFC 8414 and RFC 9728 discovery documents
//! - **Routes** - `/mcp`, the well-known endpoints, and `/healthz`
//!
//! This crate sits at the top of the dependency gradient
//! (core → delegation → server) and is the only one that knows about
//! HTTP or MCP framing.

pub mod dispatcher;
pub mod metadata;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod state;

#[doc(inline)]
pub use dispatcher::{LLMResponse, ToolDispatcher, ToolRegistration, delegation_response, handler};
#[doc(inline)]
pub use middleware::{AuthenticatedRequest, McpContext, authenticate_request, extract_bearer};
#[doc(inline)]
pub use routes::build_router;
#[doc(inline)]
pub use state::AppState;
