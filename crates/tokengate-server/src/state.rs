//! Shared HTTP application state

use std::sync::Arc;

use tokengate_core::context::CoreContext;
use tokengate_delegation::DelegationRegistry;

use crate::dispatcher::ToolDispatcher;
use crate::rate_limit::FixedWindowLimiter;

/// Everything the route handlers need, cheaply cloneable.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Core services (config, auth pipeline, cache, audit)
    pub core: CoreContext,
    /// Delegation registry
    pub delegation: Arc<DelegationRegistry>,
    /// Tool dispatcher
    pub tools: Arc<ToolDispatcher>,
    /// Boundary rate limiter, when configured
    pub limiter: Option<Arc<FixedWindowLimiter>>,
    /// Externally visible base URL
    pub server_url: String,
}

impl AppState {
    /// Assemble the state; server URL and rate limiting come from
    /// configuration.
    pub fn new(
        core: CoreContext,
        delegation: Arc<DelegationRegistry>,
        tools: Arc<ToolDispatcher>,
    ) -> Self {
        let server_url = core.config.mcp.effective_server_url();
        let limiter =
            FixedWindowLimiter::from_config(&core.config.auth.rate_limiting).map(Arc::new);
        Self {
            core,
            delegation,
            tools,
            limiter,
            server_url,
        }
    }
}
