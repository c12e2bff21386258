//! Fixed-window request rate limiting
//!
//! Keyed by transport session id, applied at the `/mcp` boundary before
//! authentication so a flood of bad tokens cannot grind the JWKS and
//! exchange paths. Disabled unless the configuration enables it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use tokengate_core::config::RateLimitConfig;

struct Window {
    started_at: Instant,
    count: u32,
}

/// Fixed-window limiter.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    windows: Mutex<HashMap<String, Window>>,
    max_requests: u32,
    window: Duration,
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window").field("count", &self.count).finish()
    }
}

impl FixedWindowLimiter {
    /// Build a limiter when the configuration enables one.
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config.enabled.then(|| Self {
            windows: Mutex::new(HashMap::new()),
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
        })
    }

    /// Record one request for `key`; false means the caller is over the
    /// limit for the current window.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        // Opportunistic cleanup keeps the map bounded by active callers.
        if windows.len() > 4096 {
            windows.retain(|_, window| now.duration_since(window.started_at) < self.window);
        }

        let window = windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });
        if now.duration_since(window.started_at) >= self.window {
            window.started_at = now;
            window.count = 0;
        }
        window.count += 1;
        if window.count > self.max_requests {
            warn!(key, count = window.count, "request rate limit exceeded");
            false
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_secs: u64) -> FixedWindowLimiter {
        FixedWindowLimiter::from_config(&RateLimitConfig {
            enabled: true,
            max_requests,
            window_secs,
        })
        .unwrap()
    }

    #[test]
    fn test_disabled_config_builds_nothing() {
        assert!(FixedWindowLimiter::from_config(&RateLimitConfig::default()).is_none());
    }

    #[test]
    fn test_limit_enforced_within_window() {
        let limiter = limiter(3, 60);
        assert!(limiter.check("s1"));
        assert!(limiter.check("s1"));
        assert!(limiter.check("s1"));
        assert!(!limiter.check("s1"));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(1, 60);
        assert!(limiter.check("s1"));
        assert!(!limiter.check("s1"));
        assert!(limiter.check("s2"));
    }

    #[test]
    fn test_window_resets() {
        let limiter = limiter(1, 0);
        assert!(limiter.check("s1"));
        // Zero-length window: every request starts a fresh one.
        assert!(limiter.check("s1"));
    }
}
