//! Session-bound delegation token cache
//!
//! Exchanged tokens are keyed `(session_id, audience)`. The session id is
//! the transport session's UUIDv4 - its 122 bits of entropy are the cache
//! key secret, which is why non-UUIDv4 ids are rejected outright. No
//! at-rest encryption is applied: an attacker with process memory would
//! hold any decryption key too. Short TTLs and session-bound revocation
//! are the defenses.
//!
//! Locking: the outer session map sits under a reader-writer lock, each
//! session's token list under its own mutex. Within a transport session
//! requests are serialized by the transport, so inner contention is nil;
//! the write lock is only taken to create or evict whole sessions. All
//! operations are non-suspending.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditService, actions};
use crate::config::ExchangeCacheConfig;
use crate::error::{AuthError, AuthResult};

/// One cached delegation token.
#[derive(Debug, Clone)]
pub struct CachedToken {
    /// Compact TE-JWT
    pub token: String,
    /// Monotonic creation time
    pub created_at: Instant,
    /// Monotonic expiry; strictly after `created_at`
    pub expires_at: Instant,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Insertion-ordered token list for one session.
#[derive(Debug, Default)]
struct SessionTokens {
    /// `(audience, token)` in insertion order; oldest first
    entries: Vec<(String, CachedToken)>,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Live sessions
    pub sessions: usize,
    /// Live entries across all sessions
    pub total_entries: usize,
    /// Lifetime eviction count
    pub evictions: u64,
}

/// Session-bound token cache with TTL, per-session and global caps.
///
/// # Example
///
/// ```rust
/// # use std::sync::Arc;
/// # use tokengate_core::audit::{AuditService, TracingAuditSink};
/// # use tokengate_core::cache::TokenCache;
/// # tokio_test::block_on(async {
/// let audit = AuditService::new(Arc::new(TracingAuditSink), 256);
/// let cache = TokenCache::new(Default::default(), audit);
///
/// let session_id = uuid::Uuid::new_v4().to_string();
/// cache.set(&session_id, "urn:sql:database", "eyJ0eXAi...".to_string(), None)?;
/// assert!(cache.get(&session_id, "urn:sql:database").is_some());
///
/// // Transport session terminated: revoke everything it cached.
/// cache.clear_session(&session_id);
/// assert!(cache.get(&session_id, "urn:sql:database").is_none());
/// # Ok::<(), tokengate_core::error::AuthError>(())
/// # });
/// ```
#[derive(Debug)]
pub struct TokenCache {
    sessions: RwLock<HashMap<Uuid, Mutex<SessionTokens>>>,
    /// Session creation order for whole-session eviction, oldest first
    session_order: Mutex<Vec<Uuid>>,
    total_entries: AtomicUsize,
    evictions: std::sync::atomic::AtomicU64,
    config: ExchangeCacheConfig,
    audit: AuditService,
}

impl TokenCache {
    /// Create a cache with the given (already validated) bounds.
    pub fn new(config: ExchangeCacheConfig, audit: AuditService) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            session_order: Mutex::new(Vec::new()),
            total_entries: AtomicUsize::new(0),
            evictions: std::sync::atomic::AtomicU64::new(0),
            config,
            audit,
        }
    }

    /// Configured default TTL.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_seconds)
    }

    fn parse_session_id(session_id: &str) -> Option<Uuid> {
        let id = Uuid::parse_str(session_id).ok()?;
        (id.get_version_num() == 4).then_some(id)
    }

    /// Look up a live token.
    ///
    /// Invalid ids miss silently (with an `INVALID_SESSION_ID` audit that
    /// never records the offending value). Expired entries are dropped on
    /// the way out, so a returned token always satisfies
    /// `now < expires_at`.
    pub fn get(&self, session_id: &str, audience: &str) -> Option<String> {
        let Some(id) = Self::parse_session_id(session_id) else {
            self.audit.record(AuditEntry::new(
                "cache:token",
                actions::INVALID_SESSION_ID,
                false,
            ));
            return None;
        };

        let sessions = self.sessions.read();
        let session = sessions.get(&id)?;
        let mut tokens = session.lock();
        let index = tokens.entries.iter().position(|(aud, _)| aud == audience)?;
        if tokens.entries[index].1.is_expired() {
            tokens.entries.remove(index);
            self.total_entries.fetch_sub(1, Ordering::Relaxed);
            return None;
        }
        Some(tokens.entries[index].1.token.clone())
    }

    /// Store a token under `(session_id, audience)`.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidSessionId`] when the id is not a UUIDv4 - no
    /// write occurs.
    pub fn set(
        &self,
        session_id: &str,
        audience: &str,
        token: String,
        ttl: Option<Duration>,
    ) -> AuthResult<()> {
        let Some(id) = Self::parse_session_id(session_id) else {
            self.audit.record(AuditEntry::new(
                "cache:token",
                actions::INVALID_SESSION_ID,
                false,
            ));
            return Err(AuthError::InvalidSessionId);
        };

        let ttl = ttl.unwrap_or_else(|| self.default_ttl()).max(Duration::from_millis(1));
        let now = Instant::now();
        let entry = CachedToken {
            token,
            created_at: now,
            expires_at: now + ttl,
        };

        // Global cap first: evicting the oldest session may include ours,
        // so do it before touching the session map.
        if self.total_entries.load(Ordering::Relaxed) >= self.config.max_total_entries {
            self.evict_oldest_session();
        }

        {
            let sessions = self.sessions.read();
            if let Some(session) = sessions.get(&id) {
                self.insert_into_session(&id, &mut session.lock(), audience, entry);
                return Ok(());
            }
        }

        // New session: take the write lock, re-check (another writer may
        // have created it between the locks).
        let mut sessions = self.sessions.write();
        let session = sessions.entry(id).or_insert_with(|| {
            self.session_order.lock().push(id);
            Mutex::new(SessionTokens::default())
        });
        self.insert_into_session(&id, &mut session.lock(), audience, entry);
        Ok(())
    }

    fn insert_into_session(
        &self,
        id: &Uuid,
        tokens: &mut SessionTokens,
        audience: &str,
        entry: CachedToken,
    ) {
        // Replace an existing audience entry in place.
        if let Some(index) = tokens.entries.iter().position(|(aud, _)| aud == audience) {
            tokens.entries.remove(index);
            self.total_entries.fetch_sub(1, Ordering::Relaxed);
        }

        // Per-session cap: drop the oldest entry.
        if tokens.entries.len() >= self.config.max_entries_per_session {
            let (evicted_audience, _) = tokens.entries.remove(0);
            self.total_entries.fetch_sub(1, Ordering::Relaxed);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            self.audit.record(
                AuditEntry::new("cache:token", actions::CACHE_EVICTION, true)
                    .with_reason("per-session capacity")
                    .with_metadata("sessionId", serde_json::json!(id.to_string()))
                    .with_metadata("audience", serde_json::json!(evicted_audience)),
            );
        }

        tokens.entries.push((audience.to_string(), entry));
        self.total_entries.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop the entire oldest session (global overflow policy).
    fn evict_oldest_session(&self) {
        let mut sessions = self.sessions.write();
        let mut order = self.session_order.lock();
        while let Some(oldest) = order.first().copied() {
            order.remove(0);
            if let Some(session) = sessions.remove(&oldest) {
                let dropped = session.lock().entries.len();
                self.total_entries.fetch_sub(dropped, Ordering::Relaxed);
                self.evictions.fetch_add(dropped as u64, Ordering::Relaxed);
                self.audit.record(
                    AuditEntry::new("cache:token", actions::CACHE_EVICTION, true)
                        .with_reason("global capacity")
                        .with_metadata("sessionId", serde_json::json!(oldest.to_string()))
                        .with_metadata("entriesDropped", serde_json::json!(dropped)),
                );
                return;
            }
            // Stale order entry (session already cleared); keep scanning.
        }
        warn!("global cache overflow with no sessions to evict");
    }

    /// Remove every entry for a session. Idempotent; this is the primary
    /// revocation path, invoked on transport-session termination.
    pub fn clear_session(&self, session_id: &str) -> usize {
        let Some(id) = Self::parse_session_id(session_id) else {
            return 0;
        };

        let removed = {
            let mut sessions = self.sessions.write();
            sessions.remove(&id)
        };
        self.session_order.lock().retain(|known| *known != id);

        let cleared = removed.map_or(0, |session| session.lock().entries.len());
        if cleared > 0 {
            self.total_entries.fetch_sub(cleared, Ordering::Relaxed);
        }
        self.audit.record(
            AuditEntry::new("cache:token", actions::CACHE_SESSION_CLEARED, true)
                .with_metadata("sessionId", serde_json::json!(id.to_string()))
                .with_metadata("entriesCleared", serde_json::json!(cleared)),
        );
        debug!(session_id = %id, cleared, "session cache cleared");
        cleared
    }

    /// Remove one `(session, audience)` entry.
    pub fn clear_audience(&self, session_id: &str, audience: &str) -> bool {
        let Some(id) = Self::parse_session_id(session_id) else {
            return false;
        };
        let sessions = self.sessions.read();
        let Some(session) = sessions.get(&id) else {
            return false;
        };
        let mut tokens = session.lock();
        if let Some(index) = tokens.entries.iter().position(|(aud, _)| aud == audience) {
            tokens.entries.remove(index);
            self.total_entries.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Drop everything.
    pub fn clear_all(&self) {
        let mut sessions = self.sessions.write();
        sessions.clear();
        self.session_order.lock().clear();
        self.total_entries.store(0, Ordering::Relaxed);
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            sessions: self.sessions.read().len(),
            total_entries: self.total_entries.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// One sweep pass: drop expired entries and empty sessions.
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let mut removed = 0;
        let mut empty_sessions = Vec::new();
        {
            let sessions = self.sessions.read();
            for (id, session) in sessions.iter() {
                let mut tokens = session.lock();
                let before = tokens.entries.len();
                tokens.entries.retain(|(_, entry)| !entry.is_expired());
                removed += before - tokens.entries.len();
                if tokens.entries.is_empty() {
                    empty_sessions.push(*id);
                }
            }
        }
        if removed > 0 {
            self.total_entries.fetch_sub(removed, Ordering::Relaxed);
        }
        if !empty_sessions.is_empty() {
            let mut sessions = self.sessions.write();
            for id in &empty_sessions {
                // Only drop if still empty; a writer may have raced a set.
                let still_empty = sessions
                    .get(id)
                    .is_some_and(|session| session.lock().entries.is_empty());
                if still_empty {
                    sessions.remove(id);
                    self.session_order.lock().retain(|known| known != id);
                }
            }
        }
        if removed > 0 {
            debug!(removed, "cache sweep removed expired entries");
        }
        removed
    }

    /// Spawn the singleton background sweeper (fires every 60 seconds).
    /// Abort the returned handle on shutdown.
    pub fn spawn_sweeper(cache: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                cache.sweep();
            }
        })
    }
}
