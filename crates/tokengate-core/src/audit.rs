//! Append-only audit trail
//!
//! Every security-relevant event in the gateway produces an [`AuditEntry`]
//! with a mandatory `source`. Entries flow through the write-only
//! [`AuditService`], which decouples the request path from the sink with a
//! bounded queue: a slow sink can never stall authentication or
//! delegation. The service exposes no read API; querying is a concern for
//! whatever the sink feeds.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Well-known audit action names.
pub mod actions {
    /// Successful authentication
    pub const AUTHENTICATION_SUCCESS: &str = "AUTHENTICATION_SUCCESS";
    /// Authentication failed (crypto, time, or policy)
    pub const AUTHENTICATION_FAILURE: &str = "AUTHENTICATION_FAILURE";
    /// Outbound RFC 8693 exchange succeeded
    pub const TOKEN_EXCHANGE_SUCCESS: &str = "TOKEN_EXCHANGE_SUCCESS";
    /// Outbound RFC 8693 exchange failed
    pub const TOKEN_EXCHANGE_FAILURE: &str = "TOKEN_EXCHANGE_FAILURE";
    /// Exchange served from the session-bound cache
    pub const CACHE_HIT: &str = "CACHE_HIT";
    /// Cache eviction (per-session or global overflow)
    pub const CACHE_EVICTION: &str = "CACHE_EVICTION";
    /// All entries for a session dropped on transport termination
    pub const CACHE_SESSION_CLEARED: &str = "CACHE_SESSION_CLEARED";
    /// A malformed session id reached the cache
    pub const INVALID_SESSION_ID: &str = "INVALID_SESSION_ID";
    /// Module audit disagreed with the registry's observation
    pub const TRUST_BOUNDARY_VIOLATION: &str = "trust_boundary_violation";
    /// Tool handler raised an unexpected error
    pub const TOOL_HANDLER_ERROR: &str = "TOOL_HANDLER_ERROR";
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Event time
    pub timestamp: DateTime<Utc>,
    /// Emitting component, e.g. `auth:service`, `delegation:registry`
    pub source: String,
    /// Acting user, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// What happened
    pub action: String,
    /// Outcome
    pub success: bool,
    /// Human-readable reason, on failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Error detail (server-side only; sinks must not echo to clients)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structured extras
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// What the delegation module claimed (delegation entries only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_reported_success: Option<bool>,
    /// What the registry observed (delegation entries only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_verified_success: Option<bool>,
    /// When the registry stamped its observation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_timestamp: Option<DateTime<Utc>>,
}

impl AuditEntry {
    /// Create an entry. `source` must be non-empty; an empty source is
    /// replaced with `unknown` and logged, never silently accepted.
    pub fn new(source: impl Into<String>, action: impl Into<String>, success: bool) -> Self {
        let mut source = source.into();
        if source.is_empty() {
            warn!("audit entry constructed with empty source");
            source = "unknown".to_string();
        }
        Self {
            timestamp: Utc::now(),
            source,
            user_id: None,
            action: action.into(),
            success,
            reason: None,
            error: None,
            metadata: None,
            module_reported_success: None,
            registry_verified_success: None,
            registry_timestamp: None,
        }
    }

    /// Attach the acting user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach a reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach server-side error detail
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach one metadata key
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }
}

/// Write-only audit destination.
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    /// Persist one entry. Must be cheap and non-blocking; expensive I/O
    /// belongs behind the sink, not in it.
    fn write(&self, entry: &AuditEntry);
}

/// Sink emitting structured `tracing` events under `audit::gateway`.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn write(&self, entry: &AuditEntry) {
        if entry.success {
            info!(
                target: "audit::gateway",
                source = %entry.source,
                action = %entry.action,
                user_id = ?entry.user_id,
                success = entry.success,
                "audit"
            );
        } else {
            warn!(
                target: "audit::gateway",
                source = %entry.source,
                action = %entry.action,
                user_id = ?entry.user_id,
                success = entry.success,
                reason = ?entry.reason,
                "audit"
            );
        }
    }
}

/// Overflow callback: receives entries evicted from the ring.
pub type OverflowCallback = Arc<dyn Fn(AuditEntry) + Send + Sync>;

/// Bounded in-memory ring sink.
///
/// When the ring is full the oldest entry is handed to the overflow
/// callback (so an external flusher can persist it) and then discarded.
pub struct MemoryAuditSink {
    entries: parking_lot::Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
    on_overflow: Option<OverflowCallback>,
}

impl std::fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("capacity", &self.capacity)
            .field("len", &self.entries.lock().len())
            .finish()
    }
}

impl MemoryAuditSink {
    /// Create a ring with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: parking_lot::Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            on_overflow: None,
        }
    }

    /// Install an overflow callback.
    pub fn with_overflow_callback(mut self, callback: OverflowCallback) -> Self {
        self.on_overflow = Some(callback);
        self
    }

    /// Snapshot of the ring, oldest first. Test support; production code
    /// observes audits through the sink it installed, not through here.
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn write(&self, entry: &AuditEntry) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            if let Some(evicted) = entries.pop_front() {
                if let Some(callback) = &self.on_overflow {
                    callback(evicted);
                }
            }
        }
        entries.push_back(entry.clone());
    }
}

enum AuditCommand {
    Write(Box<AuditEntry>),
    Flush(tokio::sync::oneshot::Sender<()>),
}

/// Queue-decoupled audit writer.
///
/// `record` never blocks: entries go onto a bounded channel drained by a
/// background task. If the queue is full the entry is dropped with a
/// warning - audit backpressure must not become request latency.
#[derive(Clone)]
pub struct AuditService {
    tx: mpsc::Sender<AuditCommand>,
    sink: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for AuditService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditService").finish_non_exhaustive()
    }
}

impl AuditService {
    /// Create a service draining into `sink` through a queue of
    /// `queue_depth` entries.
    pub fn new(sink: Arc<dyn AuditSink>, queue_depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditCommand>(queue_depth.max(1));
        let drain_sink = Arc::clone(&sink);
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    AuditCommand::Write(entry) => drain_sink.write(&entry),
                    AuditCommand::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });
        Self { tx, sink }
    }

    /// Append one entry; non-blocking.
    pub fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.tx.try_send(AuditCommand::Write(Box::new(entry))) {
            warn!(error = %e, "audit queue full, entry dropped");
        }
    }

    /// Wait until every previously recorded entry reached the sink.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = tokio::sync::oneshot::channel();
        if self.tx.send(AuditCommand::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// The sink this service drains into.
    pub fn sink(&self) -> &Arc<dyn AuditSink> {
        &self.sink
    }
}
