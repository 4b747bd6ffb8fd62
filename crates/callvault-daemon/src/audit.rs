//! Best-effort audit trail for hold lifecycle operations.
//!
//! Primary operations never block on auditing. After a mutation commits,
//! the service pushes an [`AuditRecord`] through an [`AuditSink`]; the
//! SQLite-backed sink enqueues onto a bounded channel with `try_send` and a
//! writer task drains the channel into the `audit_logs` table. When the
//! channel is full or the writer is gone, the event is dropped with a
//! warning and the primary operation still succeeds.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::EvidenceStore;

/// Default audit channel depth. Events beyond this backlog are dropped.
pub const DEFAULT_AUDIT_QUEUE_DEPTH: usize = 1024;

/// One write-once audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Row identifier.
    pub id: Uuid,
    /// Organization the audited resource belongs to.
    pub organization_id: Uuid,
    /// The acting user.
    pub user_id: Uuid,
    /// Kind of resource acted on, e.g. `legal_hold`.
    pub resource_type: String,
    /// Identifier of the resource acted on.
    pub resource_id: String,
    /// Dotted action name, e.g. `legal_hold.created`.
    pub action: String,
    /// Resource state before the action, if meaningful.
    pub before: Option<Value>,
    /// Resource state after the action, if meaningful.
    pub after: Option<Value>,
    /// When the action happened.
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// A record for an action with the given before/after snapshots.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        organization_id: Uuid,
        user_id: Uuid,
        resource_type: &str,
        resource_id: String,
        action: &str,
        before: Option<Value>,
        after: Option<Value>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            user_id,
            resource_type: resource_type.to_string(),
            resource_id,
            action: action.to_string(),
            before,
            after,
            created_at,
        }
    }
}

/// Fire-and-forget audit destination.
///
/// `record` must never block or fail the caller; sinks that cannot accept
/// an event drop it and log.
pub trait AuditSink: Send + Sync {
    /// Accepts one audit event, best effort.
    fn record(&self, record: AuditRecord);
}

/// Channel-backed sink draining into the `audit_logs` table.
#[derive(Debug, Clone)]
pub struct SqliteAuditSink {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditSink for SqliteAuditSink {
    fn record(&self, record: AuditRecord) {
        if let Err(err) = self.tx.try_send(record) {
            let dropped = match &err {
                mpsc::error::TrySendError::Full(r) | mpsc::error::TrySendError::Closed(r) => r,
            };
            warn!(
                action = %dropped.action,
                resource_id = %dropped.resource_id,
                "audit event dropped: {err}"
            );
        }
    }
}

/// Spawns the audit writer task and returns the sink plus its join handle.
///
/// The task exits when every sink clone is dropped. Write failures are
/// logged and swallowed; a broken audit sink must not take the daemon down.
pub fn spawn_audit_writer(
    store: EvidenceStore,
    queue_depth: usize,
) -> (SqliteAuditSink, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<AuditRecord>(queue_depth.max(1));
    let handle = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            match store.record_audit(&record) {
                Ok(()) => debug!(action = %record.action, "audit event recorded"),
                Err(err) => warn!(
                    action = %record.action,
                    resource_id = %record.resource_id,
                    "audit write failed: {err}"
                ),
            }
        }
        debug!("audit writer stopped");
    });
    (SqliteAuditSink { tx }, handle)
}

/// In-memory sink capturing events for assertions.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    /// Everything recorded so far, in emission order.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, record: AuditRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}
