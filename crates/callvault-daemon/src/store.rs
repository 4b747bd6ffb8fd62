//! SQLite persistence for manifests, bundles, holds, calls, and audit rows.
//!
//! One [`EvidenceStore`] wraps a shared connection. Reads are single-row
//! lookups; the two multi-row mutations (hold creation and hold release)
//! run inside `IMMEDIATE` transactions so validation, the status flip, and
//! the per-call custody updates commit or roll back as one unit. Taking the
//! write lock up front also serializes concurrent releases, which keeps the
//! "other active holds" read consistent with what actually commits.
//!
//! # Schema
//!
//! Tables: `evidence_manifests`, `evidence_bundles`, `legal_holds`,
//! `calls` (the custody columns this subsystem owns on the external call
//! record), `org_members` (the membership/role boundary), and `audit_logs`
//! (write-once sink). Timestamps are RFC 3339 TEXT; JSON documents are
//! stored as their canonical-ready TEXT.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use callvault_core::actor::{Actor, Role};
use callvault_core::bundle::{
    CustodyStatus, EvidenceBundle, EvidenceCompleteness, RetentionClass, TsaStatus,
};
use callvault_core::hold::{HoldStatus, LegalHold, calls_to_release};
use callvault_core::manifest::EvidenceManifest;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params, params_from_iter};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::audit::AuditRecord;

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The connection mutex was poisoned by a panicking thread.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// A persisted row failed to decode back into its domain type.
    #[error("corrupt {table} row {id}: {reason}")]
    CorruptRow {
        /// Table the row came from.
        table: &'static str,
        /// Primary key of the offending row.
        id: String,
        /// What failed to decode.
        reason: String,
    },

    /// Hold creation referenced call ids that do not exist in the
    /// organization.
    #[error("unknown call ids: {ids:?}")]
    UnknownCalls {
        /// The ids that failed validation.
        ids: Vec<Uuid>,
    },
}

/// Outcome of a transactional hold release.
#[derive(Debug, Clone, PartialEq)]
pub enum HoldReleaseOutcome {
    /// The hold was released; `released_calls` were safe to unflag.
    Released {
        /// The hold with release metadata applied.
        hold: LegalHold,
        /// Calls whose custody state was reverted to defaults.
        released_calls: Vec<Uuid>,
    },
    /// No hold with that id exists in the organization.
    NotFound,
    /// The hold was already released; nothing was mutated.
    AlreadyReleased,
}

/// Custody columns this subsystem owns on the external call record.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    /// Call identifier.
    pub id: Uuid,
    /// Owning organization.
    pub organization_id: Uuid,
    /// True iff at least one active hold covers the call.
    pub legal_hold_flag: bool,
    /// Custody status of the call's evidence.
    pub custody_status: CustodyStatus,
    /// Retention treatment of the call's evidence.
    pub retention_class: RetentionClass,
    /// When the call record was created.
    pub created_at: DateTime<Utc>,
}

impl CallRecord {
    /// A call with default custody state (no hold).
    #[must_use]
    pub fn new(organization_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            legal_hold_flag: false,
            custody_status: CustodyStatus::Active,
            retention_class: RetentionClass::Default,
            created_at: Utc::now(),
        }
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS evidence_manifests (
    id                 TEXT PRIMARY KEY,
    organization_id    TEXT NOT NULL,
    call_id            TEXT NOT NULL,
    manifest           TEXT NOT NULL,
    cryptographic_hash TEXT,
    created_at         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_manifests_org ON evidence_manifests(organization_id);

CREATE TABLE IF NOT EXISTS evidence_bundles (
    id                    TEXT PRIMARY KEY,
    organization_id       TEXT NOT NULL,
    manifest_id           TEXT NOT NULL,
    bundle_payload        TEXT,
    bundle_hash           TEXT,
    evidence_completeness TEXT NOT NULL,
    custody_status        TEXT NOT NULL,
    retention_class       TEXT NOT NULL,
    legal_hold_flag       INTEGER NOT NULL,
    tsa_status            TEXT,
    tsa_received_at       TEXT,
    tsa_error             TEXT,
    superseded_at         TEXT,
    created_at            TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_bundles_manifest ON evidence_bundles(manifest_id);

CREATE TABLE IF NOT EXISTS legal_holds (
    id               TEXT PRIMARY KEY,
    organization_id  TEXT NOT NULL,
    hold_name        TEXT NOT NULL,
    matter_reference TEXT,
    description      TEXT,
    applies_to_all   INTEGER NOT NULL,
    call_ids         TEXT NOT NULL,
    effective_until  TEXT,
    status           TEXT NOT NULL,
    created_by       TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    released_at      TEXT,
    released_by      TEXT,
    release_reason   TEXT
);
CREATE INDEX IF NOT EXISTS idx_holds_org_status ON legal_holds(organization_id, status);

CREATE TABLE IF NOT EXISTS calls (
    id              TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    legal_hold_flag INTEGER NOT NULL,
    custody_status  TEXT NOT NULL,
    retention_class TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_calls_org ON calls(organization_id);

CREATE TABLE IF NOT EXISTS org_members (
    user_id         TEXT NOT NULL,
    organization_id TEXT NOT NULL,
    role            TEXT NOT NULL,
    PRIMARY KEY (user_id, organization_id)
);

CREATE TABLE IF NOT EXISTS audit_logs (
    id              TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    resource_type   TEXT NOT NULL,
    resource_id     TEXT NOT NULL,
    action          TEXT NOT NULL,
    before          TEXT,
    after           TEXT,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_org ON audit_logs(organization_id, created_at);
";

/// Shared SQLite-backed store for the evidence subsystem.
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    conn: Arc<Mutex<Connection>>,
}

impl EvidenceStore {
    /// Opens (or creates) the store at the given path and initializes the
    /// schema. WAL mode keeps concurrent verification reads cheap.
    ///
    /// # Errors
    ///
    /// Returns a database error if the file cannot be opened or the schema
    /// cannot be applied.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory store. Used by tests and ephemeral tooling.
    ///
    /// # Errors
    ///
    /// Returns a database error if schema initialization fails.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Inserts or updates an organization membership.
    ///
    /// # Errors
    ///
    /// Returns a database error on write failure.
    pub fn upsert_member(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        role: Role,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO org_members (user_id, organization_id, role) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, organization_id) DO UPDATE SET role = excluded.role",
            params![user_id.to_string(), organization_id.to_string(), to_sql_enum(&role)],
        )?;
        Ok(())
    }

    /// Resolves the typed actor for a user within an organization, or
    /// `None` when no membership exists.
    ///
    /// # Errors
    ///
    /// Returns a database error on read failure, or a corrupt-row error if
    /// the stored role does not parse.
    pub fn resolve_actor(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<Actor>, StoreError> {
        let conn = self.lock()?;
        let role: Option<String> = conn
            .query_row(
                "SELECT role FROM org_members WHERE user_id = ?1 AND organization_id = ?2",
                params![user_id.to_string(), organization_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        role.map(|raw| {
            Ok(Actor {
                user_id,
                organization_id,
                role: from_sql_enum("org_members", &user_id.to_string(), &raw)?,
            })
        })
        .transpose()
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Inserts a call record.
    ///
    /// # Errors
    ///
    /// Returns a database error on write failure.
    pub fn insert_call(&self, call: &CallRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        insert_call_row(&conn, call)
    }

    /// Loads a call record by id.
    ///
    /// # Errors
    ///
    /// Returns a database error on read failure or a corrupt-row error.
    pub fn get_call(&self, id: Uuid) -> Result<Option<CallRecord>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, organization_id, legal_hold_flag, custody_status, retention_class,
                    created_at
             FROM calls WHERE id = ?1",
            params![id.to_string()],
            row_to_call,
        )
        .optional()
        .map_err(StoreError::from)?
        .transpose()
    }

    /// Live count of all calls in the organization.
    ///
    /// # Errors
    ///
    /// Returns a database error on read failure.
    pub fn count_calls(&self, organization_id: Uuid) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM calls WHERE organization_id = ?1",
            params![organization_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // Manifests and bundles
    // ------------------------------------------------------------------

    /// Persists a manifest record.
    ///
    /// # Errors
    ///
    /// Returns a database error on write failure.
    pub fn insert_manifest(&self, manifest: &EvidenceManifest) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO evidence_manifests
                 (id, organization_id, call_id, manifest, cryptographic_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                manifest.id.to_string(),
                manifest.organization_id.to_string(),
                manifest.call_id.to_string(),
                manifest.manifest.to_string(),
                manifest.cryptographic_hash,
                manifest.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Loads a manifest by id.
    ///
    /// # Errors
    ///
    /// Returns a database error on read failure or a corrupt-row error.
    pub fn get_manifest(&self, id: Uuid) -> Result<Option<EvidenceManifest>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, organization_id, call_id, manifest, cryptographic_hash, created_at
             FROM evidence_manifests WHERE id = ?1",
            params![id.to_string()],
            row_to_manifest,
        )
        .optional()
        .map_err(StoreError::from)?
        .transpose()
    }

    /// Persists a bundle record.
    ///
    /// # Errors
    ///
    /// Returns a database error on write failure.
    pub fn insert_bundle(&self, bundle: &EvidenceBundle) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO evidence_bundles
                 (id, organization_id, manifest_id, bundle_payload, bundle_hash,
                  evidence_completeness, custody_status, retention_class, legal_hold_flag,
                  tsa_status, tsa_received_at, tsa_error, superseded_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                bundle.id.to_string(),
                bundle.organization_id.to_string(),
                bundle.manifest_id.to_string(),
                bundle.bundle_payload.as_ref().map(ToString::to_string),
                bundle.bundle_hash,
                to_sql_enum(&bundle.evidence_completeness),
                to_sql_enum(&bundle.custody_status),
                to_sql_enum(&bundle.retention_class),
                i64::from(bundle.legal_hold_flag),
                bundle.tsa_status.as_ref().map(to_sql_enum),
                bundle.tsa_received_at.map(|t| t.to_rfc3339()),
                bundle.tsa_error,
                bundle.superseded_at.map(|t| t.to_rfc3339()),
                bundle.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Loads a bundle by id.
    ///
    /// # Errors
    ///
    /// Returns a database error on read failure or a corrupt-row error.
    pub fn get_bundle(&self, id: Uuid) -> Result<Option<EvidenceBundle>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("{BUNDLE_SELECT} WHERE id = ?1"),
            params![id.to_string()],
            row_to_bundle,
        )
        .optional()
        .map_err(StoreError::from)?
        .transpose()
    }

    /// The newest non-superseded bundle referencing a manifest, if any.
    ///
    /// # Errors
    ///
    /// Returns a database error on read failure or a corrupt-row error.
    pub fn active_bundle_for_manifest(
        &self,
        manifest_id: Uuid,
    ) -> Result<Option<EvidenceBundle>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "{BUNDLE_SELECT} WHERE manifest_id = ?1 AND superseded_at IS NULL
                 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            ),
            params![manifest_id.to_string()],
            row_to_bundle,
        )
        .optional()
        .map_err(StoreError::from)?
        .transpose()
    }

    /// Marks a bundle as superseded. Used when a new bundle is issued
    /// against updated manifest state.
    ///
    /// # Errors
    ///
    /// Returns a database error on write failure.
    pub fn mark_bundle_superseded(
        &self,
        id: Uuid,
        superseded_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE evidence_bundles SET superseded_at = ?1 WHERE id = ?2",
            params![superseded_at.to_rfc3339(), id.to_string()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Legal holds
    // ------------------------------------------------------------------

    /// Validates and persists a hold, applying hold custody state to every
    /// covered call inside one `IMMEDIATE` transaction.
    ///
    /// `call_ids` are re-validated inside the transaction, which closes
    /// the check-then-act gap against concurrent call deletion. An
    /// org-wide hold validates and stores its `call_ids` the same way an
    /// explicit one does; only the custody application differs. Returns
    /// the number of calls covered at creation time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownCalls`] if any listed id is missing
    /// or foreign, or a database error on failure (the transaction rolls
    /// back either way).
    pub fn create_hold(&self, hold: &LegalHold) -> Result<u64, StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !hold.call_ids.is_empty() {
            let existing = existing_call_ids(&tx, hold.organization_id, &hold.call_ids)?;
            let missing: Vec<Uuid> = hold
                .call_ids
                .iter()
                .copied()
                .filter(|id| !existing.contains(id))
                .collect();
            if !missing.is_empty() {
                return Err(StoreError::UnknownCalls { ids: missing });
            }
        }

        tx.execute(
            "INSERT INTO legal_holds
                 (id, organization_id, hold_name, matter_reference, description,
                  applies_to_all, call_ids, effective_until, status, created_by,
                  created_at, released_at, released_by, release_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, NULL, NULL)",
            params![
                hold.id.to_string(),
                hold.organization_id.to_string(),
                hold.hold_name,
                hold.matter_reference,
                hold.description,
                i64::from(hold.applies_to_all),
                serde_json::to_string(&hold.call_ids).unwrap_or_else(|_| "[]".to_string()),
                hold.effective_until.map(|t| t.to_rfc3339()),
                to_sql_enum(&hold.status),
                hold.created_by.to_string(),
                hold.created_at.to_rfc3339(),
            ],
        )?;

        // Hold creation and release are symmetric: creation applies hold
        // custody state to every covered call, release reverts the calls
        // no other active hold still covers.
        let covered = if hold.applies_to_all {
            tx.execute(
                "UPDATE calls SET legal_hold_flag = 1, custody_status = ?1,
                        retention_class = ?2
                 WHERE organization_id = ?3",
                params![
                    to_sql_enum(&CustodyStatus::Active),
                    to_sql_enum(&RetentionClass::LegalHold),
                    hold.organization_id.to_string(),
                ],
            )?
        } else {
            apply_call_custody(
                &tx,
                hold.organization_id,
                &hold.call_ids,
                true,
                CustodyStatus::Active,
                RetentionClass::LegalHold,
            )?
        };

        tx.commit()?;
        debug!(hold_id = %hold.id, covered, "legal hold persisted");
        Ok(covered as u64)
    }

    /// All holds in the organization, newest first.
    ///
    /// # Errors
    ///
    /// Returns a database error on read failure or a corrupt-row error.
    pub fn list_holds(&self, organization_id: Uuid) -> Result<Vec<LegalHold>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{HOLD_SELECT} WHERE organization_id = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![organization_id.to_string()], row_to_hold)?;
        let mut holds = Vec::new();
        for row in rows {
            holds.push(row??);
        }
        Ok(holds)
    }

    /// Loads a hold by id, scoped to the organization.
    ///
    /// # Errors
    ///
    /// Returns a database error on read failure or a corrupt-row error.
    pub fn get_hold(
        &self,
        organization_id: Uuid,
        hold_id: Uuid,
    ) -> Result<Option<LegalHold>, StoreError> {
        let conn = self.lock()?;
        query_hold(&conn, organization_id, hold_id)
    }

    /// Releases a hold and cascades custody updates to the calls no other
    /// active hold still covers, all inside one `IMMEDIATE` transaction.
    ///
    /// The "other active holds" read happens after the write lock is
    /// taken, so two concurrent releases cannot both observe the other's
    /// hold as still active and under- or over-release.
    ///
    /// # Errors
    ///
    /// Returns a database error on failure; the transaction rolls back.
    pub fn release_hold(
        &self,
        organization_id: Uuid,
        hold_id: Uuid,
        released_by: Uuid,
        release_reason: &str,
        released_at: DateTime<Utc>,
    ) -> Result<HoldReleaseOutcome, StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(mut hold) = query_hold(&tx, organization_id, hold_id)? else {
            return Ok(HoldReleaseOutcome::NotFound);
        };
        if hold.status == HoldStatus::Released {
            return Ok(HoldReleaseOutcome::AlreadyReleased);
        }

        tx.execute(
            "UPDATE legal_holds
             SET status = ?1, released_at = ?2, released_by = ?3, release_reason = ?4
             WHERE id = ?5",
            params![
                to_sql_enum(&HoldStatus::Released),
                released_at.to_rfc3339(),
                released_by.to_string(),
                release_reason,
                hold_id.to_string(),
            ],
        )?;

        let other_active = query_active_holds_except(&tx, organization_id, hold_id)?;
        let candidates = if hold.applies_to_all {
            all_call_ids(&tx, organization_id)?
        } else {
            hold.call_ids.clone()
        };
        let released_calls = calls_to_release(&candidates, &other_active);

        if !released_calls.is_empty() {
            apply_call_custody(
                &tx,
                organization_id,
                &released_calls,
                false,
                CustodyStatus::Active,
                RetentionClass::Default,
            )?;
        }

        tx.commit()?;

        hold.status = HoldStatus::Released;
        hold.released_at = Some(released_at);
        hold.released_by = Some(released_by);
        hold.release_reason = Some(release_reason.to_string());

        Ok(HoldReleaseOutcome::Released {
            hold,
            released_calls,
        })
    }

    // ------------------------------------------------------------------
    // Audit log
    // ------------------------------------------------------------------

    /// Appends a write-once audit row.
    ///
    /// # Errors
    ///
    /// Returns a database error on write failure.
    pub fn record_audit(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO audit_logs
                 (id, organization_id, user_id, resource_type, resource_id, action,
                  before, after, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id.to_string(),
                record.organization_id.to_string(),
                record.user_id.to_string(),
                record.resource_type,
                record.resource_id,
                record.action,
                record.before.as_ref().map(ToString::to_string),
                record.after.as_ref().map(ToString::to_string),
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All audit rows for an organization, oldest first. Test and
    /// operator-tooling surface.
    ///
    /// # Errors
    ///
    /// Returns a database error on read failure or a corrupt-row error.
    pub fn list_audit(&self, organization_id: Uuid) -> Result<Vec<AuditRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, organization_id, user_id, resource_type, resource_id, action,
                    before, after, created_at
             FROM audit_logs WHERE organization_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![organization_id.to_string()], row_to_audit)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }
}

const BUNDLE_SELECT: &str = "SELECT id, organization_id, manifest_id, bundle_payload, \
     bundle_hash, evidence_completeness, custody_status, retention_class, legal_hold_flag, \
     tsa_status, tsa_received_at, tsa_error, superseded_at, created_at FROM evidence_bundles";

const HOLD_SELECT: &str = "SELECT id, organization_id, hold_name, matter_reference, \
     description, applies_to_all, call_ids, effective_until, status, created_by, created_at, \
     released_at, released_by, release_reason FROM legal_holds";

fn insert_call_row(conn: &Connection, call: &CallRecord) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO calls
             (id, organization_id, legal_hold_flag, custody_status, retention_class, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            call.id.to_string(),
            call.organization_id.to_string(),
            i64::from(call.legal_hold_flag),
            to_sql_enum(&call.custody_status),
            to_sql_enum(&call.retention_class),
            call.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Applies custody columns to an explicit call set, returning the number
/// of rows updated.
fn apply_call_custody(
    conn: &Connection,
    organization_id: Uuid,
    ids: &[Uuid],
    legal_hold_flag: bool,
    custody_status: CustodyStatus,
    retention_class: RetentionClass,
) -> Result<usize, StoreError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!(
        "UPDATE calls SET legal_hold_flag = ?1, custody_status = ?2, retention_class = ?3
         WHERE organization_id = ?4 AND id IN ({placeholders})"
    );
    let mut bind: Vec<SqlValue> = vec![
        SqlValue::Integer(i64::from(legal_hold_flag)),
        SqlValue::Text(to_sql_enum(&custody_status)),
        SqlValue::Text(to_sql_enum(&retention_class)),
        SqlValue::Text(organization_id.to_string()),
    ];
    bind.extend(ids.iter().map(|id| SqlValue::Text(id.to_string())));
    let updated = conn.execute(&sql, params_from_iter(bind))?;
    Ok(updated)
}

fn existing_call_ids(
    conn: &Connection,
    organization_id: Uuid,
    ids: &[Uuid],
) -> Result<HashSet<Uuid>, StoreError> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!(
        "SELECT id FROM calls WHERE organization_id = ? AND id IN ({placeholders})"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params_from_iter(
            std::iter::once(organization_id.to_string())
                .chain(ids.iter().map(ToString::to_string)),
        ),
        |row| row.get::<_, String>(0),
    )?;
    let mut found = HashSet::new();
    for row in rows {
        let raw = row?;
        found.insert(parse_uuid("calls", &raw, &raw)?);
    }
    Ok(found)
}

fn all_call_ids(conn: &Connection, organization_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
    let mut stmt = conn.prepare("SELECT id FROM calls WHERE organization_id = ?1")?;
    let rows = stmt.query_map(params![organization_id.to_string()], |row| {
        row.get::<_, String>(0)
    })?;
    let mut ids = Vec::new();
    for row in rows {
        let raw = row?;
        ids.push(parse_uuid("calls", &raw, &raw)?);
    }
    Ok(ids)
}

fn query_hold(
    conn: &Connection,
    organization_id: Uuid,
    hold_id: Uuid,
) -> Result<Option<LegalHold>, StoreError> {
    conn.query_row(
        &format!("{HOLD_SELECT} WHERE organization_id = ?1 AND id = ?2"),
        params![organization_id.to_string(), hold_id.to_string()],
        row_to_hold,
    )
    .optional()
    .map_err(StoreError::from)?
    .transpose()
}

fn query_active_holds_except(
    conn: &Connection,
    organization_id: Uuid,
    hold_id: Uuid,
) -> Result<Vec<LegalHold>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "{HOLD_SELECT} WHERE organization_id = ?1 AND status = ?2 AND id != ?3"
    ))?;
    let rows = stmt.query_map(
        params![
            organization_id.to_string(),
            to_sql_enum(&HoldStatus::Active),
            hold_id.to_string()
        ],
        row_to_hold,
    )?;
    let mut holds = Vec::new();
    for row in rows {
        holds.push(row??);
    }
    Ok(holds)
}

// ----------------------------------------------------------------------
// Row decoding
// ----------------------------------------------------------------------

type RowResult<T> = Result<Result<T, StoreError>, rusqlite::Error>;

fn row_to_manifest(row: &Row<'_>) -> RowResult<EvidenceManifest> {
    let id: String = row.get(0)?;
    let organization_id: String = row.get(1)?;
    let call_id: String = row.get(2)?;
    let manifest: String = row.get(3)?;
    let cryptographic_hash: Option<String> = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok((|| {
        Ok(EvidenceManifest {
            id: parse_uuid("evidence_manifests", &id, &id)?,
            organization_id: parse_uuid("evidence_manifests", &id, &organization_id)?,
            call_id: parse_uuid("evidence_manifests", &id, &call_id)?,
            manifest: parse_json("evidence_manifests", &id, &manifest)?,
            cryptographic_hash,
            created_at: parse_timestamp("evidence_manifests", &id, &created_at)?,
        })
    })())
}

fn row_to_bundle(row: &Row<'_>) -> RowResult<EvidenceBundle> {
    let id: String = row.get(0)?;
    let organization_id: String = row.get(1)?;
    let manifest_id: String = row.get(2)?;
    let bundle_payload: Option<String> = row.get(3)?;
    let bundle_hash: Option<String> = row.get(4)?;
    let evidence_completeness: String = row.get(5)?;
    let custody_status: String = row.get(6)?;
    let retention_class: String = row.get(7)?;
    let legal_hold_flag: i64 = row.get(8)?;
    let tsa_status: Option<String> = row.get(9)?;
    let tsa_received_at: Option<String> = row.get(10)?;
    let tsa_error: Option<String> = row.get(11)?;
    let superseded_at: Option<String> = row.get(12)?;
    let created_at: String = row.get(13)?;
    Ok((|| {
        Ok(EvidenceBundle {
            id: parse_uuid("evidence_bundles", &id, &id)?,
            organization_id: parse_uuid("evidence_bundles", &id, &organization_id)?,
            manifest_id: parse_uuid("evidence_bundles", &id, &manifest_id)?,
            bundle_payload: bundle_payload
                .as_deref()
                .map(|raw| parse_json("evidence_bundles", &id, raw))
                .transpose()?,
            bundle_hash,
            evidence_completeness: from_sql_enum::<EvidenceCompleteness>(
                "evidence_bundles",
                &id,
                &evidence_completeness,
            )?,
            custody_status: from_sql_enum::<CustodyStatus>("evidence_bundles", &id, &custody_status)?,
            retention_class: from_sql_enum::<RetentionClass>(
                "evidence_bundles",
                &id,
                &retention_class,
            )?,
            legal_hold_flag: legal_hold_flag != 0,
            tsa_status: tsa_status
                .as_deref()
                .map(|raw| from_sql_enum::<TsaStatus>("evidence_bundles", &id, raw))
                .transpose()?,
            tsa_received_at: tsa_received_at
                .as_deref()
                .map(|raw| parse_timestamp("evidence_bundles", &id, raw))
                .transpose()?,
            tsa_error,
            superseded_at: superseded_at
                .as_deref()
                .map(|raw| parse_timestamp("evidence_bundles", &id, raw))
                .transpose()?,
            created_at: parse_timestamp("evidence_bundles", &id, &created_at)?,
        })
    })())
}

fn row_to_hold(row: &Row<'_>) -> RowResult<LegalHold> {
    let id: String = row.get(0)?;
    let organization_id: String = row.get(1)?;
    let hold_name: String = row.get(2)?;
    let matter_reference: Option<String> = row.get(3)?;
    let description: Option<String> = row.get(4)?;
    let applies_to_all: i64 = row.get(5)?;
    let call_ids: String = row.get(6)?;
    let effective_until: Option<String> = row.get(7)?;
    let status: String = row.get(8)?;
    let created_by: String = row.get(9)?;
    let created_at: String = row.get(10)?;
    let released_at: Option<String> = row.get(11)?;
    let released_by: Option<String> = row.get(12)?;
    let release_reason: Option<String> = row.get(13)?;
    Ok((|| {
        Ok(LegalHold {
            id: parse_uuid("legal_holds", &id, &id)?,
            organization_id: parse_uuid("legal_holds", &id, &organization_id)?,
            hold_name,
            matter_reference,
            description,
            applies_to_all: applies_to_all != 0,
            call_ids: serde_json::from_str(&call_ids).map_err(|e| StoreError::CorruptRow {
                table: "legal_holds",
                id: id.clone(),
                reason: e.to_string(),
            })?,
            effective_until: effective_until
                .as_deref()
                .map(|raw| parse_timestamp("legal_holds", &id, raw))
                .transpose()?,
            status: from_sql_enum::<HoldStatus>("legal_holds", &id, &status)?,
            created_by: parse_uuid("legal_holds", &id, &created_by)?,
            created_at: parse_timestamp("legal_holds", &id, &created_at)?,
            released_at: released_at
                .as_deref()
                .map(|raw| parse_timestamp("legal_holds", &id, raw))
                .transpose()?,
            released_by: released_by
                .as_deref()
                .map(|raw| parse_uuid("legal_holds", &id, raw))
                .transpose()?,
            release_reason,
        })
    })())
}

fn row_to_call(row: &Row<'_>) -> RowResult<CallRecord> {
    let id: String = row.get(0)?;
    let organization_id: String = row.get(1)?;
    let legal_hold_flag: i64 = row.get(2)?;
    let custody_status: String = row.get(3)?;
    let retention_class: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok((|| {
        Ok(CallRecord {
            id: parse_uuid("calls", &id, &id)?,
            organization_id: parse_uuid("calls", &id, &organization_id)?,
            legal_hold_flag: legal_hold_flag != 0,
            custody_status: from_sql_enum::<CustodyStatus>("calls", &id, &custody_status)?,
            retention_class: from_sql_enum::<RetentionClass>("calls", &id, &retention_class)?,
            created_at: parse_timestamp("calls", &id, &created_at)?,
        })
    })())
}

fn row_to_audit(row: &Row<'_>) -> RowResult<AuditRecord> {
    let id: String = row.get(0)?;
    let organization_id: String = row.get(1)?;
    let user_id: String = row.get(2)?;
    let resource_type: String = row.get(3)?;
    let resource_id: String = row.get(4)?;
    let action: String = row.get(5)?;
    let before: Option<String> = row.get(6)?;
    let after: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;
    Ok((|| {
        Ok(AuditRecord {
            id: parse_uuid("audit_logs", &id, &id)?,
            organization_id: parse_uuid("audit_logs", &id, &organization_id)?,
            user_id: parse_uuid("audit_logs", &id, &user_id)?,
            resource_type,
            resource_id,
            action,
            before: before
                .as_deref()
                .map(|raw| parse_json("audit_logs", &id, raw))
                .transpose()?,
            after: after
                .as_deref()
                .map(|raw| parse_json("audit_logs", &id, raw))
                .transpose()?,
            created_at: parse_timestamp("audit_logs", &id, &created_at)?,
        })
    })())
}

// ----------------------------------------------------------------------
// Scalar codecs
// ----------------------------------------------------------------------

/// Serializes a snake_case serde enum to its SQL TEXT form.
fn to_sql_enum<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => s,
        _ => String::new(),
    }
}

/// Parses a SQL TEXT column back into a snake_case serde enum.
fn from_sql_enum<T: DeserializeOwned>(
    table: &'static str,
    id: &str,
    raw: &str,
) -> Result<T, StoreError> {
    serde_json::from_value(Value::String(raw.to_owned())).map_err(|e| StoreError::CorruptRow {
        table,
        id: id.to_owned(),
        reason: e.to_string(),
    })
}

fn parse_uuid(table: &'static str, id: &str, raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        id: id.to_owned(),
        reason: e.to_string(),
    })
}

fn parse_timestamp(table: &'static str, id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            id: id.to_owned(),
            reason: e.to_string(),
        })
}

fn parse_json(table: &'static str, id: &str, raw: &str) -> Result<Value, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        id: id.to_owned(),
        reason: e.to_string(),
    })
}
