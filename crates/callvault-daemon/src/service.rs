//! Operation layer: authorization, store orchestration, audit emission.
//!
//! The service owns the boundary between the typed request surface and the
//! pure domain logic in `callvault-core`. Every operation takes a resolved
//! [`Actor`] and enforces tenant scoping before touching any record.
//! Integrity findings are report contents, never errors; the error type
//! here covers request problems (bad input, authorization, missing
//! records), not verification outcomes.

use std::sync::Arc;

use callvault_core::actor::Actor;
use callvault_core::hold::{
    HoldStatus, HoldValidationError, LegalHold, validate_hold_name, validate_release_reason,
};
use callvault_core::verify::{VerificationReport, verify_bundle, verify_manifest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink};
use crate::store::{EvidenceStore, HoldReleaseOutcome, StoreError};

/// Errors an operation can return to the dispatch layer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// The request was malformed or failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The actor may not perform this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The referenced record does not exist in the actor's organization.
    #[error("not found: {0}")]
    NotFound(String),

    /// The hold was already released; releases are not repeatable.
    #[error("legal hold already released")]
    AlreadyReleased,

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<HoldValidationError> for ServiceError {
    fn from(err: HoldValidationError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// Parameters for creating a legal hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateHoldParams {
    /// Human-readable hold name, 1 to 200 characters.
    pub hold_name: String,
    /// External matter or case reference.
    #[serde(default)]
    pub matter_reference: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Covers every call in the organization, present and future.
    #[serde(default)]
    pub applies_to_all: bool,
    /// Listed calls. Validated and stored as given, whether or not the
    /// hold is org-wide.
    #[serde(default)]
    pub call_ids: Vec<Uuid>,
    /// Advisory expiry; expired-but-active holds still cover.
    #[serde(default)]
    pub effective_until: Option<DateTime<Utc>>,
}

/// A hold together with the number of calls it currently covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldSummary {
    /// The hold record.
    #[serde(flatten)]
    pub hold: LegalHold,
    /// Live count of calls the hold covers.
    pub affected_call_count: u64,
}

/// Result of a successful hold release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleasedHold {
    /// The hold with release metadata applied.
    #[serde(flatten)]
    pub hold: LegalHold,
    /// Calls whose custody was reverted. Calls still covered by another
    /// active hold are excluded.
    pub released_call_ids: Vec<Uuid>,
}

/// The evidence subsystem's operation surface.
#[derive(Clone)]
pub struct EvidenceService {
    store: EvidenceStore,
    audit: Arc<dyn AuditSink>,
}

impl EvidenceService {
    /// Builds a service over a store and an audit sink.
    #[must_use]
    pub fn new(store: EvidenceStore, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Resolves the typed actor for a request envelope, or `None` when the
    /// user is not a member of the organization.
    ///
    /// # Errors
    ///
    /// Returns a store error on lookup failure.
    pub fn resolve_actor(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<Actor>, ServiceError> {
        Ok(self.store.resolve_actor(user_id, organization_id)?)
    }

    /// Verifies a bundle or a manifest, `bundle_id` taking precedence.
    ///
    /// Integrity problems come back inside the report with `ok: false`;
    /// only request-level problems (no id, unknown id, foreign tenant) are
    /// errors.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` when neither id is given, `NotFound` for an
    /// unknown id, `Forbidden` for a record outside the actor's
    /// organization.
    pub fn verify(
        &self,
        actor: &Actor,
        bundle_id: Option<Uuid>,
        manifest_id: Option<Uuid>,
    ) -> Result<VerificationReport, ServiceError> {
        if let Some(bundle_id) = bundle_id {
            let bundle = self
                .store
                .get_bundle(bundle_id)?
                .ok_or_else(|| ServiceError::NotFound(format!("bundle {bundle_id}")))?;
            if !actor.is_member_of(bundle.organization_id) {
                return Err(ServiceError::Forbidden(
                    "bundle belongs to another organization".to_string(),
                ));
            }
            let manifest = self.store.get_manifest(bundle.manifest_id)?;
            return Ok(verify_bundle(&bundle, manifest.as_ref()));
        }

        let Some(manifest_id) = manifest_id else {
            return Err(ServiceError::InvalidRequest(
                "either bundle_id or manifest_id is required".to_string(),
            ));
        };
        let manifest = self
            .store
            .get_manifest(manifest_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("manifest {manifest_id}")))?;
        if !actor.is_member_of(manifest.organization_id) {
            return Err(ServiceError::Forbidden(
                "manifest belongs to another organization".to_string(),
            ));
        }
        let active = self.store.active_bundle_for_manifest(manifest_id)?;
        Ok(verify_manifest(&manifest, active.map(|b| b.id)))
    }

    /// Creates a legal hold and flags every covered call.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-elevated actors, `InvalidRequest` for a bad
    /// name or unknown call ids.
    pub fn create_hold(
        &self,
        actor: &Actor,
        params: CreateHoldParams,
    ) -> Result<HoldSummary, ServiceError> {
        require_elevated(actor, "create legal holds")?;
        validate_hold_name(&params.hold_name)?;

        let now = Utc::now();
        let hold = LegalHold {
            id: Uuid::new_v4(),
            organization_id: actor.organization_id,
            hold_name: params.hold_name,
            matter_reference: params.matter_reference,
            description: params.description,
            applies_to_all: params.applies_to_all,
            call_ids: params.call_ids,
            effective_until: params.effective_until,
            status: HoldStatus::Active,
            created_by: actor.user_id,
            created_at: now,
            released_at: None,
            released_by: None,
            release_reason: None,
        };

        let covered = match self.store.create_hold(&hold) {
            Ok(covered) => covered,
            Err(StoreError::UnknownCalls { ids }) => {
                return Err(ServiceError::InvalidRequest(format!(
                    "unknown call ids: {ids:?}"
                )));
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            hold_id = %hold.id,
            organization_id = %actor.organization_id,
            applies_to_all = hold.applies_to_all,
            covered,
            "legal hold created"
        );
        let summary = HoldSummary {
            hold,
            affected_call_count: covered,
        };
        self.audit.record(AuditRecord::new(
            actor.organization_id,
            actor.user_id,
            "legal_hold",
            summary.hold.id.to_string(),
            "legal_hold.created",
            None,
            serde_json::to_value(&summary).ok(),
            now,
        ));

        Ok(summary)
    }

    /// All holds in the actor's organization, newest first. Org-wide
    /// holds carry a live count of every current call; explicit holds
    /// count their listed calls.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-elevated actors, or a store error on lookup
    /// failure.
    pub fn list_holds(&self, actor: &Actor) -> Result<Vec<HoldSummary>, ServiceError> {
        require_elevated(actor, "list legal holds")?;
        let holds = self.store.list_holds(actor.organization_id)?;
        let mut summaries = Vec::with_capacity(holds.len());
        for hold in holds {
            let affected_call_count = if hold.applies_to_all {
                self.store.count_calls(actor.organization_id)?
            } else {
                hold.call_ids.len() as u64
            };
            summaries.push(HoldSummary {
                hold,
                affected_call_count,
            });
        }
        Ok(summaries)
    }

    /// Releases a hold, reverting custody on the calls no other active
    /// hold still covers.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-elevated actors, `InvalidRequest` for an empty
    /// reason, `NotFound` for an unknown hold, `AlreadyReleased` when the
    /// hold is terminal (no mutation happens).
    pub fn release_hold(
        &self,
        actor: &Actor,
        hold_id: Uuid,
        release_reason: &str,
    ) -> Result<ReleasedHold, ServiceError> {
        require_elevated(actor, "release legal holds")?;
        validate_release_reason(release_reason)?;

        let now = Utc::now();
        let outcome = self.store.release_hold(
            actor.organization_id,
            hold_id,
            actor.user_id,
            release_reason,
            now,
        )?;
        let (hold, released_calls) = match outcome {
            HoldReleaseOutcome::Released {
                hold,
                released_calls,
            } => (hold, released_calls),
            HoldReleaseOutcome::NotFound => {
                return Err(ServiceError::NotFound(format!("legal hold {hold_id}")));
            }
            HoldReleaseOutcome::AlreadyReleased => return Err(ServiceError::AlreadyReleased),
        };

        info!(
            hold_id = %hold.id,
            organization_id = %actor.organization_id,
            released_calls = released_calls.len(),
            "legal hold released"
        );
        self.audit.record(AuditRecord::new(
            actor.organization_id,
            actor.user_id,
            "legal_hold",
            hold.id.to_string(),
            "legal_hold.released",
            Some(serde_json::json!({ "status": HoldStatus::Active })),
            serde_json::to_value(&hold).ok(),
            now,
        ));

        Ok(ReleasedHold {
            hold,
            released_call_ids: released_calls,
        })
    }

    /// The underlying store. Exposed for seeding and operator tooling.
    #[must_use]
    pub fn store(&self) -> &EvidenceStore {
        &self.store
    }
}

fn require_elevated(actor: &Actor, what: &str) -> Result<(), ServiceError> {
    if actor.role.is_elevated() {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!(
            "role {:?} may not {what}",
            actor.role
        )))
    }
}
