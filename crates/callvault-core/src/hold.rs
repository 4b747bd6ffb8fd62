//! Legal holds and cascading-release coverage computation.
//!
//! A legal hold is a standing instruction not to alter or destroy evidence
//! for the calls it covers, either an explicit call list or the whole
//! organization (`applies_to_all`). Releasing one hold must never clear
//! hold-derived state on a call that some other still-active hold covers;
//! the subtraction over the current active-hold set lives here as a pure
//! function so the store can run it inside the release transaction.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Maximum accepted length of a hold name.
pub const MAX_HOLD_NAME_LEN: usize = 200;

/// Lifecycle state of a hold. `released` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    /// The hold is in force.
    Active,
    /// The hold has been released. No further transitions.
    Released,
}

/// Validation failures for hold parameters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HoldValidationError {
    /// The hold name is empty or longer than [`MAX_HOLD_NAME_LEN`].
    #[error("hold_name must be 1-{max} characters, got {len}")]
    InvalidName {
        /// Actual name length in characters.
        len: usize,
        /// The maximum allowed length.
        max: usize,
    },

    /// The release reason is empty.
    #[error("release_reason must not be empty")]
    EmptyReleaseReason,
}

/// A standing instruction not to alter or destroy evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalHold {
    /// Hold identifier.
    pub id: Uuid,
    /// Owning organization.
    pub organization_id: Uuid,
    /// Human-readable name, 1-200 characters.
    pub hold_name: String,
    /// External matter/docket reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matter_reference: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Covers every call in the organization regardless of `call_ids`.
    pub applies_to_all: bool,
    /// Explicitly covered call identifiers. Stored even when
    /// `applies_to_all` makes it irrelevant.
    #[serde(default)]
    pub call_ids: Vec<Uuid>,
    /// Advisory expiry. Coverage is unaffected until explicit release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_until: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub status: HoldStatus,
    /// Who created the hold.
    pub created_by: Uuid,
    /// When the hold was created.
    pub created_at: DateTime<Utc>,
    /// When the hold was released.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    /// Who released the hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_by: Option<Uuid>,
    /// Why the hold was released.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_reason: Option<String>,
}

impl LegalHold {
    /// Whether the hold is in force.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == HoldStatus::Active
    }

    /// Whether the hold covers a call, explicitly or org-wide.
    #[must_use]
    pub fn covers(&self, call_id: Uuid) -> bool {
        self.applies_to_all || self.call_ids.contains(&call_id)
    }
}

/// Validates a hold name: 1-200 characters.
///
/// # Errors
///
/// Returns [`HoldValidationError::InvalidName`] when out of range.
pub fn validate_hold_name(name: &str) -> Result<(), HoldValidationError> {
    let len = name.chars().count();
    if len == 0 || len > MAX_HOLD_NAME_LEN {
        return Err(HoldValidationError::InvalidName {
            len,
            max: MAX_HOLD_NAME_LEN,
        });
    }
    Ok(())
}

/// Validates a release reason: non-empty after trimming.
///
/// # Errors
///
/// Returns [`HoldValidationError::EmptyReleaseReason`] when blank.
pub fn validate_release_reason(reason: &str) -> Result<(), HoldValidationError> {
    if reason.trim().is_empty() {
        return Err(HoldValidationError::EmptyReleaseReason);
    }
    Ok(())
}

/// Computes which candidate calls are safe to unflag once a hold is
/// released.
///
/// A call may only be released when no other still-active hold covers it,
/// whether through an explicit listing or an org-wide hold among
/// `other_active_holds`. Coverage is computed over the holds passed in,
/// which the caller must read inside the same transaction as the release
/// to avoid racing a concurrent release.
///
/// Candidate order is preserved; duplicates are dropped.
#[must_use]
pub fn calls_to_release(candidates: &[Uuid], other_active_holds: &[LegalHold]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .copied()
        .filter(|call_id| {
            !other_active_holds
                .iter()
                .any(|h| h.is_active() && h.covers(*call_id))
                && seen.insert(*call_id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn hold(applies_to_all: bool, call_ids: Vec<Uuid>, status: HoldStatus) -> LegalHold {
        LegalHold {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            hold_name: "matter".into(),
            matter_reference: None,
            description: None,
            applies_to_all,
            call_ids,
            effective_until: None,
            status,
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
            released_at: None,
            released_by: None,
            release_reason: None,
        }
    }

    #[test]
    fn test_validate_hold_name_bounds() {
        assert!(validate_hold_name("x").is_ok());
        assert!(validate_hold_name(&"a".repeat(MAX_HOLD_NAME_LEN)).is_ok());
        assert_eq!(
            validate_hold_name(""),
            Err(HoldValidationError::InvalidName { len: 0, max: 200 })
        );
        assert!(validate_hold_name(&"a".repeat(MAX_HOLD_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_release_reason() {
        assert!(validate_release_reason("matter settled").is_ok());
        assert_eq!(
            validate_release_reason("   "),
            Err(HoldValidationError::EmptyReleaseReason)
        );
    }

    #[test]
    fn test_coverage_explicit_and_org_wide() {
        let call = Uuid::new_v4();
        let explicit = hold(false, vec![call], HoldStatus::Active);
        assert!(explicit.covers(call));
        assert!(!explicit.covers(Uuid::new_v4()));

        let org_wide = hold(true, Vec::new(), HoldStatus::Active);
        assert!(org_wide.covers(Uuid::new_v4()));
    }

    #[test]
    fn test_release_subtracts_overlapping_coverage() {
        // H1 covers {A, B}; H2 covers {B, C}. Releasing H1 frees A only.
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let h2 = hold(false, vec![b, c], HoldStatus::Active);

        let released = calls_to_release(&[a, b], &[h2]);
        assert_eq!(released, vec![a]);
    }

    #[test]
    fn test_org_wide_hold_suppresses_all_releases() {
        let a = Uuid::new_v4();
        let org_wide = hold(true, Vec::new(), HoldStatus::Active);
        assert!(calls_to_release(&[a], &[org_wide]).is_empty());
    }

    #[test]
    fn test_released_holds_do_not_count_as_coverage() {
        let a = Uuid::new_v4();
        let stale_explicit = hold(false, vec![a], HoldStatus::Released);
        let stale_org_wide = hold(true, Vec::new(), HoldStatus::Released);
        assert_eq!(
            calls_to_release(&[a], &[stale_explicit, stale_org_wide]),
            vec![a]
        );
    }

    #[test]
    fn test_no_other_holds_releases_everything() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(calls_to_release(&[a, b], &[]), vec![a, b]);
    }

    #[test]
    fn test_duplicate_candidates_deduplicated() {
        let a = Uuid::new_v4();
        assert_eq!(calls_to_release(&[a, a], &[]), vec![a]);
    }
}
