//! Structured verification reports over bundles and manifests.
//!
//! Integrity findings are first-class results of a successful verification
//! call, never errors: a single report aggregates every simultaneous
//! problem (hash mismatch, artifact-set drift, orphaned manifest) in its
//! `issues` list, and `ok` is simply "no issues". Loading records and
//! authorizing the caller belong to the service layer; the functions here
//! are pure reads over already-loaded records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::normalize_artifact_hashes;
use crate::bundle::{CustodyStatus, EvidenceBundle, EvidenceCompleteness, RetentionClass,
    TsaStatus};
use crate::manifest::EvidenceManifest;

/// Issue: the bundle record has no payload to hash.
pub const ISSUE_BUNDLE_PAYLOAD_MISSING: &str = "Bundle payload missing";
/// Issue: recomputed payload digest differs from the sealed bundle hash.
pub const ISSUE_BUNDLE_HASH_MISMATCH: &str = "Bundle hash mismatch";
/// Issue: the manifest the bundle references does not exist.
pub const ISSUE_MANIFEST_MISSING: &str = "Manifest missing for bundle";
/// Issue: recomputed manifest digest differs from the sealed manifest hash.
pub const ISSUE_MANIFEST_HASH_MISMATCH: &str = "Manifest hash mismatch";
/// Issue: bundle and manifest disagree on the artifact-hash set.
pub const ISSUE_ARTIFACT_HASHES_MISMATCH: &str =
    "Artifact hashes mismatch between bundle and manifest";
/// Issue: the payload's manifest-hash pointer disagrees with the manifest.
pub const ISSUE_PAYLOAD_MANIFEST_HASH_MISMATCH: &str =
    "Bundle manifest_hash does not match stored manifest hash";
/// Issue: no live bundle references the manifest.
pub const ISSUE_NO_ACTIVE_BUNDLE: &str = "No active evidence bundle found for manifest";

/// Bundle portion of a verification report.
///
/// The bundle path fills every field; the manifest path reduces the
/// summary to the referencing bundle's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleSummary {
    /// Bundle identifier.
    pub id: Uuid,
    /// The sealed hash on record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_hash: Option<String>,
    /// The digest recomputed from the payload; absent when the payload is
    /// missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_hash: Option<String>,
    /// Whether stored and computed hashes agree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_match: Option<bool>,
    /// Completeness recorded on the bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_completeness: Option<EvidenceCompleteness>,
    /// Custody status recorded on the bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custody_status: Option<CustodyStatus>,
    /// Retention class recorded on the bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_class: Option<RetentionClass>,
    /// Legal-hold flag recorded on the bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_hold_flag: Option<bool>,
    /// Timestamp-authority state, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsa_status: Option<TsaStatus>,
    /// When the TSA co-signature arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsa_received_at: Option<chrono::DateTime<chrono::Utc>>,
    /// TSA failure detail, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsa_error: Option<String>,
}

impl BundleSummary {
    /// Reduced summary used on the manifest path: just the id of the live
    /// bundle referencing the manifest.
    #[must_use]
    pub const fn reference(id: Uuid) -> Self {
        Self {
            id,
            stored_hash: None,
            computed_hash: None,
            hash_match: None,
            evidence_completeness: None,
            custody_status: None,
            retention_class: None,
            legal_hold_flag: None,
            tsa_status: None,
            tsa_received_at: None,
            tsa_error: None,
        }
    }
}

/// Manifest portion of a verification report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestSummary {
    /// Manifest identifier.
    pub id: Uuid,
    /// The sealed hash on record (embedded field or legacy alias).
    pub stored_hash: Option<String>,
    /// The digest recomputed from the document.
    pub computed_hash: String,
    /// Whether a stored hash exists and agrees with the recomputation.
    pub hash_match: bool,
}

/// Artifact-count cross-check between bundle payload and manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCounts {
    /// Entries in the bundle payload's `artifact_hashes`.
    pub bundle: usize,
    /// Entries in the manifest's artifact inventory.
    pub manifest: usize,
    /// Whether the normalized sets are structurally equal.
    pub hashes_match: bool,
}

/// The structured pass/fail result of a verification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// True iff no issues were found.
    pub ok: bool,
    /// Bundle summary, or `None` when the manifest path found no live
    /// bundle.
    pub bundle: Option<BundleSummary>,
    /// Manifest summary, or `None` when the manifest was missing.
    pub manifest: Option<ManifestSummary>,
    /// Artifact-set cross-check, when both sides were comparable.
    pub artifacts: Option<ArtifactCounts>,
    /// Every problem found, in detection order.
    pub issues: Vec<String>,
}

/// Verifies a bundle against its (possibly missing) manifest.
///
/// Recomputes the payload digest, recomputes the manifest digest,
/// cross-checks the normalized artifact-hash sets, and checks the
/// payload's manifest-hash pointer. Pure: no retries, no external calls.
#[must_use]
pub fn verify_bundle(
    bundle: &EvidenceBundle,
    manifest: Option<&EvidenceManifest>,
) -> VerificationReport {
    let mut issues = Vec::new();

    let computed_bundle_hash = bundle.computed_hash();
    let bundle_hash_match = match &computed_bundle_hash {
        None => {
            issues.push(ISSUE_BUNDLE_PAYLOAD_MISSING.to_string());
            None
        },
        Some(computed) => {
            let matches = bundle.bundle_hash.as_deref() == Some(computed.as_str());
            if !matches {
                issues.push(ISSUE_BUNDLE_HASH_MISMATCH.to_string());
            }
            Some(matches)
        },
    };

    let mut manifest_summary = None;
    let mut artifacts = None;

    match manifest {
        None => issues.push(ISSUE_MANIFEST_MISSING.to_string()),
        Some(manifest) => {
            let stored_manifest_hash = manifest.stored_hash();
            let computed_manifest_hash = manifest.computed_hash();
            let manifest_hash_match =
                stored_manifest_hash.as_deref() == Some(computed_manifest_hash.as_str());
            if !manifest_hash_match {
                issues.push(ISSUE_MANIFEST_HASH_MISMATCH.to_string());
            }
            manifest_summary = Some(ManifestSummary {
                id: manifest.id,
                stored_hash: stored_manifest_hash.clone(),
                computed_hash: computed_manifest_hash,
                hash_match: manifest_hash_match,
            });

            // Artifact sets compare order-independently; the payload's
            // snapshot must equal the manifest inventory as a set. A
            // missing payload compares as the empty set, so the count
            // drift is still visible in the report.
            let bundle_hashes = normalize_artifact_hashes(bundle.artifact_hashes());
            let manifest_hashes = normalize_artifact_hashes(manifest.artifact_hashes());
            let hashes_match = bundle_hashes == manifest_hashes;
            if !hashes_match {
                issues.push(ISSUE_ARTIFACT_HASHES_MISMATCH.to_string());
            }
            artifacts = Some(ArtifactCounts {
                bundle: bundle_hashes.len(),
                manifest: manifest_hashes.len(),
                hashes_match,
            });

            if let Some(pointer) = bundle.payload_manifest_hash() {
                if stored_manifest_hash.as_deref() != Some(pointer) {
                    issues.push(ISSUE_PAYLOAD_MANIFEST_HASH_MISMATCH.to_string());
                }
            }
        },
    }

    VerificationReport {
        ok: issues.is_empty(),
        bundle: Some(BundleSummary {
            id: bundle.id,
            stored_hash: bundle.bundle_hash.clone(),
            computed_hash: computed_bundle_hash,
            hash_match: bundle_hash_match,
            evidence_completeness: Some(bundle.evidence_completeness),
            custody_status: Some(bundle.custody_status),
            retention_class: Some(bundle.retention_class),
            legal_hold_flag: Some(bundle.legal_hold_flag),
            tsa_status: bundle.tsa_status,
            tsa_received_at: bundle.tsa_received_at,
            tsa_error: bundle.tsa_error.clone(),
        }),
        manifest: manifest_summary,
        artifacts,
        issues,
    }
}

/// Verifies a manifest on its own: hash recomputation plus orphan
/// detection.
///
/// A manifest with no live (non-superseded) bundle cannot be presented as
/// evidence; `active_bundle_id` is the id of such a bundle when one
/// exists.
#[must_use]
pub fn verify_manifest(
    manifest: &EvidenceManifest,
    active_bundle_id: Option<Uuid>,
) -> VerificationReport {
    let mut issues = Vec::new();

    let stored_hash = manifest.stored_hash();
    let computed_hash = manifest.computed_hash();
    let hash_match = stored_hash.as_deref() == Some(computed_hash.as_str());
    if !hash_match {
        issues.push(ISSUE_MANIFEST_HASH_MISMATCH.to_string());
    }

    if active_bundle_id.is_none() {
        issues.push(ISSUE_NO_ACTIVE_BUNDLE.to_string());
    }

    VerificationReport {
        ok: issues.is_empty(),
        bundle: active_bundle_id.map(BundleSummary::reference),
        manifest: Some(ManifestSummary {
            id: manifest.id,
            stored_hash,
            computed_hash,
            hash_match,
        }),
        artifacts: None,
        issues,
    }
}
