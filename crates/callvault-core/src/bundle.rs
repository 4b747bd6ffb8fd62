//! The custody/retention wrapper an external verifier actually inspects.
//!
//! A bundle snapshots a manifest's artifact hashes into its own payload,
//! seals the payload under a separate digest, and carries the custody
//! metadata (retention class, legal-hold flag, timestamp-authority state)
//! that decides whether the evidence may be released or purged. Exactly one
//! manifest per bundle; bundle versioning happens by superseding the old
//! bundle when a new one is issued against updated manifest state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::artifact::{ArtifactHash, ArtifactType, artifact_hashes_from_json};
use crate::canonical::{CanonicalJsonError, digest, validate_value};
use crate::manifest::EvidenceManifest;

/// Key holding the mirrored artifact hashes inside the bundle payload.
pub const ARTIFACT_HASHES_KEY: &str = "artifact_hashes";

/// Key holding the pointer copy of the manifest's sealed hash.
pub const PAYLOAD_MANIFEST_HASH_KEY: &str = "manifest_hash";

/// Whether all expected artifact types are present in the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceCompleteness {
    /// Every expected artifact type is present.
    Complete,
    /// Some but not all artifact types are present.
    Partial,
    /// No artifacts at all.
    Empty,
}

/// Whether the evidence is presently under organizational control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodyStatus {
    /// Under organizational control.
    Active,
    /// Custody has been released.
    Released,
}

/// Retention treatment applied to the bundle's call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionClass {
    /// Normal retention schedule.
    Default,
    /// Retention suspended by an active legal hold.
    LegalHold,
}

/// Timestamp-authority co-signing state. Best-effort and non-blocking;
/// verification passes these fields through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TsaStatus {
    /// Co-signature requested, not yet received.
    Pending,
    /// Co-signature received.
    Received,
    /// The TSA request failed.
    Failed,
}

/// The custody/retention wrapper around one manifest snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    /// Bundle identifier.
    pub id: Uuid,
    /// Owning organization.
    pub organization_id: Uuid,
    /// The single manifest this bundle wraps.
    pub manifest_id: Uuid,
    /// Canonical JSON snapshot: `artifact_hashes` plus, typically, a
    /// `manifest_hash` pointer copy taken at bundle-creation time.
    pub bundle_payload: Option<Value>,
    /// Sealed digest of `bundle_payload`.
    pub bundle_hash: Option<String>,
    /// Whether all expected artifact types are present.
    pub evidence_completeness: EvidenceCompleteness,
    /// Whether the evidence is under organizational control.
    pub custody_status: CustodyStatus,
    /// Retention treatment currently applied.
    pub retention_class: RetentionClass,
    /// True iff at least one active legal hold covers the bundle's call.
    pub legal_hold_flag: bool,
    /// Timestamp-authority co-signing state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsa_status: Option<TsaStatus>,
    /// When the TSA co-signature arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsa_received_at: Option<DateTime<Utc>>,
    /// TSA failure detail, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsa_error: Option<String>,
    /// Once set the bundle is historical and excluded from active-bundle
    /// lookups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_at: Option<DateTime<Utc>>,
    /// When the bundle was issued.
    pub created_at: DateTime<Utc>,
}

impl EvidenceBundle {
    /// Issues a sealed bundle against a manifest's current state.
    ///
    /// The payload snapshots the manifest's normalized artifact hashes and
    /// its sealed hash; completeness is derived from which artifact types
    /// are present.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalJsonError::MaxDepthExceeded`] when the payload
    /// fails the canonicalizer's depth check.
    pub fn issue_for(
        manifest: &EvidenceManifest,
        created_at: DateTime<Utc>,
    ) -> Result<Self, CanonicalJsonError> {
        let artifact_hashes = manifest.artifact_hashes();
        let completeness = completeness_of(&artifact_hashes);
        let mut payload = json!({ ARTIFACT_HASHES_KEY: artifact_hashes });
        if let (Some(stored), Some(fields)) = (manifest.stored_hash(), payload.as_object_mut()) {
            fields.insert(PAYLOAD_MANIFEST_HASH_KEY.to_string(), json!(stored));
        }
        let mut bundle = Self {
            id: Uuid::new_v4(),
            organization_id: manifest.organization_id,
            manifest_id: manifest.id,
            bundle_payload: Some(payload),
            bundle_hash: None,
            evidence_completeness: completeness,
            custody_status: CustodyStatus::Active,
            retention_class: RetentionClass::Default,
            legal_hold_flag: false,
            tsa_status: None,
            tsa_received_at: None,
            tsa_error: None,
            superseded_at: None,
            created_at,
        };
        bundle.seal()?;
        Ok(bundle)
    }

    /// Computes and stores the payload digest. No-op when the payload is
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalJsonError::MaxDepthExceeded`] when the payload
    /// fails the canonicalizer's depth check; the sealed hash is left
    /// untouched.
    pub fn seal(&mut self) -> Result<(), CanonicalJsonError> {
        if let Some(payload) = &self.bundle_payload {
            validate_value(payload)?;
        }
        self.bundle_hash = self.bundle_payload.as_ref().map(digest);
        Ok(())
    }

    /// Recomputes the payload digest without storing it.
    #[must_use]
    pub fn computed_hash(&self) -> Option<String> {
        self.bundle_payload.as_ref().map(digest)
    }

    /// Whether the bundle is the live one for its manifest.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.superseded_at.is_none()
    }

    /// The pointer copy of the manifest hash inside the payload, if any.
    #[must_use]
    pub fn payload_manifest_hash(&self) -> Option<&str> {
        self.bundle_payload
            .as_ref()
            .and_then(|payload| payload.get(PAYLOAD_MANIFEST_HASH_KEY))
            .and_then(Value::as_str)
    }

    /// Normalized artifact-hash entries from the payload snapshot.
    #[must_use]
    pub fn artifact_hashes(&self) -> Vec<ArtifactHash> {
        artifact_hashes_from_json(
            self.bundle_payload
                .as_ref()
                .and_then(|payload| payload.get(ARTIFACT_HASHES_KEY)),
        )
    }
}

/// Derives completeness from which artifact types are present.
fn completeness_of(entries: &[ArtifactHash]) -> EvidenceCompleteness {
    if entries.is_empty() {
        return EvidenceCompleteness::Empty;
    }
    let all_present = ArtifactType::ALL
        .iter()
        .all(|t| entries.iter().any(|e| e.artifact_type == *t));
    if all_present {
        EvidenceCompleteness::Complete
    } else {
        EvidenceCompleteness::Partial
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::artifact::{ArtifactReference, ProducedBy};

    fn artifact(artifact_type: ArtifactType, id: &str) -> ArtifactReference {
        ArtifactReference {
            artifact_type,
            id: id.to_string(),
            uri: None,
            sha256: Some(format!("sha256:{id}")),
            produced_by: ProducedBy::System,
            produced_by_model: None,
            produced_by_user_id: None,
            produced_at: Utc::now(),
            input_refs: Vec::new(),
            version: 1,
            metadata: serde_json::Map::new(),
        }
    }

    fn sealed_manifest(artifacts: &[ArtifactReference]) -> EvidenceManifest {
        let mut manifest =
            EvidenceManifest::new(Uuid::new_v4(), Uuid::new_v4(), artifacts, Utc::now());
        manifest.seal().unwrap();
        manifest
    }

    #[test]
    fn test_issue_snapshots_manifest_state() {
        let manifest = sealed_manifest(&[artifact(ArtifactType::Recording, "r1")]);
        let bundle = EvidenceBundle::issue_for(&manifest, Utc::now()).unwrap();

        assert_eq!(bundle.manifest_id, manifest.id);
        assert_eq!(bundle.organization_id, manifest.organization_id);
        assert_eq!(
            bundle.payload_manifest_hash(),
            manifest.stored_hash().as_deref()
        );
        assert_eq!(bundle.artifact_hashes(), manifest.artifact_hashes());
        assert!(bundle.is_active());
    }

    #[test]
    fn test_sealed_bundle_hash_matches_payload() {
        let manifest = sealed_manifest(&[artifact(ArtifactType::Recording, "r1")]);
        let bundle = EvidenceBundle::issue_for(&manifest, Utc::now()).unwrap();
        assert_eq!(bundle.bundle_hash, bundle.computed_hash());
    }

    #[test]
    fn test_payload_tamper_breaks_hash() {
        let manifest = sealed_manifest(&[artifact(ArtifactType::Recording, "r1")]);
        let mut bundle = EvidenceBundle::issue_for(&manifest, Utc::now()).unwrap();
        bundle.bundle_payload.as_mut().unwrap()[ARTIFACT_HASHES_KEY][0]["sha256"] =
            json!("sha256:bb");
        assert_ne!(bundle.bundle_hash, bundle.computed_hash());
    }

    #[test]
    fn test_completeness_derivation() {
        let full: Vec<ArtifactReference> = ArtifactType::ALL
            .iter()
            .enumerate()
            .map(|(i, t)| artifact(*t, &format!("a{i}")))
            .collect();

        let complete = EvidenceBundle::issue_for(&sealed_manifest(&full), Utc::now()).unwrap();
        assert_eq!(
            complete.evidence_completeness,
            EvidenceCompleteness::Complete
        );

        let partial = EvidenceBundle::issue_for(
            &sealed_manifest(&[artifact(ArtifactType::Recording, "r1")]),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(partial.evidence_completeness, EvidenceCompleteness::Partial);

        let empty = EvidenceBundle::issue_for(&sealed_manifest(&[]), Utc::now()).unwrap();
        assert_eq!(empty.evidence_completeness, EvidenceCompleteness::Empty);
    }

    #[test]
    fn test_superseded_bundle_is_not_active() {
        let manifest = sealed_manifest(&[artifact(ArtifactType::Recording, "r1")]);
        let mut bundle = EvidenceBundle::issue_for(&manifest, Utc::now()).unwrap();
        bundle.superseded_at = Some(Utc::now());
        assert!(!bundle.is_active());
    }

    #[test]
    fn test_seal_with_missing_payload_is_noop() {
        let manifest = sealed_manifest(&[]);
        let mut bundle = EvidenceBundle::issue_for(&manifest, Utc::now()).unwrap();
        bundle.bundle_payload = None;
        bundle.seal().unwrap();
        assert_eq!(bundle.bundle_hash, None);
        assert_eq!(bundle.computed_hash(), None);
    }

    #[test]
    fn test_seal_rejects_pathologically_deep_payload() {
        let manifest = sealed_manifest(&[artifact(ArtifactType::Recording, "r1")]);
        let mut bundle = EvidenceBundle::issue_for(&manifest, Utc::now()).unwrap();
        let sealed = bundle.bundle_hash.clone();

        let mut deep = json!(0);
        for _ in 0..=crate::canonical::MAX_DEPTH {
            deep = json!([deep]);
        }
        bundle.bundle_payload.as_mut().unwrap()["extra"] = deep;

        assert!(matches!(
            bundle.seal(),
            Err(CanonicalJsonError::MaxDepthExceeded { .. })
        ));
        assert_eq!(bundle.bundle_hash, sealed);
    }
}
