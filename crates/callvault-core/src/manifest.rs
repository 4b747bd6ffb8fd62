//! The sealed artifact inventory for one call.
//!
//! A manifest owns the artifact list for one evidentiary snapshot of a
//! call. Once sealed its hash is embedded in the document and the record is
//! immutable; a call that re-collects evidence gets a new, independent
//! manifest addressed by its own hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::artifact::{ArtifactHash, ArtifactReference, artifact_hashes_from_json};
use crate::canonical::{CanonicalJsonError, digest, validate_value};

/// Key under which the sealed hash is embedded in the manifest document.
pub const MANIFEST_HASH_KEY: &str = "manifest_hash";

/// Key holding the artifact inventory inside the manifest document.
pub const ARTIFACTS_KEY: &str = "artifacts";

/// The artifact inventory for one call, hash-addressed once sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceManifest {
    /// Manifest identifier.
    pub id: Uuid,
    /// Owning organization.
    pub organization_id: Uuid,
    /// The call this manifest documents.
    pub call_id: Uuid,
    /// The manifest document: artifact list plus, once sealed, a
    /// self-referential `manifest_hash` field.
    pub manifest: Value,
    /// Legacy alias that may duplicate `manifest.manifest_hash`.
    pub cryptographic_hash: Option<String>,
    /// When the manifest was created.
    pub created_at: DateTime<Utc>,
}

impl EvidenceManifest {
    /// Builds an unsealed manifest from an artifact inventory.
    #[must_use]
    pub fn new(
        organization_id: Uuid,
        call_id: Uuid,
        artifacts: &[ArtifactReference],
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            call_id,
            manifest: json!({ ARTIFACTS_KEY: artifacts }),
            cryptographic_hash: None,
            created_at,
        }
    }

    /// The hash recorded at sealing time: the embedded `manifest_hash`
    /// field, falling back to the legacy `cryptographic_hash` column.
    #[must_use]
    pub fn stored_hash(&self) -> Option<String> {
        self.manifest
            .get(MANIFEST_HASH_KEY)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| self.cryptographic_hash.clone())
    }

    /// Recomputes the manifest digest from the document.
    ///
    /// The sealed hash covers the document minus its own embedding, so the
    /// `manifest_hash` key is stripped before canonicalization. Without the
    /// strip, no sealed manifest could ever verify (the digest would have
    /// to be its own fixed point).
    #[must_use]
    pub fn computed_hash(&self) -> String {
        digest(&self.hashable_document())
    }

    /// The document with the self-referential hash field removed.
    #[must_use]
    pub fn hashable_document(&self) -> Value {
        let mut doc = self.manifest.clone();
        if let Some(fields) = doc.as_object_mut() {
            fields.remove(MANIFEST_HASH_KEY);
        }
        doc
    }

    /// Computes the digest and embeds it in the document and the legacy
    /// alias column. Sealing is idempotent: resealing an untouched
    /// manifest produces the same hash.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalJsonError::MaxDepthExceeded`] when the document
    /// nests deeper than the canonicalizer's depth bound; the manifest is
    /// left unsealed.
    pub fn seal(&mut self) -> Result<(), CanonicalJsonError> {
        validate_value(&self.hashable_document())?;
        let hash = self.computed_hash();
        if let Some(fields) = self.manifest.as_object_mut() {
            fields.insert(MANIFEST_HASH_KEY.to_string(), json!(hash));
        }
        self.cryptographic_hash = Some(hash);
        Ok(())
    }

    /// Whether the stored hash still matches the document contents.
    #[must_use]
    pub fn hash_matches(&self) -> bool {
        self.stored_hash()
            .is_some_and(|stored| stored == self.computed_hash())
    }

    /// Normalized artifact-hash entries derived from the inventory.
    #[must_use]
    pub fn artifact_hashes(&self) -> Vec<ArtifactHash> {
        artifact_hashes_from_json(self.manifest.get(ARTIFACTS_KEY))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::artifact::{ArtifactType, ProducedBy};

    fn artifact(id: &str, sha256: Option<&str>) -> ArtifactReference {
        ArtifactReference {
            artifact_type: ArtifactType::Recording,
            id: id.to_string(),
            uri: None,
            sha256: sha256.map(str::to_string),
            produced_by: ProducedBy::System,
            produced_by_model: None,
            produced_by_user_id: None,
            produced_at: Utc::now(),
            input_refs: Vec::new(),
            version: 1,
            metadata: serde_json::Map::new(),
        }
    }

    fn sealed_manifest() -> EvidenceManifest {
        let mut manifest = EvidenceManifest::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            &[artifact("r1", Some("sha256:aa"))],
            Utc::now(),
        );
        manifest.seal().unwrap();
        manifest
    }

    #[test]
    fn test_seal_embeds_hash_and_alias() {
        let manifest = sealed_manifest();
        let embedded = manifest.manifest[MANIFEST_HASH_KEY].as_str().unwrap();
        assert!(embedded.starts_with("sha256:"));
        assert_eq!(manifest.cryptographic_hash.as_deref(), Some(embedded));
        assert_eq!(manifest.stored_hash().as_deref(), Some(embedded));
    }

    #[test]
    fn test_sealed_manifest_verifies() {
        let manifest = sealed_manifest();
        assert!(manifest.hash_matches());
    }

    #[test]
    fn test_seal_is_idempotent() {
        let mut manifest = sealed_manifest();
        let first = manifest.stored_hash();
        manifest.seal().unwrap();
        assert_eq!(manifest.stored_hash(), first);
    }

    #[test]
    fn test_seal_rejects_pathologically_deep_document() {
        let mut manifest = EvidenceManifest::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            &[artifact("r1", None)],
            Utc::now(),
        );
        let mut deep = json!(0);
        for _ in 0..=crate::canonical::MAX_DEPTH {
            deep = json!([deep]);
        }
        manifest.manifest["extra"] = deep;

        assert!(matches!(
            manifest.seal(),
            Err(CanonicalJsonError::MaxDepthExceeded { .. })
        ));
        assert_eq!(manifest.stored_hash(), None);
    }

    #[test]
    fn test_tampering_breaks_hash() {
        let mut manifest = sealed_manifest();
        manifest.manifest[ARTIFACTS_KEY][0]["sha256"] = json!("sha256:bb");
        assert!(!manifest.hash_matches());
    }

    #[test]
    fn test_stored_hash_falls_back_to_alias() {
        let mut manifest = sealed_manifest();
        let sealed = manifest.stored_hash();
        if let Some(fields) = manifest.manifest.as_object_mut() {
            fields.remove(MANIFEST_HASH_KEY);
        }
        assert_eq!(manifest.stored_hash(), sealed);
        assert!(manifest.hash_matches());
    }

    #[test]
    fn test_unsealed_manifest_has_no_stored_hash() {
        let manifest = EvidenceManifest::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            &[artifact("r1", None)],
            Utc::now(),
        );
        assert_eq!(manifest.stored_hash(), None);
        assert!(!manifest.hash_matches());
    }

    #[test]
    fn test_artifact_hashes_extraction() {
        let manifest = sealed_manifest();
        let hashes = manifest.artifact_hashes();
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0].id, "r1");
        assert_eq!(hashes[0].sha256.as_deref(), Some("sha256:aa"));
    }
}
