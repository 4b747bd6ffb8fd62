//! Artifact references and normalized artifact-hash entries.
//!
//! An artifact is one produced evidentiary item tied to a call. The
//! [`ArtifactReference`] is the full inventory entry stored inside a
//! manifest document; the [`ArtifactHash`] triple is the normalized unit
//! used when comparing a bundle's snapshot against its manifest.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The kind of evidentiary item an artifact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    /// Raw call recording audio.
    Recording,
    /// Transcript derived from the recording.
    Transcript,
    /// Translation derived from a transcript.
    Translation,
    /// Post-call survey responses.
    Survey,
    /// Quality/compliance score over the call.
    Score,
}

impl ArtifactType {
    /// All artifact types a complete evidence set contains.
    pub const ALL: [Self; 5] = [
        Self::Recording,
        Self::Transcript,
        Self::Translation,
        Self::Survey,
        Self::Score,
    ];

    /// Wire name of the artifact type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recording => "recording",
            Self::Transcript => "transcript",
            Self::Translation => "translation",
            Self::Survey => "survey",
            Self::Score => "score",
        }
    }
}

/// Who or what produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducedBy {
    /// Produced automatically by the platform.
    System,
    /// Produced or uploaded by a human operator.
    Human,
    /// Produced by a model run.
    Model,
}

/// Provenance link to an artifact this one was derived from.
///
/// A translation's input is a transcript; a score's inputs are the
/// recording and transcript it judged. Order is semantically meaningful
/// and preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRef {
    /// Type of the input artifact.
    #[serde(rename = "type")]
    pub ref_type: ArtifactType,
    /// Identifier of the input artifact within its own store.
    pub id: String,
    /// Digest of the input artifact at derivation time, if known.
    pub hash: Option<String>,
}

/// One produced evidentiary item in a manifest's inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactReference {
    /// What kind of artifact this is.
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,

    /// Identifier of the artifact within its own store.
    pub id: String,

    /// Location the artifact can be fetched from, if materialized.
    pub uri: Option<String>,

    /// Content digest of the artifact. Some artifact types may not yet
    /// have a computed digest.
    pub sha256: Option<String>,

    /// Who or what produced the artifact.
    pub produced_by: ProducedBy,

    /// Model identifier when `produced_by` is `model`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produced_by_model: Option<String>,

    /// User identifier when `produced_by` is `human`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produced_by_user_id: Option<Uuid>,

    /// When the artifact was produced.
    pub produced_at: DateTime<Utc>,

    /// Ordered provenance chain to the artifacts this one derives from.
    #[serde(default)]
    pub input_refs: Vec<InputRef>,

    /// Monotonically increasing version per artifact identity.
    pub version: u64,

    /// Open key/value map for artifact-specific metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ArtifactReference {
    /// The normalized hash entry for this artifact.
    #[must_use]
    pub fn hash_entry(&self) -> ArtifactHash {
        ArtifactHash {
            artifact_type: self.artifact_type,
            id: self.id.clone(),
            sha256: self.sha256.clone(),
        }
    }
}

/// The `(type, id, sha256)` triple compared between bundle and manifest.
///
/// Unknown sibling fields are ignored during deserialization, so this type
/// also parses the full inventory entries embedded in manifest documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactHash {
    /// What kind of artifact the entry describes.
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    /// Identifier of the artifact within its own store.
    pub id: String,
    /// Content digest, if computed.
    pub sha256: Option<String>,
}

impl ArtifactHash {
    /// Ordering key used for unordered set comparison.
    fn sort_key(&self) -> (ArtifactType, &str) {
        (self.artifact_type, self.id.as_str())
    }
}

/// Sorts artifact-hash entries by `(type, id)` for order-independent
/// comparison. Same elements in a different order compare equal after
/// normalization.
#[must_use]
pub fn normalize_artifact_hashes(mut entries: Vec<ArtifactHash>) -> Vec<ArtifactHash> {
    entries.sort_by(|a, b| match a.sort_key().cmp(&b.sort_key()) {
        Ordering::Equal => a.sha256.cmp(&b.sha256),
        other => other,
    });
    entries
}

/// Extracts artifact-hash entries from a JSON array of inventory entries.
///
/// Entries that do not carry a well-formed `(type, id)` pair are skipped;
/// the resulting shorter list surfaces as an artifact-set mismatch during
/// verification rather than being silently accepted.
#[must_use]
pub fn artifact_hashes_from_json(entries: Option<&Value>) -> Vec<ArtifactHash> {
    let Some(Value::Array(items)) = entries else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<ArtifactHash>(item.clone()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entry(artifact_type: ArtifactType, id: &str, sha256: Option<&str>) -> ArtifactHash {
        ArtifactHash {
            artifact_type,
            id: id.to_string(),
            sha256: sha256.map(str::to_string),
        }
    }

    #[test]
    fn test_artifact_type_wire_names() {
        for artifact_type in ArtifactType::ALL {
            let wire = serde_json::to_value(artifact_type).unwrap();
            assert_eq!(wire, json!(artifact_type.as_str()));
        }
    }

    #[test]
    fn test_normalize_sorts_by_type_then_id() {
        let entries = vec![
            entry(ArtifactType::Transcript, "t1", Some("sha256:bb")),
            entry(ArtifactType::Recording, "r2", None),
            entry(ArtifactType::Recording, "r1", Some("sha256:aa")),
        ];
        let normalized = normalize_artifact_hashes(entries);
        assert_eq!(
            normalized
                .iter()
                .map(|e| e.id.as_str())
                .collect::<Vec<_>>(),
            ["r1", "r2", "t1"]
        );
    }

    #[test]
    fn test_normalized_sets_compare_equal_across_order() {
        let a = vec![
            entry(ArtifactType::Recording, "r1", Some("sha256:aa")),
            entry(ArtifactType::Survey, "s1", None),
        ];
        let b: Vec<ArtifactHash> = a.iter().rev().cloned().collect();
        assert_eq!(
            normalize_artifact_hashes(a),
            normalize_artifact_hashes(b)
        );
    }

    #[test]
    fn test_hashes_from_json_ignores_extra_fields() {
        let doc = json!([
            {"type": "recording", "id": "r1", "sha256": "sha256:aa", "uri": "s3://x", "version": 1},
            {"type": "score", "id": "sc1", "sha256": null},
        ]);
        let entries = artifact_hashes_from_json(Some(&doc));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "r1");
        assert_eq!(entries[1].sha256, None);
    }

    #[test]
    fn test_hashes_from_json_skips_malformed_entries() {
        let doc = json!([
            {"type": "recording", "id": "r1", "sha256": "sha256:aa"},
            {"type": "not-a-type", "id": "x"},
            42,
        ]);
        let entries = artifact_hashes_from_json(Some(&doc));
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_hashes_from_json_non_array() {
        assert!(artifact_hashes_from_json(None).is_empty());
        assert!(artifact_hashes_from_json(Some(&json!("nope"))).is_empty());
    }

    #[test]
    fn test_reference_round_trip() {
        let reference = ArtifactReference {
            artifact_type: ArtifactType::Translation,
            id: "tr-1".into(),
            uri: Some("s3://bucket/tr-1".into()),
            sha256: Some("sha256:cc".into()),
            produced_by: ProducedBy::Model,
            produced_by_model: Some("translate-v2".into()),
            produced_by_user_id: None,
            produced_at: Utc::now(),
            input_refs: vec![InputRef {
                ref_type: ArtifactType::Transcript,
                id: "t-1".into(),
                hash: Some("sha256:bb".into()),
            }],
            version: 3,
            metadata: Map::new(),
        };
        let value = serde_json::to_value(&reference).unwrap();
        assert_eq!(value["type"], json!("translation"));
        let back: ArtifactReference = serde_json::from_value(value).unwrap();
        assert_eq!(back, reference);
        assert_eq!(back.hash_entry().id, "tr-1");
    }
}
