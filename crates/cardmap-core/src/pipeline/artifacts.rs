//! Persisted step artifacts.
//!
//! Every step writes its full output as JSON into the artifact
//! directory, and every step reads its input back from the previous
//! step's file. Each artifact carries a header with the step version
//! and a fingerprint of the config it was produced under, so resumed
//! runs can detect stale inputs. Headers hold nothing run-specific:
//! re-running a step over unchanged input writes identical bytes.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::embedding::DroppedCard;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{
    CardCandidate, ClusterLabel, ClusterRecord, DatasetEntry, EmbeddingRecord, RejectedCard,
};

pub const FILTERED_FILE: &str = "filtered.json";
pub const EMBEDDINGS_FILE: &str = "embeddings.json";
pub const CLUSTERS_FILE: &str = "clusters.json";
pub const LABELS_FILE: &str = "labels.json";
pub const DATASET_FILE: &str = "dataset.json";

/// Bumped when an artifact's payload shape changes incompatibly.
pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactHeader {
    pub step: String,
    pub version: u32,
    pub config_fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact<T> {
    pub header: ArtifactHeader,
    pub data: T,
}

// --- Step payloads ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterArtifact {
    pub admitted: Vec<CardCandidate>,
    pub rejected: Vec<RejectedCard>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingArtifact {
    pub records: Vec<EmbeddingRecord>,
    pub dropped: Vec<DroppedCard>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterArtifact {
    pub clusters: Vec<ClusterRecord>,
    pub leaves: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelArtifact {
    pub labels: Vec<ClusterLabel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetArtifact {
    pub entries: Vec<DatasetEntry>,

    /// When the dataset was assembled. Only the final artifact is
    /// stamped; step artifacts stay reproducible byte for byte.
    pub generated_at: DateTime<Utc>,
}

/// Reads and writes step artifacts under one directory.
pub struct ArtifactStore {
    dir: PathBuf,
    fingerprint: String,
    pretty: bool,
}

impl ArtifactStore {
    pub fn new(dir: PathBuf, fingerprint: String, pretty: bool) -> Self {
        Self {
            dir,
            fingerprint,
            pretty,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn exists(&self, file: &str) -> bool {
        self.path(file).exists()
    }

    pub fn ensure_dir(&self) -> PipelineResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| PipelineError::Artifact {
            path: self.dir.clone(),
            message: format!("failed to create artifact directory: {e}"),
        })
    }

    /// Write an artifact atomically (temp file then rename).
    pub fn write<T: Serialize>(&self, file: &str, step: &str, data: &T) -> PipelineResult<()> {
        let artifact = Artifact {
            header: ArtifactHeader {
                step: step.to_string(),
                version: ARTIFACT_VERSION,
                config_fingerprint: self.fingerprint.clone(),
            },
            data,
        };

        let path = self.path(file);
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(&artifact)
        } else {
            serde_json::to_vec(&artifact)
        }
        .map_err(|e| PipelineError::Artifact {
            path: path.clone(),
            message: format!("serialization failed: {e}"),
        })?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &bytes).map_err(|e| PipelineError::Artifact {
            path: tmp.clone(),
            message: format!("write failed: {e}"),
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| PipelineError::Artifact {
            path: path.clone(),
            message: format!("rename failed: {e}"),
        })
    }

    /// Read an artifact back, warning when it was produced under a
    /// different configuration.
    pub fn read<T: DeserializeOwned>(&self, file: &str) -> PipelineResult<Artifact<T>> {
        let path = self.path(file);
        if !path.exists() {
            return Err(PipelineError::MissingArtifact(path));
        }
        let bytes = std::fs::read(&path).map_err(|e| PipelineError::Artifact {
            path: path.clone(),
            message: format!("read failed: {e}"),
        })?;
        let artifact: Artifact<T> =
            serde_json::from_slice(&bytes).map_err(|e| PipelineError::Artifact {
                path: path.clone(),
                message: format!("parse failed: {e}"),
            })?;

        if artifact.header.config_fingerprint != self.fingerprint {
            warn!(
                file,
                "artifact was produced under a different configuration"
            );
        }
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn store(dir: &Path) -> ArtifactStore {
        ArtifactStore::new(dir.to_path_buf(), "fp".to_string(), false)
    }

    fn candidate(id: &str) -> CardCandidate {
        CardCandidate {
            id: id.to_string(),
            keyword: "apple".to_string(),
            image: PathBuf::from("apple.png"),
            topic: None,
        }
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.ensure_dir().unwrap();

        let payload = FilterArtifact {
            admitted: vec![candidate("card_a")],
            rejected: vec![],
        };
        store.write(FILTERED_FILE, "filter", &payload).unwrap();

        let loaded: Artifact<FilterArtifact> = store.read(FILTERED_FILE).unwrap();
        assert_eq!(loaded.header.step, "filter");
        assert_eq!(loaded.header.version, ARTIFACT_VERSION);
        assert_eq!(loaded.header.config_fingerprint, "fp");
        assert_eq!(loaded.data.admitted.len(), 1);
        assert_eq!(loaded.data.admitted[0].id, "card_a");
    }

    #[test]
    fn test_rewriting_same_payload_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.ensure_dir().unwrap();

        let payload = FilterArtifact {
            admitted: vec![candidate("card_a"), candidate("card_b")],
            rejected: vec![],
        };
        store.write(FILTERED_FILE, "filter", &payload).unwrap();
        let first = std::fs::read(store.path(FILTERED_FILE)).unwrap();

        store.write(FILTERED_FILE, "filter", &payload).unwrap();
        let second = std::fs::read(store.path(FILTERED_FILE)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_artifact_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let err = store.read::<FilterArtifact>(FILTERED_FILE).unwrap_err();
        assert!(matches!(err, PipelineError::MissingArtifact(_)));
    }

    #[test]
    fn test_corrupt_artifact_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.ensure_dir().unwrap();
        std::fs::write(store.path(FILTERED_FILE), b"not json").unwrap();

        let err = store.read::<FilterArtifact>(FILTERED_FILE).unwrap_err();
        assert!(matches!(err, PipelineError::Artifact { .. }));
    }

    #[test]
    fn test_no_stray_temp_file_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.ensure_dir().unwrap();

        let payload = LabelArtifact { labels: vec![] };
        store.write(LABELS_FILE, "tag", &payload).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![LABELS_FILE.to_string()]);
    }
}
