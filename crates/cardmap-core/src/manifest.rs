//! Candidate intake: manifest parsing, directory scanning, pool sampling.
//!
//! Candidates come from either a JSON/JSONL manifest or a directory of
//! pictogram images. Before filtering, the pool is optionally capped per
//! topic with a seeded shuffle so repeated runs draw the same candidates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::error::{PipelineError, PipelineResult};
use crate::types::CardCandidate;

/// Image extensions recognized during directory intake.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "bmp"];

/// One entry of a candidate manifest. The id is optional; missing ids are
/// derived deterministically from the keyword and image path.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(default)]
    id: Option<String>,
    keyword: String,
    image: PathBuf,
    #[serde(default)]
    topic: Option<String>,
}

impl ManifestEntry {
    fn into_candidate(self) -> CardCandidate {
        let id = self
            .id
            .unwrap_or_else(|| derive_id(&self.keyword, &self.image));
        CardCandidate {
            id,
            keyword: self.keyword,
            image: self.image,
            topic: self.topic,
        }
    }
}

/// Derive a stable card id from the keyword and image path.
fn derive_id(keyword: &str, image: &Path) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(keyword.as_bytes());
    hasher.update(b"\x00");
    hasher.update(image.to_string_lossy().as_bytes());
    let hex = hasher.finalize().to_hex();
    format!("card_{}", &hex.as_str()[..12])
}

/// Load candidates from a manifest file or an image directory.
///
/// Directories are scanned recursively; each image becomes a candidate with
/// keyword = file stem (underscores become spaces) and topic = parent
/// directory name. Manifests may be a JSON array or JSONL.
pub fn load_candidates(path: &Path) -> PipelineResult<Vec<CardCandidate>> {
    if path.is_dir() {
        return scan_directory(path);
    }
    if !path.exists() {
        return Err(PipelineError::Intake {
            path: path.to_path_buf(),
            message: "input path does not exist".to_string(),
        });
    }
    parse_manifest(path)
}

fn parse_manifest(path: &Path) -> PipelineResult<Vec<CardCandidate>> {
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::Intake {
        path: path.to_path_buf(),
        message: format!("failed to read manifest: {e}"),
    })?;

    // JSON array first, then line-by-line JSONL
    let entries: Vec<ManifestEntry> = if let Ok(entries) = serde_json::from_str(&content) {
        entries
    } else {
        let mut entries = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: ManifestEntry =
                serde_json::from_str(line).map_err(|e| PipelineError::Intake {
                    path: path.to_path_buf(),
                    message: format!("line {}: {e}", lineno + 1),
                })?;
            entries.push(entry);
        }
        entries
    };

    if entries.is_empty() {
        return Err(PipelineError::Intake {
            path: path.to_path_buf(),
            message: "manifest contains no candidates".to_string(),
        });
    }

    let mut candidates: Vec<CardCandidate> =
        entries.into_iter().map(ManifestEntry::into_candidate).collect();
    candidates.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(candidates)
}

fn scan_directory(dir: &Path) -> PipelineResult<Vec<CardCandidate>> {
    let mut candidates = Vec::new();

    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry under {:?}: {e}", dir);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        if !matches!(ext.as_deref(), Some(e) if IMAGE_EXTENSIONS.contains(&e)) {
            continue;
        }

        let keyword = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .replace('_', " ");
        let topic = path
            .parent()
            .filter(|p| *p != dir)
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .map(String::from);

        candidates.push(CardCandidate {
            id: derive_id(&keyword, path),
            keyword,
            image: path.to_path_buf(),
            topic,
        });
    }

    if candidates.is_empty() {
        return Err(PipelineError::Intake {
            path: dir.to_path_buf(),
            message: "no image files found".to_string(),
        });
    }

    candidates.sort_by(|a, b| a.id.cmp(&b.id));
    tracing::info!("Discovered {} candidates under {:?}", candidates.len(), dir);
    Ok(candidates)
}

/// Cap the candidate pool per topic with a seeded shuffle.
///
/// Candidates without a topic share one bucket. The result is re-sorted by
/// id so downstream stages see a stable order regardless of bucket layout.
pub fn sample_pool(
    candidates: Vec<CardCandidate>,
    pool_per_topic: usize,
    seed: u64,
) -> Vec<CardCandidate> {
    if pool_per_topic == 0 {
        return candidates;
    }

    // BTreeMap keeps topic iteration order deterministic
    let mut by_topic: BTreeMap<String, Vec<CardCandidate>> = BTreeMap::new();
    for candidate in candidates {
        let key = candidate.topic.clone().unwrap_or_default();
        by_topic.entry(key).or_default().push(candidate);
    }

    let mut pool = Vec::new();
    for (topic, mut group) in by_topic {
        if group.len() > pool_per_topic {
            // Per-topic seed so adding one topic doesn't reshuffle the rest
            let mut hasher = blake3::Hasher::new();
            hasher.update(&seed.to_le_bytes());
            hasher.update(topic.as_bytes());
            let digest = hasher.finalize();
            let topic_seed =
                u64::from_le_bytes(digest.as_bytes()[..8].try_into().unwrap_or([0u8; 8]));

            let mut rng = rand::rngs::StdRng::seed_from_u64(topic_seed);
            group.shuffle(&mut rng);
            group.truncate(pool_per_topic);
            tracing::debug!(
                "Topic {:?}: sampled {} of candidates",
                topic,
                pool_per_topic
            );
        }
        pool.extend(group);
    }

    pool.sort_by(|a, b| a.id.cmp(&b.id));
    pool
}
