//! Run state persisted alongside the artifacts.
//!
//! Tracks which steps have completed and whether the filter output has
//! been approved, so an interrupted run (or one paused at the approval
//! checkpoint) picks up where it left off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::artifacts;
use crate::error::{PipelineError, PipelineResult};

pub const RUN_STATE_FILE: &str = "run.json";

/// Pipeline steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Filter,
    Embed,
    Cluster,
    Tag,
    Assemble,
}

impl Step {
    pub fn all() -> [Step; 5] {
        [
            Step::Filter,
            Step::Embed,
            Step::Cluster,
            Step::Tag,
            Step::Assemble,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Step::Filter => "filter",
            Step::Embed => "embed",
            Step::Cluster => "cluster",
            Step::Tag => "tag",
            Step::Assemble => "assemble",
        }
    }

    /// Artifact file this step produces.
    pub fn artifact_file(&self) -> &'static str {
        match self {
            Step::Filter => artifacts::FILTERED_FILE,
            Step::Embed => artifacts::EMBEDDINGS_FILE,
            Step::Cluster => artifacts::CLUSTERS_FILE,
            Step::Tag => artifacts::LABELS_FILE,
            Step::Assemble => artifacts::DATASET_FILE,
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    /// Steps whose artifacts are complete, in execution order
    pub completed: Vec<Step>,

    /// Whether the filter output passed the approval checkpoint
    pub filter_approved: bool,

    /// Fingerprint of the config the run started under
    pub config_fingerprint: String,

    pub updated_at: Option<DateTime<Utc>>,
}

impl RunState {
    fn path(dir: &Path) -> PathBuf {
        dir.join(RUN_STATE_FILE)
    }

    /// Load the run state, or a fresh one when none exists.
    pub fn load(dir: &Path) -> PipelineResult<Self> {
        let path = Self::path(dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(&path).map_err(|e| PipelineError::Artifact {
            path: path.clone(),
            message: format!("read failed: {e}"),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| PipelineError::Artifact {
            path,
            message: format!("parse failed: {e}"),
        })
    }

    pub fn save(&mut self, dir: &Path) -> PipelineResult<()> {
        self.updated_at = Some(Utc::now());
        let path = Self::path(dir);
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| PipelineError::Artifact {
            path: path.clone(),
            message: format!("serialization failed: {e}"),
        })?;
        std::fs::write(&path, bytes).map_err(|e| PipelineError::Artifact {
            path,
            message: format!("write failed: {e}"),
        })
    }

    pub fn is_complete(&self, step: Step) -> bool {
        self.completed.contains(&step)
    }

    pub fn mark_complete(&mut self, step: Step) {
        if !self.is_complete(step) {
            self.completed.push(step);
        }
    }

    /// Forget all progress, keeping nothing from a previous run.
    pub fn reset(&mut self) {
        self.completed.clear();
        self.filter_approved = false;
    }
}
