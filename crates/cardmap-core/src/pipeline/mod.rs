//! Pipeline orchestration: step artifacts, run state, and sequencing.

mod artifacts;
mod orchestrator;
mod run_state;

pub use artifacts::{
    Artifact, ArtifactHeader, ArtifactStore, ClusterArtifact, DatasetArtifact, EmbeddingArtifact,
    FilterArtifact, LabelArtifact, ARTIFACT_VERSION, CLUSTERS_FILE, DATASET_FILE, EMBEDDINGS_FILE,
    FILTERED_FILE, LABELS_FILE,
};
pub use orchestrator::Orchestrator;
pub use run_state::{RunState, Step, RUN_STATE_FILE};
