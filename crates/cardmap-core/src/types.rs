//! Core data types for the cardmap taxonomy pipeline.
//!
//! These types flow between pipeline stages through persisted JSON
//! artifacts, so their serde representations are part of the on-disk
//! contract. Artifact records use camelCase field names.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One pictogram card candidate: an image plus its keyword label.
///
/// Created during intake; the filter stage decides whether it enters the
/// pipeline. Immutable once admitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CardCandidate {
    /// Stable identifier, unique within one run
    pub id: String,

    /// Keyword label (e.g., "apple", "to drink")
    pub keyword: String,

    /// Path to the pictogram image
    pub image: PathBuf,

    /// Optional topic grouping from the source catalog
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// Why a candidate was rejected by the filter stage.
///
/// The taxonomy is fixed; new rules must add a variant here rather than
/// smuggle free-form strings into the artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Keyword matched a disallowed term (profanity, slurs)
    DisallowedTerm { term: String },

    /// Keyword matched a domain-exclusion list (medical/clinical/technical)
    DomainExclusion { term: String },

    /// Image file does not exist
    MissingImage,

    /// Image bytes could not be decoded
    UnreadableImage { message: String },

    /// Keyword is empty or whitespace
    EmptyKeyword,
}

/// A rejected candidate together with its verdict, kept in the filter
/// artifact so the approval checkpoint can show what was dropped and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedCard {
    pub card: CardCandidate,
    #[serde(flatten)]
    pub reason: RejectReason,
}

/// One persisted embedding, keyed by card id.
///
/// `vector` is unit L2 norm — the clustering stage relies on this to treat
/// dot products as cosine similarities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingRecord {
    pub card_id: String,

    pub vector: Vec<f32>,

    /// Keyword as it was sent to the text encoder (lowercased, trimmed)
    pub norm_keyword: String,

    /// Image path the vector was computed from
    pub image_ref: PathBuf,
}

/// One node of the serialized cluster tree.
///
/// The tree is stored flat: records reference each other by id, the root
/// has `parent_id: null`. Leaves carry the actual card members.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRecord {
    pub cluster_id: usize,

    pub parent_id: Option<usize>,

    pub depth: usize,

    /// Unit-norm centroid of the member vectors
    pub centroid: Vec<f32>,

    /// Card ids assigned to this node (for internal nodes, the union of
    /// all descendant leaves)
    pub member_card_ids: Vec<String>,
}

/// Where a cluster's tag came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    /// Vision model produced the tag
    Vision,

    /// Labeling disabled — deterministic keyword-derived tag
    Placeholder,

    /// Vision labeling failed after retries — keyword-derived tag recorded
    /// alongside the failure
    Fallback,
}

/// The tag assigned to one leaf cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLabel {
    pub cluster_id: usize,

    pub tag: String,

    pub source: LabelSource,

    /// Last error message when `source` is `Fallback`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One row of the final dataset: a card joined with its leaf cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetEntry {
    pub card_id: String,

    pub keyword: String,

    pub image_ref: PathBuf,

    pub cluster_id: usize,

    pub tag: String,
}

/// Summary counters reported at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunStats {
    /// Candidates admitted by the filter
    pub admitted: usize,

    /// Candidates rejected by the filter
    pub rejected: usize,

    /// Cards dropped during embedding (decode/encoder failures)
    pub dropped: usize,

    /// Leaf clusters in the final tree
    pub leaves: usize,

    /// Leaves that received a vision tag (vs placeholder/fallback)
    pub vision_tagged: usize,
}
