//! Hierarchical spherical k-means over card embeddings.

mod hierarchy;
mod spherical;
mod tree;

pub use hierarchy::{build_tree, ClusterStats};
pub use spherical::{spherical_kmeans, KMeansOutcome, TIE_TOLERANCE};
pub use tree::{ClusterNode, ClusterTree};

use tracing::warn;

use crate::config::ClusteringConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::math::{l2_norm, l2_normalize};
use crate::types::{ClusterRecord, EmbeddingRecord};

/// Flatten embedding records into a row-major matrix, validating that
/// dimensions agree. Rows that drifted off unit norm are re-normalized.
fn embedding_matrix(records: &[EmbeddingRecord]) -> PipelineResult<(Vec<f32>, usize)> {
    let dim = records
        .first()
        .map(|r| r.vector.len())
        .ok_or_else(|| PipelineError::Clustering("no embeddings to cluster".to_string()))?;
    if dim == 0 {
        return Err(PipelineError::Clustering(
            "embedding vectors are empty".to_string(),
        ));
    }

    let mut matrix = Vec::with_capacity(records.len() * dim);
    for record in records {
        if record.vector.len() != dim {
            return Err(PipelineError::Clustering(format!(
                "dimension mismatch for {}: {} != {}",
                record.card_id,
                record.vector.len(),
                dim
            )));
        }
        let norm = l2_norm(&record.vector);
        if norm == 0.0 {
            return Err(PipelineError::Clustering(format!(
                "zero vector for {}",
                record.card_id
            )));
        }
        if (norm - 1.0).abs() > 1e-3 {
            warn!(card_id = %record.card_id, norm, "re-normalizing off-sphere embedding");
        }
        matrix.extend(l2_normalize(&record.vector));
    }
    Ok((matrix, dim))
}

/// Cluster the given embeddings into a tree and serialize it to flat
/// artifact records.
pub fn cluster_embeddings(
    records: &[EmbeddingRecord],
    config: &ClusteringConfig,
) -> PipelineResult<(Vec<ClusterRecord>, ClusterStats)> {
    let (matrix, dim) = embedding_matrix(records)?;
    let (tree, stats) = build_tree(&matrix, dim, records.len(), config)?;
    let card_ids: Vec<String> = records.iter().map(|r| r.card_id.clone()).collect();
    Ok((tree.to_records(&card_ids), stats))
}
