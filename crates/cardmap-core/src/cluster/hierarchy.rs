//! Hierarchical driver over the base k-means routine.
//!
//! Starts from a single root cluster and repeatedly splits the largest
//! leaf until the target leaf count is reached or nothing splittable
//! remains. Split order is deterministic (size, then lower node id), so
//! a fixed seed reproduces the same tree on the same inputs.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use super::spherical::spherical_kmeans;
use super::tree::ClusterTree;
use crate::config::ClusteringConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::math::{l2_normalize, unit_mean};

/// Counters surfaced in the run summary.
#[derive(Debug, Clone, Default)]
pub struct ClusterStats {
    pub leaves: usize,
    pub splits: usize,
    pub non_converged: u32,
    pub unsplittable: usize,
    pub reinitialized: u32,
}

/// Pick the next leaf to split: largest member count first, lower node
/// id on ties. Skips leaves already found unsplittable and leaves too
/// small to yield children of any useful size.
fn next_split_candidate(
    tree: &ClusterTree,
    unsplittable: &[bool],
    min_leaf_size: usize,
) -> Option<usize> {
    tree.leaves()
        .into_iter()
        .filter(|&id| !unsplittable[id])
        .filter(|&id| {
            let size = tree.node(id).members.len();
            size >= 2 && size >= 2 * min_leaf_size
        })
        .max_by_key(|&id| (tree.node(id).members.len(), std::cmp::Reverse(id)))
}

/// Build the cluster tree for `n` unit-norm rows of `matrix`.
pub fn build_tree(
    matrix: &[f32],
    dim: usize,
    n: usize,
    config: &ClusteringConfig,
) -> PipelineResult<(ClusterTree, ClusterStats)> {
    if n == 0 {
        return Err(PipelineError::Clustering(
            "no embeddings to cluster".to_string(),
        ));
    }

    let target = if config.target_leaf_count > n {
        warn!(
            target = config.target_leaf_count,
            available = n,
            "target leaf count exceeds embedding count, clamping"
        );
        n
    } else {
        config.target_leaf_count
    };

    let all_rows: Vec<usize> = (0..n).collect();
    let root_centroid = unit_mean(matrix, dim, &all_rows)
        .unwrap_or_else(|| l2_normalize(&matrix[..dim]));
    let mut tree = ClusterTree::new(all_rows, root_centroid);
    let mut stats = ClusterStats::default();
    let mut unsplittable = vec![false];
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut leaves = 1usize;
    while leaves < target {
        let Some(node_id) = next_split_candidate(&tree, &unsplittable, config.min_leaf_size)
        else {
            warn!(
                leaves,
                target, "no splittable leaf remains, stopping below target"
            );
            break;
        };

        let node_size = tree.node(node_id).members.len();
        // Each split replaces one leaf with `arity` leaves, so cap the
        // arity at what the remaining budget allows.
        let arity = config
            .branch_factor
            .min(target - leaves + 1)
            .min(node_size);

        let members = tree.node(node_id).members.clone();
        let outcome = spherical_kmeans(
            matrix,
            dim,
            &members,
            arity,
            config.max_iterations,
            &mut rng,
        );
        stats.reinitialized += outcome.reinitialized;

        if outcome.degenerate {
            debug!(node = node_id, size = node_size, "leaf is unsplittable");
            unsplittable[node_id] = true;
            stats.unsplittable += 1;
            continue;
        }
        if !outcome.converged {
            warn!(
                node = node_id,
                iterations = outcome.iterations,
                "split did not converge within the iteration cap"
            );
            stats.non_converged += 1;
        }

        for (j, centroid) in outcome.centroids.iter().enumerate() {
            let child_members: Vec<usize> = members
                .iter()
                .enumerate()
                .filter(|(pos, _)| outcome.assignments[*pos] == j)
                .map(|(_, &m)| m)
                .collect();
            let child = tree.add_child(node_id, child_members, centroid.clone());
            debug_assert_eq!(child, unsplittable.len());
            unsplittable.push(false);
        }

        stats.splits += 1;
        leaves += arity - 1;
    }

    stats.leaves = leaves;
    debug_assert!(tree.verify_partition(n).is_ok());
    info!(
        leaves = stats.leaves,
        splits = stats.splits,
        unsplittable = stats.unsplittable,
        non_converged = stats.non_converged,
        "cluster tree built"
    );
    Ok((tree, stats))
}
