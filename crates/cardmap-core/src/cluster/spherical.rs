//! Base spherical k-means over unit-norm vectors.
//!
//! Similarity is the dot product, which equals cosine similarity because
//! every vector is unit-norm. Centroids are the arithmetic mean of the
//! assigned vectors re-normalized back onto the sphere. Given the same
//! inputs and seed the routine is fully deterministic.

use rand::rngs::StdRng;
use rand::Rng;
use tracing::debug;

use crate::math::{dot, l2_normalize, unit_mean};

/// Similarity differences below this are treated as ties; ties resolve to
/// the lower centroid index.
pub const TIE_TOLERANCE: f32 = 1e-6;

/// Result of one k-means run.
#[derive(Debug, Clone)]
pub struct KMeansOutcome {
    /// Chosen centroid index per position in the input member slice
    pub assignments: Vec<usize>,

    /// Final unit-norm centroids, one per cluster
    pub centroids: Vec<Vec<f32>>,

    /// Iterations actually executed
    pub iterations: u32,

    /// Whether assignments stabilized before the iteration cap
    pub converged: bool,

    /// How many empty clusters were re-seeded during the run
    pub reinitialized: u32,

    /// Set when the inputs cannot support `k` distinct clusters, for
    /// example when all member vectors are identical. Assignments may
    /// then leave some clusters empty.
    pub degenerate: bool,
}

fn row(matrix: &[f32], dim: usize, index: usize) -> &[f32] {
    &matrix[index * dim..(index + 1) * dim]
}

/// Assign each member to its most similar centroid.
///
/// Centroids are scanned in ascending index order and a later centroid
/// only wins if it beats the incumbent by more than [`TIE_TOLERANCE`],
/// so ties always resolve to the lower index.
pub(crate) fn assign(
    matrix: &[f32],
    dim: usize,
    members: &[usize],
    centroids: &[Vec<f32>],
) -> Vec<usize> {
    members
        .iter()
        .map(|&m| {
            let v = row(matrix, dim, m);
            let mut best = 0usize;
            let mut best_sim = dot(v, &centroids[0]);
            for (j, centroid) in centroids.iter().enumerate().skip(1) {
                let sim = dot(v, centroid);
                if sim > best_sim + TIE_TOLERANCE {
                    best = j;
                    best_sim = sim;
                }
            }
            best
        })
        .collect()
}

/// Re-seed an empty cluster from the member of the largest cluster that
/// is least similar to its own centroid. Returns the donated member's
/// position and its vector as the new centroid, or `None` when no donor
/// exists or the donor pool is effectively a single point, in which case
/// the run is degenerate.
fn reseed_empty(
    matrix: &[f32],
    dim: usize,
    members: &[usize],
    assignments: &[usize],
    centroids: &[Vec<f32>],
    k: usize,
) -> Option<(usize, Vec<f32>)> {
    let mut counts = vec![0usize; k];
    for &a in assignments {
        counts[a] += 1;
    }
    let donor = (0..k).max_by_key(|&j| (counts[j], std::cmp::Reverse(j)))?;
    if counts[donor] < 2 {
        return None;
    }

    let donor_centroid = &centroids[donor];
    let mut furthest: Option<(usize, f32)> = None;
    for (pos, &m) in members.iter().enumerate() {
        if assignments[pos] != donor {
            continue;
        }
        let sim = dot(row(matrix, dim, m), donor_centroid);
        match furthest {
            Some((_, best_sim)) if sim >= best_sim - TIE_TOLERANCE => {}
            _ => furthest = Some((pos, sim)),
        }
    }

    let (pos, sim) = furthest?;
    // Every donor member sits on top of the centroid, so splitting off a
    // new cluster from it cannot separate anything.
    if sim >= 1.0 - TIE_TOLERANCE {
        return None;
    }
    Some((pos, l2_normalize(row(matrix, dim, members[pos]))))
}

/// Lloyd iterations from the given initial centroids.
pub(crate) fn lloyd(
    matrix: &[f32],
    dim: usize,
    members: &[usize],
    mut centroids: Vec<Vec<f32>>,
    max_iterations: u32,
) -> KMeansOutcome {
    let k = centroids.len();
    let mut assignments = assign(matrix, dim, members, &centroids);
    let mut iterations = 0u32;
    let mut converged = false;
    let mut reinitialized = 0u32;

    for iter in 1..=max_iterations {
        iterations = iter;
        let mut reseeded = false;

        for (j, centroid) in centroids.iter_mut().enumerate() {
            let rows: Vec<usize> = members
                .iter()
                .enumerate()
                .filter(|(pos, _)| assignments[*pos] == j)
                .map(|(_, &m)| m)
                .collect();
            if let Some(updated) = unit_mean(matrix, dim, &rows) {
                *centroid = updated;
            } else {
                reseeded = true;
            }
        }

        // Reseed after the surviving centroids have been updated so the
        // donor choice reflects the current partition. The donated
        // member moves to the re-seeded cluster right away, so when
        // several clusters empty out in the same iteration each one
        // draws a different donor member.
        if reseeded {
            for j in 0..k {
                let empty = !assignments.contains(&j);
                if !empty {
                    continue;
                }
                match reseed_empty(matrix, dim, members, &assignments, &centroids, k) {
                    Some((pos, seed)) => {
                        centroids[j] = seed;
                        assignments[pos] = j;
                        reinitialized += 1;
                    }
                    None => {
                        debug!(cluster = j, "cannot reseed empty cluster, inputs degenerate");
                        return KMeansOutcome {
                            assignments,
                            centroids,
                            iterations,
                            converged: false,
                            reinitialized,
                            degenerate: true,
                        };
                    }
                }
            }
        }

        let next = assign(matrix, dim, members, &centroids);
        if next == assignments && !reseeded {
            converged = true;
            break;
        }
        assignments = next;
    }

    let degenerate = (0..k).any(|j| !assignments.contains(&j));
    KMeansOutcome {
        assignments,
        centroids,
        iterations,
        converged,
        reinitialized,
        degenerate,
    }
}

/// Furthest-first seeding: the first seed is drawn with the RNG, each
/// subsequent seed is the member least similar to any seed chosen so
/// far. Ties resolve to the lower member position.
fn seed_centroids(
    matrix: &[f32],
    dim: usize,
    members: &[usize],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let first = rng.gen_range(0..members.len());
    let mut centroids = vec![l2_normalize(row(matrix, dim, members[first]))];

    // Highest similarity to any chosen seed, per member position
    let mut best_sims: Vec<f32> = members
        .iter()
        .map(|&m| dot(row(matrix, dim, m), &centroids[0]))
        .collect();

    while centroids.len() < k {
        let mut next = 0usize;
        let mut next_sim = f32::INFINITY;
        for (pos, &sim) in best_sims.iter().enumerate() {
            if sim < next_sim - TIE_TOLERANCE {
                next = pos;
                next_sim = sim;
            }
        }
        let seed = l2_normalize(row(matrix, dim, members[next]));
        for (pos, &m) in members.iter().enumerate() {
            let sim = dot(row(matrix, dim, m), &seed);
            if sim > best_sims[pos] {
                best_sims[pos] = sim;
            }
        }
        centroids.push(seed);
    }
    centroids
}

/// Run spherical k-means over the given member rows.
///
/// Callers must pass `2 <= k <= members.len()`.
pub fn spherical_kmeans(
    matrix: &[f32],
    dim: usize,
    members: &[usize],
    k: usize,
    max_iterations: u32,
    rng: &mut StdRng,
) -> KMeansOutcome {
    debug_assert!(k >= 2 && k <= members.len());

    let centroids = seed_centroids(matrix, dim, members, k, rng);
    lloyd(matrix, dim, members, centroids, max_iterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    /// Build a flat matrix of unit vectors near the four axes of R^4.
    fn orthogonal_groups(per_group: usize) -> (Vec<f32>, usize) {
        let dim = 4;
        let mut matrix = Vec::new();
        for axis in 0..4 {
            for i in 0..per_group {
                let mut v = vec![0.0f32; dim];
                v[axis] = 1.0;
                // Small deterministic perturbation on a neighboring axis
                v[(axis + 1) % dim] = 0.01 + 0.001 * i as f32;
                matrix.extend(l2_normalize(&v));
            }
        }
        (matrix, dim)
    }

    #[test]
    fn test_recovers_orthogonal_groups() {
        let per_group = 25;
        let (matrix, dim) = orthogonal_groups(per_group);
        let members: Vec<usize> = (0..4 * per_group).collect();
        let mut rng = StdRng::seed_from_u64(42);

        let outcome = spherical_kmeans(&matrix, dim, &members, 4, 50, &mut rng);

        assert!(outcome.converged);
        assert!(!outcome.degenerate);
        for group in 0..4 {
            let first = outcome.assignments[group * per_group];
            for i in 0..per_group {
                assert_eq!(
                    outcome.assignments[group * per_group + i],
                    first,
                    "group {group} split across clusters"
                );
            }
        }
        let mut distinct: Vec<usize> = outcome.assignments.clone();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn test_assignment_ties_go_to_lower_index() {
        let matrix = vec![1.0, 0.0, 0.0, 1.0];
        let centroids = vec![vec![1.0, 0.0], vec![1.0, 0.0]];
        let assignments = assign(&matrix, 2, &[0, 1], &centroids);
        // Both centroids are identical, so every point ties and resolves
        // to centroid 0.
        assert_eq!(assignments, vec![0, 0]);
    }

    #[test]
    fn test_identical_initial_centroids_trigger_reseed() {
        // Two e1 points and two e2 points, both initial centroids at e1.
        let matrix = vec![1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0];
        let centroids = vec![vec![1.0, 0.0], vec![1.0, 0.0]];

        let outcome = lloyd(&matrix, 2, &[0, 1, 2, 3], centroids, 50);

        assert!(outcome.reinitialized >= 1);
        assert!(!outcome.degenerate);
        assert_eq!(outcome.assignments[0], outcome.assignments[1]);
        assert_eq!(outcome.assignments[2], outcome.assignments[3]);
        assert_ne!(outcome.assignments[0], outcome.assignments[2]);
    }

    #[test]
    fn test_simultaneous_empty_clusters_get_distinct_seeds() {
        // Four orthogonal points, every initial centroid at e1: three
        // clusters empty out in the same iteration, and each must be
        // re-seeded from a different member to recover the 4-way split.
        let matrix = vec![
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        let centroids = vec![vec![1.0, 0.0, 0.0, 0.0]; 4];

        let outcome = lloyd(&matrix, 4, &[0, 1, 2, 3], centroids, 50);

        assert!(outcome.converged);
        assert!(!outcome.degenerate);
        assert_eq!(outcome.reinitialized, 3);
        let mut distinct = outcome.assignments.clone();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn test_identical_inputs_are_degenerate() {
        let matrix = vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let mut rng = StdRng::seed_from_u64(7);
        let outcome = spherical_kmeans(&matrix, 2, &[0, 1, 2], 2, 50, &mut rng);
        assert!(outcome.degenerate);
    }

    #[test]
    fn test_iteration_cap_reports_non_convergence() {
        let matrix = vec![1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0];
        let centroids = vec![vec![1.0, 0.0], vec![1.0, 0.0]];

        let outcome = lloyd(&matrix, 2, &[0, 1, 2, 3], centroids, 1);

        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn test_same_seed_same_outcome() {
        let (matrix, dim) = orthogonal_groups(10);
        let members: Vec<usize> = (0..40).collect();

        let mut rng_a = StdRng::seed_from_u64(99);
        let a = spherical_kmeans(&matrix, dim, &members, 4, 50, &mut rng_a);
        let mut rng_b = StdRng::seed_from_u64(99);
        let b = spherical_kmeans(&matrix, dim, &members, 4, 50, &mut rng_b);

        assert_eq!(a.assignments, b.assignments);
        assert_eq!(a.centroids, b.centroids);
        assert_eq!(a.iterations, b.iterations);
    }

    #[test]
    fn test_centroids_stay_unit_norm() {
        let (matrix, dim) = orthogonal_groups(5);
        let members: Vec<usize> = (0..20).collect();
        let mut rng = StdRng::seed_from_u64(3);

        let outcome = spherical_kmeans(&matrix, dim, &members, 3, 50, &mut rng);
        for centroid in &outcome.centroids {
            let norm: f32 = centroid.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }
    }
}
