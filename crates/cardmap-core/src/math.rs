//! Shared vector math for unit-norm embeddings.
//!
//! Every vector that enters the clustering stage is unit-norm, so cosine
//! similarity is realized as a plain dot product throughout.

/// L2-normalize a vector in place so its magnitude is 1.
///
/// A zero vector is left unchanged (there is no direction to preserve).
pub fn l2_normalize_in_place(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// L2-normalize a slice, returning a new vector with unit magnitude.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let mut result = v.to_vec();
    l2_normalize_in_place(&mut result);
    result
}

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Dot product of two equal-length vectors.
///
/// On unit-norm inputs this is the cosine similarity.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Unit-normalized mean of a set of rows from a flat row-major matrix.
///
/// Returns `None` when `rows` is empty or the mean collapses to the zero
/// vector (antipodal members cancelling out).
pub fn unit_mean(matrix: &[f32], dim: usize, rows: &[usize]) -> Option<Vec<f32>> {
    if rows.is_empty() {
        return None;
    }
    let mut mean = vec![0.0f32; dim];
    for &row in rows {
        let offset = row * dim;
        for j in 0..dim {
            mean[j] += matrix[offset + j];
        }
    }
    let inv = 1.0 / rows.len() as f32;
    for x in mean.iter_mut() {
        *x *= inv;
    }
    if l2_norm(&mean) <= f32::EPSILON {
        return None;
    }
    l2_normalize_in_place(&mut mean);
    Some(mean)
}
