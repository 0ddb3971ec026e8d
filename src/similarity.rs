//! Vector arithmetic over node embeddings

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SimilarityError {
    #[error("embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Cosine similarity between two vectors of equal length.
///
/// Returns 0 when either vector has zero magnitude. The result is clamped to
/// [-1, 1] so accumulated rounding never leaves the valid range.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Elementwise weighted mean `(a * wa + b * wb) / (wa + wb)`.
pub fn weighted_average(
    a: &[f32],
    weight_a: f32,
    b: &[f32],
    weight_b: f32,
) -> Result<Vec<f32>, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let total = weight_a + weight_b;
    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x * weight_a + y * weight_b) / total)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vector(rng: &mut StdRng, dims: usize) -> Vec<f32> {
        (0..dims).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    #[test]
    fn cosine_similarity_correct() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-6);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).unwrap().abs() < 1e-6);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_zero_vector() {
        let a = vec![1.0, 0.0, 0.0];
        let zero = vec![0.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &zero).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero).unwrap(), 0.0);
    }

    #[test]
    fn cosine_similarity_rejects_mismatched_lengths() {
        let err = cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(err, SimilarityError::DimensionMismatch { left: 2, right: 3 });
    }

    #[test]
    fn cosine_similarity_stays_in_range_for_random_vectors() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let a = random_vector(&mut rng, 64);
            let b = random_vector(&mut rng, 64);
            let s = cosine_similarity(&a, &b).unwrap();
            assert!((-1.0..=1.0).contains(&s));
            assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn weighted_average_respects_weights() {
        let avg = weighted_average(&[1.0, 0.0], 3.0, &[0.0, 1.0], 1.0).unwrap();
        assert_eq!(avg, vec![0.75, 0.25]);
    }

    #[test]
    fn sequential_unit_merges_equal_the_plain_mean() {
        let mut rng = StdRng::seed_from_u64(42);
        let originals: Vec<Vec<f32>> = (0..6).map(|_| random_vector(&mut rng, 16)).collect();

        let mut acc = originals[0].clone();
        for (score, next) in originals.iter().enumerate().skip(1) {
            acc = weighted_average(&acc, score as f32, next, 1.0).unwrap();
        }

        for (i, value) in acc.iter().enumerate() {
            let mean: f32 = originals.iter().map(|v| v[i]).sum::<f32>() / originals.len() as f32;
            assert!((value - mean).abs() < 1e-5);
        }
    }
}
