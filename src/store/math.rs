//! Vector math for semantic retrieval.

use anyhow::bail;

/// Cosine similarity between two vectors.
///
/// Errors on empty or mismatched-length inputs — silently truncating to the
/// shorter vector would produce a plausible-looking but wrong score.
/// Zero-magnitude vectors yield 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> anyhow::Result<f32> {
    if a.is_empty() || b.is_empty() {
        bail!("cosine similarity on empty vector");
    }
    if a.len() != b.len() {
        bail!(
            "cosine similarity dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        );
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / denom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let v = vec![0.5, -0.25, 1.0];
        let score = cosine_similarity(&v, &v).unwrap();
        assert!((score - 1.0).abs() < 1e-6, "got {}", score);
    }

    #[test]
    fn opposite_vectors_score_minus_one() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-1.0, -2.0, -3.0];
        let score = cosine_similarity(&a, &b).unwrap();
        assert!((score + 1.0).abs() < 1e-6, "got {}", score);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let score = cosine_similarity(&a, &b).unwrap();
        assert!(score.abs() < 1e-6, "got {}", score);
    }

    #[test]
    fn score_stays_in_bounds() {
        let a = vec![0.3, -0.7, 0.2, 0.9];
        let b = vec![-0.1, 0.4, 0.8, -0.5];
        let score = cosine_similarity(&a, &b).unwrap();
        assert!((-1.0..=1.0).contains(&score), "got {}", score);
    }

    #[test]
    fn mismatched_lengths_error() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!(cosine_similarity(&a, &b).is_err());
    }

    #[test]
    fn empty_vectors_error() {
        assert!(cosine_similarity(&[], &[]).is_err());
    }

    #[test]
    fn zero_vector_scores_zero() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b).unwrap(), 0.0);
    }
}
