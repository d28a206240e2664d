use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::hash::{HashError, ImageHash, TOTAL_BITS};
use crate::storage::models::SimilarityData;

/// A candidate post that passed the score threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMatch {
    pub post_id: u64,
    pub score: f64,
}

/// Percentage of matching bits between two hashes, rounded to 2 decimals.
pub fn score(a: &ImageHash, b: &ImageHash) -> f64 {
    score_binary(&a.to_binary(), &b.to_binary())
}

fn score_binary(a: &str, b: &str) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "hashes must have equal bit length");
    let mismatching = a.bytes().zip(b.bytes()).filter(|(x, y)| x != y).count();
    let miss_ratio = mismatching as f64 / TOTAL_BITS as f64;
    round2((1.0 - miss_ratio) * 100.0)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Score every candidate row against `hash` and keep those at or above
/// `min_score`, one entry per post (its best row), best-first.
pub fn filter_by_threshold(
    candidates: &[SimilarityData],
    hash: &ImageHash,
    min_score: f64,
) -> Result<Vec<ScoredMatch>, HashError> {
    let query = hash.to_binary();
    let mut matches = Vec::new();
    for row in candidates {
        let score = score_binary(&query, &row.image_hash()?.to_binary());
        if score >= min_score {
            matches.push(ScoredMatch {
                post_id: row.post_id,
                score,
            });
        }
    }
    Ok(best_per_post(matches))
}

/// Collapse matches to the highest score per post, sorted best-first
/// (ties broken by ascending post id).
pub fn best_per_post(matches: impl IntoIterator<Item = ScoredMatch>) -> Vec<ScoredMatch> {
    let mut best: HashMap<u64, f64> = HashMap::new();
    for m in matches {
        best.entry(m.post_id)
            .and_modify(|s| *s = s.max(m.score))
            .or_insert(m.score);
    }
    let mut results: Vec<ScoredMatch> = best
        .into_iter()
        .map(|(post_id, score)| ScoredMatch { post_id, score })
        .collect();
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.post_id.cmp(&b.post_id))
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::hash::HEX_LEN;

    fn hash(hex: &str) -> ImageHash {
        ImageHash::from_hex(hex).unwrap()
    }

    fn zeros() -> ImageHash {
        hash(&"0".repeat(HEX_LEN))
    }

    /// `bits` leading bits flipped on.
    fn with_leading_bits(bits: usize) -> ImageHash {
        let mut flags = vec![false; TOTAL_BITS];
        flags[..bits].iter_mut().for_each(|b| *b = true);
        ImageHash::from_bits(&flags)
    }

    fn row(id: u64, post_id: u64, h: &ImageHash) -> SimilarityData {
        SimilarityData {
            id,
            post_id,
            ratio: 1.0,
            chunks: h.to_chunks(),
        }
    }

    #[test]
    fn test_identical_scores_perfect() {
        let h = hash(&"3c".repeat(32));
        assert_eq!(score(&h, &h), 100.0);
    }

    #[test]
    fn test_five_bit_difference() {
        let b = with_leading_bits(5);
        assert_eq!(b.chunk(0), "f8");
        assert_eq!(score(&zeros(), &b), 98.05);
    }

    #[test]
    fn test_score_is_symmetric() {
        let a = hash(&"0123456789abcdef".repeat(4));
        let b = hash(&"fedcba9876543210".repeat(4));
        assert_eq!(score(&a, &b), score(&b, &a));
    }

    #[test]
    fn test_filter_keeps_best_row_per_post() {
        let query = zeros();
        let close = with_leading_bits(2);
        let closer = with_leading_bits(1);
        let far = with_leading_bits(64);
        let candidates = vec![
            row(1, 10, &close),
            row(2, 10, &closer),
            row(3, 20, &far),
            row(4, 30, &query),
        ];

        let results = filter_by_threshold(&candidates, &query, 90.0).unwrap();
        assert_eq!(
            results,
            vec![
                ScoredMatch {
                    post_id: 30,
                    score: 100.0
                },
                ScoredMatch {
                    post_id: 10,
                    score: 99.61
                },
            ]
        );
    }

    #[test]
    fn test_corrupt_row_is_an_error() {
        let corrupt = SimilarityData {
            id: 9,
            post_id: 9,
            ratio: 1.0,
            chunks: vec!["zz".to_string(); 32],
        };
        assert!(matches!(
            filter_by_threshold(&[corrupt], &zeros(), 90.0),
            Err(HashError::InvalidHex('z'))
        ));
    }

    #[test]
    fn test_filter_never_accepts_below_threshold() {
        let query = zeros();
        let candidates: Vec<SimilarityData> = (0..40)
            .map(|bits| row(bits as u64, bits as u64, &with_leading_bits(bits)))
            .collect();
        for m in filter_by_threshold(&candidates, &query, 90.0).unwrap() {
            assert!(m.score >= 90.0);
        }
    }
}
