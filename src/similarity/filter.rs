//! Candidate prefilter: aspect-ratio window AND chunk banding.
//!
//! A band is a small set of chunk positions; a stored row survives a band when
//! every chunk in it equals the query's chunk exactly. The filter is recall
//! biased and probabilistic: it only narrows candidates, exact scoring decides.

use serde::{Deserialize, Serialize};

use super::hash::{ImageHash, NUM_CHUNKS};
use crate::storage::models::SimilarityData;

/// Band composition, chosen by the parity of each start offset.
#[derive(Debug, Clone, PartialEq)]
pub struct BandingConfig {
    /// Offsets (relative to the start chunk) used when the start is even.
    pub even_offsets: Vec<usize>,
    /// Offsets (relative to the start chunk) used when the start is odd.
    pub odd_offsets: Vec<usize>,
}

impl Default for BandingConfig {
    fn default() -> Self {
        Self {
            even_offsets: vec![0, 3, 4],
            odd_offsets: vec![0, 1, 4],
        }
    }
}

impl BandingConfig {
    /// One band per start chunk, wrapping around the end of the hash.
    pub fn bands(&self) -> Vec<Vec<usize>> {
        (0..NUM_CHUNKS)
            .map(|start| {
                let offsets = if start % 2 == 0 {
                    &self.even_offsets
                } else {
                    &self.odd_offsets
                };
                let mut band: Vec<usize> = offsets
                    .iter()
                    .map(|offset| (start + offset) % NUM_CHUNKS)
                    .collect();
                band.sort_unstable();
                band.dedup();
                band
            })
            .collect()
    }
}

/// Inclusive ratio bounds `[ratio * (1 - tolerance), ratio * (1 + tolerance)]`,
/// rounded to 4 decimals.
pub fn ratio_bounds(ratio: f64, tolerance: f64) -> (f64, f64) {
    let low = round4(ratio * (1.0 - tolerance));
    let high = round4(ratio * (1.0 + tolerance));
    (low, high)
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// A chunk position and the exact value it must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkTerm {
    pub index: usize,
    pub value: String,
}

/// Storage-level predicate: ratio window AND (any band fully equal),
/// excluding one post.
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    pub ratio_low: f64,
    pub ratio_high: f64,
    pub bands: Vec<Vec<ChunkTerm>>,
    pub exclude_post_id: Option<u64>,
}

impl CandidateQuery {
    /// Pure evaluation of the predicate against one row.
    pub fn matches(&self, row: &SimilarityData) -> bool {
        if self.exclude_post_id == Some(row.post_id) {
            return false;
        }
        if row.ratio < self.ratio_low || row.ratio > self.ratio_high {
            return false;
        }
        self.bands.iter().any(|band| {
            band.iter()
                .all(|term| row.chunks.get(term.index) == Some(&term.value))
        })
    }
}

#[derive(Debug, Clone)]
pub struct CandidateFilter {
    banding: BandingConfig,
    ratio_tolerance: f64,
}

impl CandidateFilter {
    pub fn new(banding: BandingConfig, ratio_tolerance: f64) -> Self {
        Self {
            banding,
            ratio_tolerance,
        }
    }

    pub fn build(&self, hash: &ImageHash, ratio: f64, exclude_post_id: Option<u64>) -> CandidateQuery {
        let (ratio_low, ratio_high) = ratio_bounds(ratio, self.ratio_tolerance);
        let bands = self
            .banding
            .bands()
            .into_iter()
            .map(|band| {
                band.into_iter()
                    .map(|index| ChunkTerm {
                        index,
                        value: hash.chunk(index).to_string(),
                    })
                    .collect()
            })
            .collect();
        CandidateQuery {
            ratio_low,
            ratio_high,
            bands,
            exclude_post_id,
        }
    }
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self::new(BandingConfig::default(), 0.01)
    }
}
