//! Pool manager: the symmetric similarity graph between posts.
//!
//! Every match is stored as two elements, one in each post's pool, whose
//! `sibling_id`s point at each other. Pairs are written in a single
//! transaction and removed in two (unlink, then delete), so a half-pair is
//! never persisted.

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{debug, info};

use super::filter::CandidateFilter;
use super::score::{best_per_post, filter_by_threshold, ScoredMatch};
use super::SimilarityError;
use crate::storage::models::{SimilarityData, SimilarityPool};
use crate::storage::Database;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairStats {
    pub created: usize,
    pub updated: usize,
}

#[derive(Debug, Clone)]
pub struct PopulateOutcome {
    pub pool: SimilarityPool,
    pub matches: Vec<ScoredMatch>,
    pub pairs: PairStats,
}

pub struct PoolManager {
    db: Database,
    filter: CandidateFilter,
    min_score: f64,
}

impl PoolManager {
    pub fn new(db: Database, filter: CandidateFilter, min_score: f64) -> Self {
        Self {
            db,
            filter,
            min_score,
        }
    }

    /// Best match per other post across all of the subject's hash rows.
    /// Returns the matches and the number of candidates before scoring.
    pub fn find_matches(
        &self,
        post_id: u64,
        rows: &[SimilarityData],
    ) -> Result<(Vec<ScoredMatch>, u64), SimilarityError> {
        let mut total_results = 0u64;
        let mut matches = Vec::new();
        for row in rows {
            let hash = row.image_hash()?;
            let query = self.filter.build(&hash, row.ratio, Some(post_id));
            let candidates = self.db.find_candidates(&query)?;
            total_results += candidates.len() as u64;
            matches.extend(filter_by_threshold(&candidates, &hash, self.min_score)?);
        }
        Ok((best_per_post(matches), total_results))
    }

    /// Match `post_id` against the store and pair it with every hit. The
    /// subject mark is written last, so an interrupted run is repeated by the
    /// next catch-up.
    pub fn populate_pools(
        &self,
        post_id: u64,
        rows: &[SimilarityData],
    ) -> Result<PopulateOutcome, SimilarityError> {
        let started = Instant::now();
        let (matches, total_results) = self.find_matches(post_id, rows)?;
        let calculation_time = started.elapsed().as_secs_f64();

        let sibling_ids: Vec<u64> = matches.iter().map(|m| m.post_id).collect();
        self.create_or_get_pool(post_id, &sibling_ids)?;
        let pairs = self.pair(post_id, &matches)?;
        let pool = self
            .db
            .record_pool_run(post_id, total_results, calculation_time)?;

        debug!(
            post_id,
            total_results,
            matches = matches.len(),
            created = pairs.created,
            "Populated similarity pool"
        );
        Ok(PopulateOutcome {
            pool,
            matches,
            pairs,
        })
    }

    /// Get or create the pool of `post_id`, creating pools for any sibling
    /// posts that lack one in the same transaction.
    pub fn create_or_get_pool(
        &self,
        post_id: u64,
        sibling_post_ids: &[u64],
    ) -> Result<SimilarityPool, SimilarityError> {
        let mut post_ids = Vec::with_capacity(sibling_post_ids.len() + 1);
        post_ids.push(post_id);
        post_ids.extend(sibling_post_ids.iter().copied().filter(|&id| id != post_id));

        let mut pools = self.db.get_or_create_pools(&post_ids)?;
        Ok(pools.swap_remove(0))
    }

    /// Link the subject with every matched post, both directions. Existing
    /// pairs get their score refreshed.
    pub fn pair(
        &self,
        subject_post_id: u64,
        results: &[ScoredMatch],
    ) -> Result<PairStats, SimilarityError> {
        let mut stats = PairStats::default();
        for result in results {
            let paired = self
                .db
                .pair_elements(subject_post_id, result.post_id, result.score)?;
            debug!(
                subject_post_id,
                other_post_id = result.post_id,
                score = result.score,
                element = paired.subject.id,
                sibling = paired.sibling.id,
                "Sibling pair"
            );
            if paired.created {
                stats.created += 1;
            } else {
                stats.updated += 1;
            }
        }
        Ok(stats)
    }

    /// Delete one element together with its sibling.
    pub fn delete(&self, element_id: u64) -> Result<usize, SimilarityError> {
        self.batch_delete(&[element_id])
    }

    /// Delete a set of elements and every sibling of the set. Links are
    /// cleared and committed before any row is removed.
    pub fn batch_delete(&self, element_ids: &[u64]) -> Result<usize, SimilarityError> {
        let mut doomed: BTreeSet<u64> = BTreeSet::new();
        for &id in element_ids {
            if let Some(element) = self.db.get_element(id)? {
                doomed.insert(element.id);
                if let Some(sibling_id) = element.sibling_id {
                    doomed.insert(sibling_id);
                }
            }
        }
        if doomed.is_empty() {
            return Ok(0);
        }

        let ids: Vec<u64> = doomed.into_iter().collect();
        self.db.unlink_elements(&ids)?;
        let removed = self.db.delete_elements(&ids)?;
        debug!(requested = element_ids.len(), removed, "Deleted pool elements");
        Ok(removed)
    }

    /// Remove every element of a post's pool (and their siblings).
    pub fn clear_pool(&self, post_id: u64) -> Result<usize, SimilarityError> {
        let Some(pool) = self.db.get_pool_by_post(post_id)? else {
            return Ok(0);
        };
        let ids: Vec<u64> = self
            .db
            .get_elements_for_pool(pool.id)?
            .iter()
            .map(|e| e.id)
            .collect();
        self.batch_delete(&ids)
    }

    /// Throw away a post's edges and match it again from its current rows.
    pub fn rebuild(
        &self,
        post_id: u64,
        rows: &[SimilarityData],
    ) -> Result<PopulateOutcome, SimilarityError> {
        let removed = self.clear_pool(post_id)?;
        if removed > 0 {
            info!(post_id, removed, "Deleted similarity pool elements");
        }
        self.populate_pools(post_id, rows)
    }

    /// Remove a post from the graph entirely: its edges, then its pool.
    pub fn remove_post(&self, post_id: u64) -> Result<usize, SimilarityError> {
        let removed = self.clear_pool(post_id)?;
        self.db.delete_pool_for_post(post_id)?;
        Ok(removed)
    }
}
