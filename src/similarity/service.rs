//! Batch coordinator: checkpointed catch-up passes, forced regeneration and
//! the ad-hoc query path.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::filter::{round4, CandidateFilter};
use super::hashes::HashStore;
use super::pools::PoolManager;
use super::score::filter_by_threshold;
use super::{wavelet, SimilarityError};
use crate::config::SimilarityConfig;
use crate::media_cache::MediaCache;
use crate::object_store::ObjectStore;
use crate::storage::models::PostRecord;
use crate::storage::Database;

/// Counters from one full pass (hash catch-up then pool catch-up).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    pub posts_hashed: usize,
    pub rendition_errors: usize,
    pub pools_populated: usize,
    pub pairs_created: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerateStats {
    pub regenerated: Vec<u64>,
    pub missing: Vec<u64>,
    pub pairs_created: usize,
}

/// One matched post of an ad-hoc query.
#[derive(Debug, Clone, Serialize)]
pub struct PostMatch {
    pub post_id: u64,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<PostRecord>,
}

/// Result for one queried URL.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub image_url: String,
    pub post_results: Vec<PostMatch>,
    /// Path the cached bytes are served from
    pub cache: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct SimilarityService {
    db: Database,
    hashes: HashStore,
    pools: PoolManager,
    cache: Arc<MediaCache>,
    filter: CandidateFilter,
    page_size: usize,
    /// Guards a full pass. Triggers that find it held are dropped.
    pass_lock: Arc<Mutex<()>>,
    /// Guards forced regeneration.
    regenerate_lock: Arc<Mutex<()>>,
}

impl SimilarityService {
    pub fn new(
        db: Database,
        object_store: Arc<dyn ObjectStore>,
        cache: Arc<MediaCache>,
        config: &SimilarityConfig,
    ) -> Self {
        let filter = CandidateFilter::new(config.banding.clone(), config.ratio_tolerance);
        Self {
            hashes: HashStore::new(db.clone(), object_store, config.dedup_threshold),
            pools: PoolManager::new(db.clone(), filter.clone(), config.min_score),
            db,
            cache,
            filter,
            page_size: config.page_size,
            pass_lock: Arc::new(Mutex::new(())),
            regenerate_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn hashes(&self) -> &HashStore {
        &self.hashes
    }

    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    /// Whether a full pass currently holds the lock
    pub fn is_running(&self) -> bool {
        self.pass_lock.try_lock().is_err()
    }

    /// Start a pass in the background unless one is already running.
    /// Returns false (and queues nothing) when the lock is held.
    pub fn run_if_free(self: &Arc<Self>) -> bool {
        let Ok(guard) = Arc::clone(&self.pass_lock).try_lock_owned() else {
            debug!("Similarity pass already running, trigger dropped");
            return false;
        };

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = service.process_similarity().await {
                error!(error = %e, "Similarity pass failed");
            }
        });
        true
    }

    /// Wait for the lock, then run a full pass to convergence.
    pub async fn run_blocking(&self) -> Result<PassStats, SimilarityError> {
        let _guard = self.pass_lock.lock().await;
        self.process_similarity().await
    }

    /// Hash catch-up followed by pool catch-up. Caller holds `pass_lock`.
    async fn process_similarity(&self) -> Result<PassStats, SimilarityError> {
        let mut stats = PassStats::default();
        self.hash_catch_up(&mut stats).await?;
        self.pool_catch_up(&mut stats)?;

        if stats != PassStats::default() {
            info!(
                posts_hashed = stats.posts_hashed,
                rendition_errors = stats.rendition_errors,
                pools_populated = stats.pools_populated,
                pairs_created = stats.pairs_created,
                "Similarity pass complete"
            );
        }
        Ok(stats)
    }

    /// Hash every post newer than the newest post with similarity data,
    /// a page at a time, until no page remains.
    async fn hash_catch_up(&self, stats: &mut PassStats) -> Result<(), SimilarityError> {
        let mut cursor = self.db.max_similarity_data_post_id()?;
        loop {
            let page = self.db.posts_after(cursor, self.page_size)?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.id;

            info!(count = page.len(), through = cursor, "Generating post similarity data");
            for post in &page {
                let ensured = self.hashes.ensure_hashes(post).await?;
                if !ensured.existing {
                    stats.posts_hashed += 1;
                }
                stats.rendition_errors += ensured.errors.len();
            }
        }
        Ok(())
    }

    /// Populate pools for every post with similarity data newer than the
    /// newest batch subject, a page at a time, until no page remains.
    fn pool_catch_up(&self, stats: &mut PassStats) -> Result<(), SimilarityError> {
        let mut cursor = self.db.max_subject_pool_post_id()?;
        loop {
            let post_ids = self
                .db
                .similarity_data_post_ids_after(cursor, self.page_size)?;
            let Some(&last) = post_ids.last() else {
                break;
            };
            cursor = last;

            info!(count = post_ids.len(), "Generating similarity pools");
            for post_id in post_ids {
                let rows = self.db.get_similarity_data_for_post(post_id)?;
                let outcome = self.pools.populate_pools(post_id, &rows)?;
                stats.pools_populated += 1;
                stats.pairs_created += outcome.pairs.created;
            }
        }
        Ok(())
    }

    /// Recompute hashes and rebuild the match graph of the given posts.
    /// Fails with `Busy` if another regeneration is in progress; otherwise
    /// waits for any running pass to finish, then catches up the backlog
    /// before touching the given posts.
    pub async fn generate_posts_similarity(
        &self,
        post_ids: &[u64],
    ) -> Result<GenerateStats, SimilarityError> {
        let Ok(_regenerate) = self.regenerate_lock.try_lock() else {
            return Err(SimilarityError::Busy);
        };
        let _pass = self.pass_lock.lock().await;

        // Regenerated rows and subject marks must not sit above an
        // unprocessed backlog.
        self.process_similarity().await?;

        let posts = self.db.get_posts(post_ids)?;
        let mut stats = GenerateStats {
            missing: post_ids
                .iter()
                .copied()
                .filter(|id| !posts.iter().any(|p| p.id == *id))
                .collect(),
            ..Default::default()
        };
        for &post_id in &stats.missing {
            warn!(post_id, "Cannot regenerate similarity for missing post");
        }

        for post in posts {
            info!(post_id = post.id, "Regenerating post similarity");
            let ensured = self.hashes.regenerate_hashes(&post).await?;
            let outcome = self.pools.rebuild(post.id, &ensured.rows)?;
            stats.pairs_created += outcome.pairs.created;
            stats.regenerated.push(post.id);
        }
        Ok(stats)
    }

    /// Match external images against the store. Per-URL failures are reported
    /// in that URL's result; nothing is written to the graph.
    pub async fn check_similarity(
        &self,
        urls: &[String],
        min_score: f64,
        include_posts: bool,
    ) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            results.push(self.check_url(url, min_score, include_posts).await);
        }
        results
    }

    async fn check_url(&self, url: &str, min_score: f64, include_posts: bool) -> CheckResult {
        let mut result = CheckResult {
            image_url: url.to_string(),
            post_results: Vec::new(),
            cache: None,
            error: None,
        };

        let cached = match self.cache.fetch(url).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(url, error = %e, "Failed to fetch query image");
                result.error = Some(e.to_string());
                return result;
            }
        };
        result.cache = Some(cached.media.file_url());

        match self.match_image(cached.bytes, min_score, include_posts).await {
            Ok(post_results) => result.post_results = post_results,
            Err(e) => {
                warn!(url, error = %e, "Failed to match query image");
                result.error = Some(e.to_string());
            }
        }
        result
    }

    async fn match_image(
        &self,
        bytes: Bytes,
        min_score: f64,
        include_posts: bool,
    ) -> Result<Vec<PostMatch>, SimilarityError> {
        let (hash, width, height) =
            tokio::task::spawn_blocking(move || wavelet::hash_bytes(&bytes)).await??;
        let ratio = if height == 0 {
            0.0
        } else {
            round4(f64::from(width) / f64::from(height))
        };

        let query = self.filter.build(&hash, ratio, None);
        let candidates = self.db.find_candidates(&query)?;
        let matches = filter_by_threshold(&candidates, &hash, min_score)?;

        let mut posts: HashMap<u64, PostRecord> = if include_posts {
            let ids: Vec<u64> = matches.iter().map(|m| m.post_id).collect();
            self.db
                .get_posts(&ids)?
                .into_iter()
                .map(|p| (p.id, p))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(matches
            .into_iter()
            .map(|m| PostMatch {
                post: posts.remove(&m.post_id),
                post_id: m.post_id,
                score: m.score,
            })
            .collect())
    }

    /// Delete a post and everything derived from it: pool elements (with
    /// their siblings), the pool, then its similarity data.
    pub async fn remove_post(&self, post_id: u64) -> Result<bool, SimilarityError> {
        let _pass = self.pass_lock.lock().await;

        let elements = self.pools.remove_post(post_id)?;
        let rows = self.db.delete_similarity_data_for_post(post_id)?;
        let existed = self.db.delete_post(post_id)?;
        info!(post_id, elements, rows, existed, "Removed post");
        Ok(existed)
    }
}
