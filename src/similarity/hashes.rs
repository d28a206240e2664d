//! Hash store: the per-post set of visually distinct rendition hashes.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::hash::ImageHash;
use super::score::score;
use super::{wavelet, SimilarityError};
use crate::object_store::ObjectStore;
use crate::storage::models::{PostRecord, Rendition, SimilarityData};
use crate::storage::Database;

/// A rendition that could not be read or hashed.
#[derive(Debug, Clone, Serialize)]
pub struct RenditionError {
    pub rendition: Rendition,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct EnsuredHashes {
    pub rows: Vec<SimilarityData>,
    pub errors: Vec<RenditionError>,
    /// Rows were already stored and nothing was computed
    pub existing: bool,
}

pub struct HashStore {
    db: Database,
    object_store: Arc<dyn ObjectStore>,
    dedup_threshold: f64,
}

/// Renditions worth hashing for `post`, preview first. The full file is
/// skipped for videos and when the post is already preview-sized; the sample
/// only exists when it was produced.
pub fn renditions(post: &PostRecord) -> Vec<Rendition> {
    let mut renditions = vec![Rendition::Preview];
    if !post.is_video() && post.file_key() != post.preview_key() {
        renditions.push(Rendition::Full);
    }
    if post.sample_key() != post.file_key() && post.sample_key() != post.preview_key() {
        renditions.push(Rendition::Sample);
    }
    renditions
}

/// True when `candidate` scores below `threshold` against every kept hash.
pub fn is_distinct(kept: &[ImageHash], candidate: &ImageHash, threshold: f64) -> bool {
    kept.iter().all(|existing| score(existing, candidate) < threshold)
}

impl HashStore {
    pub fn new(db: Database, object_store: Arc<dyn ObjectStore>, dedup_threshold: f64) -> Self {
        Self {
            db,
            object_store,
            dedup_threshold,
        }
    }

    /// Compute and store the distinct rendition hashes of `post`. A post that
    /// already has rows is returned as is, so re-running is a no-op.
    ///
    /// All hashes are computed before anything is written and the rows land in
    /// one transaction; an interrupted run leaves no partial set behind.
    pub async fn ensure_hashes(&self, post: &PostRecord) -> Result<EnsuredHashes, SimilarityError> {
        let existing = self.db.get_similarity_data_for_post(post.id)?;
        if !existing.is_empty() {
            return Ok(EnsuredHashes {
                rows: existing,
                errors: Vec::new(),
                existing: true,
            });
        }

        let mut kept: Vec<ImageHash> = Vec::new();
        let mut errors = Vec::new();
        for rendition in renditions(post) {
            let hash = match self.hash_rendition(post, rendition).await {
                Ok(hash) => hash,
                Err(e) => {
                    warn!(post_id = post.id, ?rendition, error = %e, "Failed to hash rendition");
                    errors.push(RenditionError {
                        rendition,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if is_distinct(&kept, &hash, self.dedup_threshold) {
                kept.push(hash);
            } else {
                debug!(post_id = post.id, ?rendition, "Rendition duplicates a stored hash");
            }
        }

        let rows = if kept.is_empty() {
            Vec::new()
        } else {
            self.db.insert_similarity_data(post.id, post.ratio(), &kept)?
        };
        debug!(post_id = post.id, rows = rows.len(), "Stored similarity data");

        Ok(EnsuredHashes {
            rows,
            errors,
            existing: false,
        })
    }

    /// Drop the stored hashes of `post` and compute them again.
    pub async fn regenerate_hashes(
        &self,
        post: &PostRecord,
    ) -> Result<EnsuredHashes, SimilarityError> {
        let removed = self.db.delete_similarity_data_for_post(post.id)?;
        debug!(post_id = post.id, removed, "Deleted similarity data");
        self.ensure_hashes(post).await
    }

    async fn hash_rendition(
        &self,
        post: &PostRecord,
        rendition: Rendition,
    ) -> Result<ImageHash, SimilarityError> {
        let bytes = self.object_store.get(&post.rendition_key(rendition)).await?;
        let (hash, _, _) = tokio::task::spawn_blocking(move || wavelet::hash_bytes(&bytes)).await??;
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn post(file_ext: &str, has_sample: bool, has_preview: bool) -> PostRecord {
        PostRecord {
            id: 1,
            md5: "abc".to_string(),
            file_ext: file_ext.to_string(),
            width: 100,
            height: 100,
            has_sample,
            has_preview,
            created: Utc::now(),
        }
    }

    #[test]
    fn preview_sized_post_hashes_once() {
        assert_eq!(renditions(&post("png", false, false)), vec![Rendition::Preview]);
    }

    #[test]
    fn large_post_hashes_every_rendition() {
        assert_eq!(
            renditions(&post("png", true, true)),
            vec![Rendition::Preview, Rendition::Full, Rendition::Sample]
        );
        assert_eq!(
            renditions(&post("jpg", false, true)),
            vec![Rendition::Preview, Rendition::Full]
        );
    }

    #[test]
    fn video_skips_full_file() {
        assert_eq!(
            renditions(&post("mp4", true, true)),
            vec![Rendition::Preview, Rendition::Sample]
        );
    }

    #[test]
    fn distinctness_uses_threshold() {
        let zeros = ImageHash::from_hex(&"0".repeat(64)).unwrap();
        let ones = ImageHash::from_hex(&"f".repeat(64)).unwrap();
        // 4 bits off: 98.44
        let near = ImageHash::from_hex(&format!("f{}", "0".repeat(63))).unwrap();

        assert!(is_distinct(&[], &zeros, 90.0));
        assert!(is_distinct(&[zeros.clone()], &ones, 90.0));
        assert!(!is_distinct(&[zeros.clone()], &near, 90.0));
        assert!(!is_distinct(&[ones, zeros.clone()], &zeros, 90.0));
    }
}
