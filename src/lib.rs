//! post-similarity - Perceptual similarity search and clustering for archived posts
//!
//! This crate keeps a persistent, symmetric similarity graph between posts:
//! - Haar wavelet perceptual hashes per visually distinct rendition
//! - Ratio + chunk-banding candidate prefilter executed inside redb indexes
//! - Checkpointed catch-up passes guarded by a drop-on-busy mutex
//! - Ad-hoc queries for external images through a download cache
//! - REST API with JSend envelopes

pub mod api;
pub mod config;
pub mod media_cache;
pub mod object_store;
pub mod scheduler;
pub mod similarity;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use std::sync::Arc;

use config::Config;
use media_cache::MediaCache;
use similarity::SimilarityService;
use storage::Database;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub object_store: Arc<dyn object_store::ObjectStore>,
    pub cache: Arc<MediaCache>,
    pub service: Arc<SimilarityService>,
}

impl AppState {
    /// Wire the cache and similarity service over an opened database and store.
    pub fn new(
        config: Config,
        db: Database,
        object_store: Arc<dyn object_store::ObjectStore>,
    ) -> Result<Self, media_cache::CacheError> {
        let cache = Arc::new(MediaCache::new(
            db.clone(),
            Arc::clone(&object_store),
            &config.cache,
        )?);
        let service = Arc::new(SimilarityService::new(
            db.clone(),
            Arc::clone(&object_store),
            Arc::clone(&cache),
            &config.similarity,
        ));
        Ok(Self {
            config,
            db,
            object_store,
            cache,
            service,
        })
    }
}
