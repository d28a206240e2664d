//! Perceptual similarity search and the persistent similarity graph.

pub mod filter;
pub mod hash;
pub mod hashes;
pub mod pools;
pub mod score;
pub mod service;
pub mod wavelet;

use thiserror::Error;

use crate::media_cache::CacheError;
use crate::object_store::ObjectStoreError;
use crate::storage::DatabaseError;

pub use hashes::{EnsuredHashes, HashStore, RenditionError};
pub use pools::{PairStats, PoolManager, PopulateOutcome};
pub use service::{CheckResult, GenerateStats, PassStats, PostMatch, SimilarityService};

#[derive(Debug, Error)]
pub enum SimilarityError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error("Hash error: {0}")]
    Hash(#[from] hash::HashError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Similarity processing is already running")]
    Busy,
    #[error("Post not found: {0}")]
    PostNotFound(u64),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
