use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::{ApiError, JSend};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// A similarity pass currently holds the lock
    pub similarity_running: bool,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub posts_deleted: u64,
    pub similarity_data_deleted: u64,
    pub pools_deleted: u64,
    pub elements_deleted: u64,
    pub media_files_deleted: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health(State(state): State<Arc<AppState>>) -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        similarity_running: state.service.is_running(),
    })
}

pub async fn admin_purge(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<PurgeResponse>>, ApiError> {
    let stats = state
        .db
        .purge_all()
        .map_err(|e| ApiError::internal(e.to_string()))?;

    tracing::warn!(
        posts = stats.posts,
        similarity_data = stats.similarity_data,
        pools = stats.pools,
        elements = stats.elements,
        media_files = stats.media_files,
        "Purged all data"
    );

    Ok(JSend::success(PurgeResponse {
        posts_deleted: stats.posts,
        similarity_data_deleted: stats.similarity_data,
        pools_deleted: stats.pools,
        elements_deleted: stats.elements,
        media_files_deleted: stats.media_files,
    }))
}
