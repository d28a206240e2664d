use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::{ApiError, JSend};
use crate::storage::models::{SimilarityPool, SimilarityPoolElement};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PoolResponse {
    pub pool: SimilarityPool,
    /// Best score first
    pub elements: Vec<SimilarityPoolElement>,
}

#[derive(Debug, Serialize)]
pub struct DeleteElementResponse {
    /// Rows removed, the element and its sibling
    pub deleted: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Route: GET /similarity_pools/:post_id
pub async fn get_similarity_pool(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<u64>,
) -> Result<Json<JSend<PoolResponse>>, ApiError> {
    let pool = state
        .db
        .get_pool_by_post(post_id)
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("Similarity pool not found"))?;

    let elements = state
        .db
        .get_elements_for_pool(pool.id)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(JSend::success(PoolResponse { pool, elements }))
}

/// Delete an element together with its sibling.
/// Route: DELETE /similarity_pool_elements/:id
pub async fn delete_pool_element(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<JSend<DeleteElementResponse>>, ApiError> {
    let deleted = state
        .service
        .pools()
        .delete(id)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    if deleted == 0 {
        return Err(ApiError::not_found("Similarity pool element not found"));
    }

    tracing::info!(element_id = id, deleted, "Deleted similarity pool element");
    Ok(JSend::success(DeleteElementResponse { deleted }))
}
