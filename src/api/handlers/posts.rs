use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppJson, JSend};
use crate::storage::models::PostRecord;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

/// A finished post deposited by the upstream pipeline. Its renditions must
/// already be in the object store.
#[derive(Debug, Deserialize, Serialize)]
pub struct CreatePostRequest {
    pub id: u64,
    pub md5: String,
    pub file_ext: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub has_sample: bool,
    #[serde(default)]
    pub has_preview: bool,
}

#[derive(Debug, Serialize)]
pub struct DeletePostResponse {
    pub id: u64,
}

impl CreatePostRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.id == 0 {
            return Err(ApiError::bad_request("id must be positive"));
        }
        if self.md5.is_empty() || !self.md5.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ApiError::bad_request("md5 must be a hex digest"));
        }
        if self.file_ext.is_empty() || !self.file_ext.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ApiError::bad_request("file_ext must be alphanumeric"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ApiError::bad_request("width and height must be positive"));
        }
        Ok(())
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Route: POST /_internal/posts
pub async fn create_post(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreatePostRequest>,
) -> Result<Json<JSend<PostRecord>>, ApiError> {
    req.validate()?;

    let post = PostRecord {
        id: req.id,
        md5: req.md5.to_ascii_lowercase(),
        file_ext: req.file_ext.to_ascii_lowercase(),
        width: req.width,
        height: req.height,
        has_sample: req.has_sample,
        has_preview: req.has_preview,
        created: Utc::now(),
    };

    let existing = state
        .db
        .get_post(post.id)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if existing.is_some() {
        return Err(ApiError::conflict(format!("Post {} already exists", post.id)));
    }

    state
        .db
        .put_post(&post)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    tracing::info!(post_id = post.id, md5 = %post.md5, "Post deposited");
    Ok(JSend::success(post))
}

/// Remove a post with its pool elements, pool and similarity data.
/// Route: DELETE /_internal/posts/:id
pub async fn delete_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<JSend<DeletePostResponse>>, ApiError> {
    let existed = state
        .service
        .remove_post(id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    if !existed {
        return Err(ApiError::not_found("Post not found"));
    }
    Ok(JSend::success(DeletePostResponse { id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_state;

    fn request(id: u64) -> CreatePostRequest {
        CreatePostRequest {
            id,
            md5: "D41D8CD98F00B204E9800998ECF8427E".to_string(),
            file_ext: "PNG".to_string(),
            width: 640,
            height: 480,
            has_sample: false,
            has_preview: true,
        }
    }

    #[tokio::test]
    async fn create_normalizes_and_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let Json(body) = create_post(State(Arc::clone(&state)), AppJson(request(5)))
            .await
            .unwrap();
        assert_eq!(body.data.md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(body.data.file_ext, "png");
        assert_eq!(state.db.get_post(5).unwrap().unwrap().width, 640);

        let result = create_post(State(state), AppJson(request(5))).await;
        assert!(matches!(result, Err(ApiError::Fail(code, _)) if code == axum::http::StatusCode::CONFLICT));
    }

    #[tokio::test]
    async fn create_validates_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let mut req = request(1);
        req.height = 0;
        let result = create_post(State(state), AppJson(req)).await;
        assert!(matches!(result, Err(ApiError::Fail(code, _)) if code == axum::http::StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn delete_missing_post_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let result = delete_post(State(state), Path(77)).await;
        assert!(result.is_err());
    }
}
