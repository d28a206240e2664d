use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::api::response::ApiError;
use crate::object_store::ObjectStoreError;
use crate::AppState;

/// Serve cached download bytes.
/// Route: GET /cache/*key
pub async fn serve_cache(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let object_key = format!("cache/{key}");
    let data = state
        .object_store
        .get(&object_key)
        .await
        .map_err(|e| match e {
            ObjectStoreError::NotFound(_) | ObjectStoreError::InvalidKey(_) => {
                ApiError::not_found("Cached file not found")
            }
            _ => ApiError::internal(format!("Failed to retrieve cached file: {e}")),
        })?;

    let mime = mime_guess::from_path(&key).first_or_octet_stream();

    let mut response = (StatusCode::OK, data).into_response();
    let headers = response.headers_mut();

    if let Ok(value) = mime.essence_str().parse() {
        headers.insert(header::CONTENT_TYPE, value);
    }

    // Content under a digest key never changes
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("public, max-age=3600"),
    );

    Ok(response)
}
