use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppQuery, JSend};
use crate::similarity::{CheckResult, PassStats, SimilarityError};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GenerateSimilarityParams {
    #[serde(default)]
    pub post_ids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CheckSimilarityParams {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub include_posts: bool,
}

/// Outcome envelope shared by the similarity routes.
#[derive(Debug, Serialize)]
pub struct SimilarityResponse {
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similar_results: Option<Vec<CheckResult>>,
}

impl SimilarityResponse {
    fn ok() -> Self {
        Self {
            error: false,
            message: None,
            similar_results: None,
        }
    }

    fn failed(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                error: true,
                message: Some(message.into()),
                similar_results: None,
            }),
        )
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Force hashes and pool entries of the given posts to be recomputed.
/// Route: POST /generate_similarity?post_ids[]=1&post_ids[]=2
pub async fn generate_similarity(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<GenerateSimilarityParams>,
) -> (StatusCode, Json<SimilarityResponse>) {
    if params.post_ids.is_empty() {
        return SimilarityResponse::failed(StatusCode::BAD_REQUEST, "Must include post_ids.");
    }

    match state
        .service
        .generate_posts_similarity(&params.post_ids)
        .await
    {
        Ok(stats) => {
            tracing::info!(
                regenerated = stats.regenerated.len(),
                missing = stats.missing.len(),
                pairs_created = stats.pairs_created,
                "Regenerated post similarity"
            );
            (StatusCode::OK, Json(SimilarityResponse::ok()))
        }
        Err(SimilarityError::Busy) => SimilarityResponse::failed(
            StatusCode::CONFLICT,
            "Similarity regeneration is already running.",
        ),
        Err(e) => {
            tracing::error!(error = %e, "Similarity regeneration failed");
            SimilarityResponse::failed(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Match external images against stored posts without touching the graph.
/// Route: GET /check_similarity?urls[]=...&score=90&include_posts=true
pub async fn check_similarity(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<CheckSimilarityParams>,
) -> (StatusCode, Json<SimilarityResponse>) {
    if params.urls.is_empty() {
        return SimilarityResponse::failed(StatusCode::BAD_REQUEST, "Must include url.");
    }

    let min_score = params.score.unwrap_or(state.config.similarity.min_score);
    if !(0.0..=100.0).contains(&min_score) {
        return SimilarityResponse::failed(
            StatusCode::BAD_REQUEST,
            "score must be between 0 and 100.",
        );
    }

    let results = state
        .service
        .check_similarity(&params.urls, min_score, params.include_posts)
        .await;

    (
        StatusCode::OK,
        Json(SimilarityResponse {
            similar_results: Some(results),
            ..SimilarityResponse::ok()
        }),
    )
}

/// Schedule a catch-up pass if none is running.
/// Route: GET /check_posts
pub async fn check_posts(State(state): State<Arc<AppState>>) -> Json<bool> {
    Json(state.service.run_if_free())
}

/// Run a catch-up pass and wait for it to finish.
/// Route: POST /_internal/similarity/run
pub async fn run_similarity(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<PassStats>>, ApiError> {
    let stats = state
        .service
        .run_blocking()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(JSend::success(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_state;

    #[tokio::test]
    async fn generate_requires_post_ids() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let (status, Json(body)) = generate_similarity(
            State(state),
            AppQuery(GenerateSimilarityParams { post_ids: vec![] }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error);
        assert_eq!(body.message.as_deref(), Some("Must include post_ids."));
    }

    #[tokio::test]
    async fn generate_with_unknown_posts_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let (status, Json(body)) = generate_similarity(
            State(state),
            AppQuery(GenerateSimilarityParams { post_ids: vec![42] }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(!body.error);
    }

    #[tokio::test]
    async fn check_similarity_requires_urls() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let (status, Json(body)) = check_similarity(
            State(state),
            AppQuery(CheckSimilarityParams {
                urls: vec![],
                score: None,
                include_posts: false,
            }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.message.as_deref(), Some("Must include url."));
    }

    #[tokio::test]
    async fn check_similarity_reports_bad_url_per_item() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let (status, Json(body)) = check_similarity(
            State(state),
            AppQuery(CheckSimilarityParams {
                urls: vec!["not a url".to_string()],
                score: Some(95.0),
                include_posts: false,
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(!body.error);
        let results = body.similar_results.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].image_url, "not a url");
        assert!(results[0].error.is_some());
        assert!(results[0].cache.is_none());
    }

    #[test]
    fn query_arrays_use_bracket_syntax() {
        let params: CheckSimilarityParams = serde_qs::from_str(
            "urls[]=https%3A%2F%2Fa.test%2F1.png&urls[]=https%3A%2F%2Fa.test%2F2.png&include_posts=true",
        )
        .unwrap();
        assert_eq!(
            params.urls,
            vec!["https://a.test/1.png", "https://a.test/2.png"]
        );
        assert!(params.include_posts);
        assert_eq!(params.score, None);

        let params: GenerateSimilarityParams =
            serde_qs::from_str("post_ids[]=3&post_ids[]=7").unwrap();
        assert_eq!(params.post_ids, vec![3, 7]);
    }

    #[tokio::test]
    async fn check_posts_schedules_when_free() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let Json(scheduled) = check_posts(State(state)).await;
        assert!(scheduled);
    }
}
