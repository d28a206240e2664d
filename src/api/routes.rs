use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        // Similarity
        .route("/generate_similarity", post(handlers::generate_similarity))
        .route("/check_similarity", get(handlers::check_similarity))
        .route("/check_posts", get(handlers::check_posts))
        // Pools
        .route("/similarity_pools/:post_id", get(handlers::get_similarity_pool))
        .route(
            "/similarity_pool_elements/:id",
            delete(handlers::delete_pool_element),
        )
        // Cached downloads
        .route("/cache/*key", get(handlers::serve_cache))
        // Internal
        .route("/_internal/posts", post(handlers::create_post))
        .route("/_internal/posts/:id", delete(handlers::delete_post))
        .route("/_internal/similarity/run", post(handlers::run_similarity))
        .route("/_internal/health", get(handlers::health));

    // Test-only routes
    if state.config.test_mode {
        tracing::warn!("Test mode enabled, purge route is available.");
        router = router.route("/admin/purge", delete(handlers::admin_purge));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
