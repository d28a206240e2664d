use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use chrono::{Duration, Utc};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use post_similarity::config::{CacheConfig, Config, ServerConfig, StorageConfig};
use post_similarity::media_cache::{content_digest, CacheError, MediaCache};
use post_similarity::object_store::{LocalStore, ObjectStore};
use post_similarity::storage::models::PostRecord;
use post_similarity::storage::Database;
use post_similarity::AppState;

fn checkerboard_png(size: u32, square: u32, inverted: bool) -> Bytes {
    let image = GrayImage::from_fn(size, size, |x, y| {
        let on = ((x / square) + (y / square)) % 2 == 0;
        Luma([if on != inverted { 255 } else { 0 }])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    Bytes::from(buf)
}

/// Serve `png` at `/img` (extensionless, typed by header) and count hits.
async fn image_server(png: Bytes, hits: Arc<AtomicUsize>) -> String {
    let router = Router::new()
        .route(
            "/img",
            get(move || {
                let png = png.clone();
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    ([(header::CONTENT_TYPE, "image/png")], png)
                }
            }),
        )
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn test_cache(dir: &tempfile::TempDir) -> (Database, Arc<dyn ObjectStore>, MediaCache) {
    let db = Database::open(dir.path().join("data")).unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(dir.path().join("files")).unwrap());
    let cache = MediaCache::new(db.clone(), Arc::clone(&store), &CacheConfig::default()).unwrap();
    (db, store, cache)
}

#[tokio::test]
async fn test_fetch_downloads_once_then_hits_cache() {
    let dir = tempfile::tempdir().unwrap();
    let (_db, store, cache) = test_cache(&dir);
    let png = checkerboard_png(64, 8, false);
    let hits = Arc::new(AtomicUsize::new(0));
    let base = image_server(png.clone(), Arc::clone(&hits)).await;
    let url = format!("{base}/img");

    let first = cache.fetch(&url).await.unwrap();
    assert!(first.downloaded);
    assert_eq!(first.bytes, png);
    assert_eq!(first.media.md5, content_digest(&png));
    assert_eq!(first.media.file_ext, "png");
    assert!(first.media.expires > Utc::now() + Duration::hours(23));
    assert!(store.exists(&first.media.object_key()).await.unwrap());

    let second = cache.fetch(&url).await.unwrap();
    assert!(!second.downloaded);
    assert_eq!(second.media.id, first.media.id);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_expired_row_is_downloaded_again() {
    let dir = tempfile::tempdir().unwrap();
    let (db, _store, cache) = test_cache(&dir);
    let png = checkerboard_png(64, 8, false);
    let hits = Arc::new(AtomicUsize::new(0));
    let url = format!("{}/img", image_server(png, Arc::clone(&hits)).await);

    let first = cache.fetch(&url).await.unwrap();
    db.put_media_file(&url, &first.media.md5, "png", Utc::now() - Duration::minutes(1))
        .unwrap();

    let second = cache.fetch(&url).await.unwrap();
    assert!(second.downloaded);
    assert_eq!(second.media.id, first.media.id);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_http_error_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (db, _store, cache) = test_cache(&dir);
    let base = image_server(Bytes::new(), Arc::new(AtomicUsize::new(0))).await;
    let url = format!("{base}/missing");

    let result = cache.fetch(&url).await;
    assert!(matches!(result, Err(CacheError::Status { status: 404, .. })));
    assert!(db.get_media_by_url(&url).unwrap().is_none());
}

#[tokio::test]
async fn test_evict_expired_removes_rows_and_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let (db, store, cache) = test_cache(&dir);
    let base = image_server(checkerboard_png(64, 8, false), Arc::new(AtomicUsize::new(0))).await;
    let url = format!("{base}/img");

    let cached = cache.fetch(&url).await.unwrap();
    assert_eq!(cache.evict_expired().await.unwrap(), 0);

    db.put_media_file(&url, &cached.media.md5, "png", Utc::now() - Duration::seconds(1))
        .unwrap();
    assert_eq!(cache.evict_expired().await.unwrap(), 1);

    assert!(db.get_media_by_url(&url).unwrap().is_none());
    assert!(!store.exists(&cached.media.object_key()).await.unwrap());
}

#[tokio::test]
async fn test_evict_keeps_bytes_shared_with_live_row() {
    let dir = tempfile::tempdir().unwrap();
    let (db, store, cache) = test_cache(&dir);
    let base = image_server(checkerboard_png(64, 8, false), Arc::new(AtomicUsize::new(0))).await;

    let cached = cache.fetch(&format!("{base}/img")).await.unwrap();
    db.put_media_file(
        "https://mirror.test/img",
        &cached.media.md5,
        "png",
        Utc::now() + Duration::hours(1),
    )
    .unwrap();
    db.put_media_file(
        &format!("{base}/img"),
        &cached.media.md5,
        "png",
        Utc::now() - Duration::seconds(1),
    )
    .unwrap();

    assert_eq!(cache.evict_expired().await.unwrap(), 1);
    assert!(store.exists(&cached.media.object_key()).await.unwrap());
}

#[tokio::test]
async fn test_check_similarity_matches_stored_post() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let files_dir = dir.path().join("files");
    let config = Config {
        server: ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: data_dir.to_string_lossy().to_string(),
        },
        storage: StorageConfig {
            local_storage_path: files_dir.to_string_lossy().to_string(),
        },
        ..Config::default()
    };
    let db = Database::open(&data_dir).unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(&files_dir).unwrap());
    let state = AppState::new(config, db, Arc::clone(&store)).unwrap();

    let stored = PostRecord {
        id: 11,
        md5: "0123456789abcdef0123456789abcdef".to_string(),
        file_ext: "png".to_string(),
        width: 256,
        height: 256,
        has_sample: false,
        has_preview: false,
        created: Utc::now(),
    };
    store
        .put(&stored.file_key(), checkerboard_png(256, 32, false))
        .await
        .unwrap();
    state.db.put_post(&stored).unwrap();
    state.service.run_blocking().await.unwrap();
    let elements_before = state.db.element_count().unwrap();

    // The same pattern at a smaller size, fetched over HTTP.
    let png = checkerboard_png(128, 16, false);
    let base = image_server(png.clone(), Arc::new(AtomicUsize::new(0))).await;
    let urls = vec![format!("{base}/img"), format!("{base}/missing")];

    let results = state.service.check_similarity(&urls, 90.0, true).await;
    assert_eq!(results.len(), 2);

    let hit = &results[0];
    assert!(hit.error.is_none());
    assert_eq!(hit.post_results.len(), 1);
    assert_eq!(hit.post_results[0].post_id, 11);
    assert_eq!(hit.post_results[0].score, 100.0);
    assert_eq!(hit.post_results[0].post.as_ref().unwrap().md5, stored.md5);
    assert_eq!(
        hit.cache.as_deref(),
        Some(format!("/cache/{}.png", content_digest(&png)).as_str())
    );

    let miss = &results[1];
    assert!(miss.error.is_some());
    assert!(miss.post_results.is_empty());

    // Read-only against the graph.
    assert_eq!(state.db.element_count().unwrap(), elements_before);
    assert!(state.db.get_similarity_data_for_post(0).unwrap().is_empty());
    assert_eq!(state.db.max_similarity_data_post_id().unwrap(), 11);

    let without_posts = state
        .service
        .check_similarity(&urls[..1], 90.0, false)
        .await;
    assert!(without_posts[0].post_results[0].post.is_none());
}

#[tokio::test]
async fn test_refresh_releases_replaced_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let (db, store, cache) = test_cache(&dir);
    let base = image_server(checkerboard_png(64, 8, false), Arc::new(AtomicUsize::new(0))).await;
    let url = format!("{base}/img");

    let stale = Bytes::from_static(b"stale image bytes");
    let stale_md5 = content_digest(&stale);
    let stale_key = format!("cache/{stale_md5}.png");
    store.put(&stale_key, stale).await.unwrap();
    db.put_media_file(&url, &stale_md5, "png", Utc::now() - Duration::minutes(5))
        .unwrap();

    let refreshed = cache.fetch(&url).await.unwrap();
    assert!(refreshed.downloaded);
    assert_ne!(refreshed.media.md5, stale_md5);
    assert!(!store.exists(&stale_key).await.unwrap());
    assert!(store.exists(&refreshed.media.object_key()).await.unwrap());
    assert_eq!(cache.evict_expired().await.unwrap(), 0);
}

#[tokio::test]
async fn test_refresh_keeps_replaced_bytes_shared_by_another_row() {
    let dir = tempfile::tempdir().unwrap();
    let (db, store, cache) = test_cache(&dir);
    let base = image_server(checkerboard_png(64, 8, false), Arc::new(AtomicUsize::new(0))).await;
    let url = format!("{base}/img");

    let stale = Bytes::from_static(b"stale image bytes");
    let stale_md5 = content_digest(&stale);
    let stale_key = format!("cache/{stale_md5}.png");
    store.put(&stale_key, stale).await.unwrap();
    db.put_media_file(&url, &stale_md5, "png", Utc::now() - Duration::minutes(5))
        .unwrap();
    db.put_media_file(
        "https://mirror.test/stale.png",
        &stale_md5,
        "png",
        Utc::now() + Duration::hours(1),
    )
    .unwrap();

    cache.fetch(&url).await.unwrap();
    assert!(store.exists(&stale_key).await.unwrap());
}
