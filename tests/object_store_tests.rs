use bytes::Bytes;
use post_similarity::object_store::{LocalStore, ObjectStore, ObjectStoreError};

#[tokio::test]
async fn test_local_store_put_get() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    let data = Bytes::from("hello world");
    store.put("test-key", data.clone()).await.unwrap();

    let retrieved = store.get("test-key").await.unwrap();
    assert_eq!(retrieved, data);
}

#[tokio::test]
async fn test_local_store_nested_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    store
        .put("preview/abc123.jpg", Bytes::from("preview bytes"))
        .await
        .unwrap();

    assert!(dir.path().join("preview").join("abc123.jpg").is_file());
    assert_eq!(
        store.get("preview/abc123.jpg").await.unwrap(),
        Bytes::from("preview bytes")
    );
    assert!(!store.exists("sample/abc123.jpg").await.unwrap());
}

#[tokio::test]
async fn test_local_store_exists() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    assert!(!store.exists("missing").await.unwrap());

    store.put("cache/present.png", Bytes::from("data")).await.unwrap();
    assert!(store.exists("cache/present.png").await.unwrap());
}

#[tokio::test]
async fn test_local_store_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    store.put("data/to-delete.png", Bytes::from("data")).await.unwrap();
    assert!(store.exists("data/to-delete.png").await.unwrap());

    store.delete("data/to-delete.png").await.unwrap();
    assert!(!store.exists("data/to-delete.png").await.unwrap());
}

#[tokio::test]
async fn test_local_store_delete_nonexistent() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    // Deleting a nonexistent key should not error
    store.delete("cache/nonexistent.jpg").await.unwrap();
}

#[tokio::test]
async fn test_local_store_get_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    let result = store.get("missing").await;
    assert!(matches!(result, Err(ObjectStoreError::NotFound(_))));
}

#[tokio::test]
async fn test_local_store_rejects_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path().join("root")).unwrap();

    let result = store.put("../outside.txt", Bytes::from("x")).await;
    assert!(matches!(result, Err(ObjectStoreError::InvalidKey(_))));
    assert!(!dir.path().join("outside.txt").exists());
}

#[tokio::test]
async fn test_local_store_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    store.put("key", Bytes::from("first")).await.unwrap();
    store.put("key", Bytes::from("second")).await.unwrap();

    let data = store.get("key").await.unwrap();
    assert_eq!(data, Bytes::from("second"));
}
