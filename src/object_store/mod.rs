mod local;

pub use local::LocalStore;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

/// Abstraction over object storage backends.
/// Keys are relative slash-separated paths such as `preview/{md5}.jpg` or
/// `cache/{digest}.png`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
}

/// Reject keys that could escape the store root.
pub(crate) fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_nested_keys() {
        assert!(validate_key("preview/abc.jpg").is_ok());
        assert!(validate_key("cache/0f.png").is_ok());
        assert!(validate_key("flat").is_ok());
    }

    #[test]
    fn rejects_escaping_keys() {
        for key in ["", "/etc/passwd", "../secret", "cache/../../x", "a//b", "a\\b", "./a"] {
            assert!(
                matches!(validate_key(key), Err(ObjectStoreError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
    }
}
