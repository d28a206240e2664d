//! Download-and-cache for ad-hoc query images.
//!
//! Rows are keyed by URL and hold the content digest of the downloaded bytes;
//! the bytes live in the object store under `cache/{digest}.{ext}` until the
//! row expires and the eviction job removes both.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::storage::models::MediaFile;
use crate::storage::{Database, DatabaseError};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error("Download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} fetching {url}")]
    Status { status: u16, url: String },
    #[error("Invalid media URL: {0}")]
    InvalidUrl(String),
}

/// Cached bytes and the row describing them.
#[derive(Debug, Clone)]
pub struct CachedMedia {
    pub media: MediaFile,
    pub bytes: Bytes,
    /// Bytes were fetched from the network on this call
    pub downloaded: bool,
}

pub struct MediaCache {
    db: Database,
    object_store: Arc<dyn ObjectStore>,
    client: reqwest::Client,
    expiry: chrono::Duration,
}

impl MediaCache {
    pub fn new(
        db: Database,
        object_store: Arc<dyn ObjectStore>,
        config: &CacheConfig,
    ) -> Result<Self, CacheError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()?;
        Ok(Self {
            db,
            object_store,
            client,
            expiry: chrono::Duration::hours(config.expiry_hours),
        })
    }

    /// Return the cached bytes for `url`, downloading them when there is no
    /// unexpired row or the backing bytes are gone.
    pub async fn fetch(&self, url: &str) -> Result<CachedMedia, CacheError> {
        if let Some(media) = self.db.get_media_by_url(url)? {
            if !media.is_expired(Utc::now()) {
                match self.object_store.get(&media.object_key()).await {
                    Ok(bytes) => {
                        debug!(url, md5 = %media.md5, "Media cache hit");
                        return Ok(CachedMedia {
                            media,
                            bytes,
                            downloaded: false,
                        });
                    }
                    Err(ObjectStoreError::NotFound(_)) => {
                        warn!(url, key = %media.object_key(), "Cached bytes missing, downloading again");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        self.download(url).await
    }

    async fn download(&self, url: &str) -> Result<CachedMedia, CacheError> {
        let parsed = Url::parse(url).map_err(|_| CacheError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CacheError::InvalidUrl(url.to_string()));
        }

        let response = self.client.get(parsed.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;

        let md5 = content_digest(&bytes);
        let file_ext = file_extension(content_type.as_deref(), &parsed);
        let key = format!("cache/{md5}.{file_ext}");
        self.object_store.put(&key, bytes.clone()).await?;

        let previous = self.db.get_media_by_url(url)?;
        let media = self
            .db
            .put_media_file(url, &md5, &file_ext, Utc::now() + self.expiry)?;
        info!(url, md5 = %media.md5, size = bytes.len(), "Cached media download");

        if let Some(previous) = previous {
            self.release_replaced(&previous, &media).await?;
        }

        Ok(CachedMedia {
            media,
            bytes,
            downloaded: true,
        })
    }

    /// Drop the bytes a refreshed row no longer points at, unless another row
    /// still shares them.
    async fn release_replaced(
        &self,
        previous: &MediaFile,
        current: &MediaFile,
    ) -> Result<(), CacheError> {
        let old_key = previous.object_key();
        if old_key == current.object_key() {
            return Ok(());
        }
        if self.db.media_digest_in_use(&previous.md5, previous.id)? {
            return Ok(());
        }
        if let Err(e) = self.object_store.delete(&old_key).await {
            warn!(key = %old_key, error = %e, "Failed to delete replaced cached bytes");
        } else {
            debug!(key = %old_key, "Deleted replaced cached bytes");
        }
        Ok(())
    }

    /// Delete expired rows and their bytes. Bytes still referenced by a live
    /// row (same content under another URL) are kept.
    pub async fn evict_expired(&self) -> Result<usize, CacheError> {
        let expired = self.db.expired_media_files(Utc::now())?;
        let mut evicted = 0;
        for media in expired {
            if !self.db.delete_media_file(media.id)? {
                continue;
            }
            evicted += 1;

            if self.db.media_digest_in_use(&media.md5, media.id)? {
                continue;
            }
            if let Err(e) = self.object_store.delete(&media.object_key()).await {
                warn!(key = %media.object_key(), error = %e, "Failed to delete cached bytes");
            }
        }
        if evicted > 0 {
            info!(evicted, "Evicted expired media files");
        }
        Ok(evicted)
    }
}

/// Hex SHA-256 of the content.
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(ring::digest::digest(&ring::digest::SHA256, bytes).as_ref())
}

/// Extension for stored bytes: the URL's own image extension, else one
/// registered for the response content type, else `bin`.
pub fn file_extension(content_type: Option<&str>, url: &Url) -> String {
    let from_path = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= 5
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
                && mime_guess::from_ext(ext)
                    .first_raw()
                    .is_some_and(|mime| mime.starts_with("image/"))
        });
    if let Some(ext) = from_path {
        return ext;
    }

    let from_mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .and_then(mime_guess::get_mime_extensions_str)
        .and_then(|exts| {
            if exts.contains(&"jpg") {
                Some("jpg")
            } else {
                exts.first().copied()
            }
        });
    from_mime.unwrap_or("bin").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            content_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn extension_prefers_url_path() {
        assert_eq!(
            file_extension(Some("application/octet-stream"), &url("https://a.test/x/IMG.PNG")),
            "png"
        );
    }

    #[test]
    fn extension_falls_back_to_content_type() {
        assert_eq!(
            file_extension(Some("image/png; charset=binary"), &url("https://a.test/img?id=4")),
            "png"
        );
        assert_eq!(
            file_extension(Some("image/jpeg"), &url("https://a.test/media/12345")),
            "jpg"
        );
    }

    #[test]
    fn unknown_extension_is_bin() {
        assert_eq!(file_extension(None, &url("https://a.test/download")), "bin");
        assert_eq!(file_extension(None, &url("https://a.test/file.exe")), "bin");
    }
}
