use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::similarity::filter::round4;
use crate::similarity::hash::{HashError, ImageHash};

/// File extensions whose full rendition is not a still image.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm"];

/// The three stored renditions of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rendition {
    Full,
    Preview,
    Sample,
}

/// A finished post deposited by the upstream archive pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: u64,
    pub md5: String,
    pub file_ext: String,
    pub width: u32,
    pub height: u32,
    /// A downscaled sample rendition was produced.
    #[serde(default)]
    pub has_sample: bool,
    /// A downscaled preview rendition was produced.
    #[serde(default)]
    pub has_preview: bool,
    pub created: DateTime<Utc>,
}

impl PostRecord {
    pub fn file_key(&self) -> String {
        format!("data/{}.{}", self.md5, self.file_ext)
    }

    pub fn sample_key(&self) -> String {
        if self.has_sample {
            format!("sample/{}.jpg", self.md5)
        } else {
            self.file_key()
        }
    }

    pub fn preview_key(&self) -> String {
        if self.has_preview {
            format!("preview/{}.jpg", self.md5)
        } else {
            self.file_key()
        }
    }

    /// Object store key holding the bytes of `rendition`.
    pub fn rendition_key(&self, rendition: Rendition) -> String {
        match rendition {
            Rendition::Full => self.file_key(),
            Rendition::Preview => self.preview_key(),
            Rendition::Sample => self.sample_key(),
        }
    }

    pub fn is_video(&self) -> bool {
        VIDEO_EXTENSIONS.contains(&self.file_ext.to_ascii_lowercase().as_str())
    }

    pub fn ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        round4(f64::from(self.width) / f64::from(self.height))
    }
}

/// One visually distinct rendition hash of a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityData {
    pub id: u64,
    pub post_id: u64,
    pub ratio: f64,
    /// Hash split into fixed-width hex chunks, in order.
    pub chunks: Vec<String>,
}

impl SimilarityData {
    /// Reassemble the stored hash. Fails only on a corrupt row.
    pub fn image_hash(&self) -> Result<ImageHash, HashError> {
        ImageHash::from_chunks(&self.chunks)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityPool {
    pub id: u64,
    pub post_id: u64,
    /// Candidate rows returned by the prefilter before scoring.
    pub total_results: u64,
    /// Seconds spent on candidate lookup and scoring.
    pub calculation_time: f64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// A directed match edge. `sibling_id` points at the reciprocal element in the
/// other post's pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityPoolElement {
    pub id: u64,
    pub pool_id: u64,
    /// The other post.
    pub post_id: u64,
    pub score: f64,
    pub sibling_id: Option<u64>,
}

/// A downloaded ad-hoc image held in the cache until `expires`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: u64,
    /// Content digest, used as the object key.
    pub md5: String,
    pub file_ext: String,
    pub media_url: String,
    pub expires: DateTime<Utc>,
}

impl MediaFile {
    pub fn object_key(&self) -> String {
        format!("cache/{}.{}", self.md5, self.file_ext)
    }

    /// URL path the cached bytes are served from.
    pub fn file_url(&self) -> String {
        format!("/{}", self.object_key())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}
