use std::str::FromStr;

use thiserror::Error;

use crate::similarity::filter::BandingConfig;
use crate::similarity::hash::NUM_CHUNKS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub similarity: SimilarityConfig,
    pub cache: CacheConfig,
    /// Enables dangerous operations like purge. Must never be true in production.
    pub test_mode: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory holding post renditions and cached downloads
    pub local_storage_path: String,
}

#[derive(Debug, Clone)]
pub struct SimilarityConfig {
    /// Lowest score that counts as a match
    pub min_score: f64,
    /// Renditions of one post scoring at or above this are treated as duplicates
    pub dedup_threshold: f64,
    /// Posts per catch-up page
    pub page_size: usize,
    /// Relative aspect-ratio window of the candidate filter
    pub ratio_tolerance: f64,
    pub banding: BandingConfig,
    /// Seconds between scheduled passes; 0 disables the schedule
    pub interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub expiry_hours: i64,
    pub download_timeout_secs: u64,
    pub evict_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_storage_path: "./files".to_string(),
        }
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            min_score: 90.0,
            dedup_threshold: 90.0,
            page_size: 100,
            ratio_tolerance: 0.01,
            banding: BandingConfig::default(),
            interval_secs: 300,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiry_hours: 24,
            download_timeout_secs: 10,
            evict_interval_secs: 3600,
        }
    }
}

/// Parse an env var, falling back to `default` when unset or unparseable.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_offsets(name: &str, value: &str) -> Result<Vec<usize>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| {
                ConfigError::ValidationError(format!("{name} has a non-numeric offset: {s:?}"))
            })
        })
        .collect()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let local_storage_path =
            std::env::var("LOCAL_STORAGE_PATH").unwrap_or_else(|_| "./files".to_string());

        let test_mode = std::env::var("TEST_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let defaults = SimilarityConfig::default();
        let banding = BandingConfig {
            even_offsets: match std::env::var("SIMILARITY_BAND_EVEN_OFFSETS") {
                Ok(v) => parse_offsets("SIMILARITY_BAND_EVEN_OFFSETS", &v)?,
                Err(_) => defaults.banding.even_offsets.clone(),
            },
            odd_offsets: match std::env::var("SIMILARITY_BAND_ODD_OFFSETS") {
                Ok(v) => parse_offsets("SIMILARITY_BAND_ODD_OFFSETS", &v)?,
                Err(_) => defaults.banding.odd_offsets.clone(),
            },
        };

        let similarity = SimilarityConfig {
            min_score: env_or("SIMILARITY_MIN_SCORE", defaults.min_score),
            dedup_threshold: env_or("SIMILARITY_DEDUP_THRESHOLD", defaults.dedup_threshold),
            page_size: env_or("SIMILARITY_PAGE_SIZE", defaults.page_size),
            ratio_tolerance: env_or("SIMILARITY_RATIO_TOLERANCE", defaults.ratio_tolerance),
            banding,
            interval_secs: env_or("SIMILARITY_INTERVAL_SECS", defaults.interval_secs),
        };

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            expiry_hours: env_or("CACHE_EXPIRY_HOURS", cache_defaults.expiry_hours),
            download_timeout_secs: env_or(
                "CACHE_DOWNLOAD_TIMEOUT_SECS",
                cache_defaults.download_timeout_secs,
            ),
            evict_interval_secs: env_or(
                "CACHE_EVICT_INTERVAL_SECS",
                cache_defaults.evict_interval_secs,
            ),
        };

        let config = Config {
            server: ServerConfig {
                bind_address,
                data_dir,
            },
            storage: StorageConfig { local_storage_path },
            similarity,
            cache,
            test_mode,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.similarity;
        for (name, score) in [
            ("SIMILARITY_MIN_SCORE", sim.min_score),
            ("SIMILARITY_DEDUP_THRESHOLD", sim.dedup_threshold),
        ] {
            if !(0.0..=100.0).contains(&score) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0 and 100, got {score}"
                )));
            }
        }

        if sim.page_size == 0 {
            return Err(ConfigError::ValidationError(
                "SIMILARITY_PAGE_SIZE must be at least 1".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&sim.ratio_tolerance) {
            return Err(ConfigError::ValidationError(format!(
                "SIMILARITY_RATIO_TOLERANCE must be in [0, 1), got {}",
                sim.ratio_tolerance
            )));
        }

        for (name, offsets) in [
            ("SIMILARITY_BAND_EVEN_OFFSETS", &sim.banding.even_offsets),
            ("SIMILARITY_BAND_ODD_OFFSETS", &sim.banding.odd_offsets),
        ] {
            if offsets.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{name} cannot be empty"
                )));
            }
            if let Some(bad) = offsets.iter().find(|&&o| o >= NUM_CHUNKS) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} offset {bad} is out of range (max {})",
                    NUM_CHUNKS - 1
                )));
            }
        }

        if self.cache.download_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "CACHE_DOWNLOAD_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }

        if self.cache.expiry_hours <= 0 {
            return Err(ConfigError::ValidationError(
                "CACHE_EXPIRY_HOURS must be positive".to_string(),
            ));
        }

        if self.test_mode {
            tracing::warn!("TEST_MODE is enabled; the purge route is exposed");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            similarity: SimilarityConfig::default(),
            cache: CacheConfig::default(),
            test_mode: false,
        }
    }
}
