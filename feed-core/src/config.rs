// feed-core/src/config.rs

//! Configuration for the minibatch feed.
//!
//! Parsed from TOML with environment-variable overrides (prefix `MBF_`)
//! and validated before use.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{FeedError, Result};

// Top-level feed configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub catalog: CatalogConfig,
    pub randomize: RandomizeConfig,
    pub paging: PagingConfig,
    /// One entry per feature stream, in stream order.
    pub streams: Vec<StreamConfig>,
}

// Catalog partitioning options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    // Frame budget per chunk; a unit joins the current chunk only while the
    // total stays within this.
    pub chunk_target_frames: usize,
    // Cap on units per chunk, bounded by the index encoding.
    pub max_units_per_chunk: usize,
    // Cap on frames per unit, bounded by the index encoding.
    pub max_unit_frames: usize,
}

// Randomization options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomizeConfig {
    /// Full randomization window in frames (split as a half window on each
    /// side of a chunk's position).
    pub randomization_range: usize,
    /// Randomize single frames instead of whole units.
    pub frame_mode: bool,
}

// Paging retry options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    // Maximum retry attempts for a failed page-in read.
    pub max_retries: u32,
    // Initial delay (milliseconds) between retries.
    pub retry_delay_ms: u64,
    // Maximum delay (milliseconds) between retries.
    pub max_retry_delay_ms: u64,
}

/// Per-stream context-augmentation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Neighbor frames to the left of the target frame.
    pub left_context: usize,
    /// Neighbor frames to the right of the target frame.
    pub right_context: usize,
    /// Declared augmented width; with `0/0` contexts the symmetric extent is
    /// derived from this instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub augmented_dim: Option<usize>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            chunk_target_frames: 90_000, // 15 minutes at 100 frames/sec
            max_units_per_chunk: 65_535,
            max_unit_frames: 65_535,
        }
    }
}

impl Default for RandomizeConfig {
    fn default() -> Self {
        Self {
            randomization_range: 17_280_000, // 48 hours at 100 frames/sec
            frame_mode: false,
        }
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_ms: 100,
            max_retry_delay_ms: 30_000,
        }
    }
}

impl FromStr for FeedConfig {
    type Err = FeedError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| FeedError::config_with_source("failed to parse TOML config", e))
    }
}

impl FeedConfig {
    // Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FeedError::storage_with_source(
                path.display().to_string(),
                "failed to read config file",
                e,
            )
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // - `MBF_CHUNK_TARGET_FRAMES` overrides `catalog.chunk_target_frames`
    // - `MBF_RANDOMIZATION_RANGE` overrides `randomize.randomization_range`
    // - `MBF_FRAME_MODE` overrides `randomize.frame_mode`
    // - `MBF_MAX_RETRIES` overrides `paging.max_retries`
    // - `MBF_RETRY_DELAY_MS` overrides `paging.retry_delay_ms`
    // - `MBF_MAX_RETRY_DELAY_MS` overrides `paging.max_retry_delay_ms`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("MBF_CHUNK_TARGET_FRAMES") {
            if let Ok(v) = val.parse() {
                self.catalog.chunk_target_frames = v;
            }
        }
        if let Ok(val) = std::env::var("MBF_RANDOMIZATION_RANGE") {
            if let Ok(v) = val.parse() {
                self.randomize.randomization_range = v;
            }
        }
        if let Ok(val) = std::env::var("MBF_FRAME_MODE") {
            if let Ok(v) = val.parse() {
                self.randomize.frame_mode = v;
            }
        }
        if let Ok(val) = std::env::var("MBF_MAX_RETRIES") {
            if let Ok(v) = val.parse() {
                self.paging.max_retries = v;
            }
        }
        if let Ok(val) = std::env::var("MBF_RETRY_DELAY_MS") {
            if let Ok(v) = val.parse() {
                self.paging.retry_delay_ms = v;
            }
        }
        if let Ok(val) = std::env::var("MBF_MAX_RETRY_DELAY_MS") {
            if let Ok(v) = val.parse() {
                self.paging.max_retry_delay_ms = v;
            }
        }
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.catalog.chunk_target_frames == 0 {
            return Err(FeedError::config(
                "catalog.chunk_target_frames must be greater than 0",
            ));
        }
        if self.catalog.max_units_per_chunk == 0 {
            return Err(FeedError::config(
                "catalog.max_units_per_chunk must be greater than 0",
            ));
        }
        if self.catalog.max_unit_frames < 2 {
            return Err(FeedError::config(
                "catalog.max_unit_frames must be at least 2",
            ));
        }
        if self.randomize.randomization_range == 0 {
            return Err(FeedError::config(
                "randomize.randomization_range must be greater than 0",
            ));
        }
        if self.paging.max_retry_delay_ms < self.paging.retry_delay_ms {
            return Err(FeedError::config(
                "paging.max_retry_delay_ms must not be below paging.retry_delay_ms",
            ));
        }
        for (i, stream) in self.streams.iter().enumerate() {
            if let Some(dim) = stream.augmented_dim {
                if dim == 0 {
                    return Err(FeedError::config(format!(
                        "streams[{i}].augmented_dim must be greater than 0"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FeedConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.catalog.chunk_target_frames, 90_000);
        assert_eq!(config.paging.max_retries, 5);
        assert!(!config.randomize.frame_mode);
    }

    #[test]
    fn test_parse_toml() {
        let config: FeedConfig = r#"
            [catalog]
            chunk_target_frames = 1500

            [randomize]
            randomization_range = 5000
            frame_mode = true

            [[streams]]
            left_context = 5
            right_context = 5
        "#
        .parse()
        .unwrap();

        assert_eq!(config.catalog.chunk_target_frames, 1500);
        assert_eq!(config.randomize.randomization_range, 5000);
        assert!(config.randomize.frame_mode);
        assert_eq!(config.streams.len(), 1);
        assert_eq!(config.streams[0].left_context, 5);
        assert_eq!(config.streams[0].augmented_dim, None);
    }

    #[test]
    fn test_parse_invalid_toml_fails() {
        let result: Result<FeedConfig> = "not valid toml [".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_zero_chunk_target() {
        let mut config = FeedConfig::default();
        config.catalog.chunk_target_frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_range() {
        let mut config = FeedConfig::default();
        config.randomize.randomization_range = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_retry_delays() {
        let mut config = FeedConfig::default();
        config.paging.retry_delay_ms = 1000;
        config.paging.max_retry_delay_ms = 10;
        assert!(config.validate().is_err());
    }
}
