//! Repository parameters.
//!
//! Parameters are fixed per repository and must match between the commit
//! that wrote a version and any later commit or restore that reads it; the
//! repository itself stores no parameter file.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::codec::Codec;
use crate::error::{Result, StrataError};
use crate::matcher::STORE_QUEUE_DEPTH;

fn default_chunk_size() -> usize {
    8192
}

fn default_sketch_w_size() -> usize {
    32
}

fn default_sketch_sf_count() -> usize {
    3
}

fn default_sketch_f_count() -> usize {
    4
}

fn default_polynomial_seed() -> u64 {
    1
}

fn default_max_patch_ratio() -> usize {
    10
}

fn default_cache_capacity() -> usize {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoParams {
    /// Target chunk size in bytes; also the rolling-hash window.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Sketch feature window size in bytes.
    #[serde(default = "default_sketch_w_size")]
    pub sketch_w_size: usize,

    /// Super-features per chunk sketch.
    #[serde(default = "default_sketch_sf_count")]
    pub sketch_sf_count: usize,

    /// Features per super-feature.
    #[serde(default = "default_sketch_f_count")]
    pub sketch_f_count: usize,

    /// Seed for deriving the rolling-hash polynomial.
    #[serde(default = "default_polynomial_seed")]
    pub polynomial_seed: u64,

    /// A delta chunk is accepted only if its patch is smaller than
    /// `chunk_size / max_patch_ratio`.
    #[serde(default = "default_max_patch_ratio")]
    pub max_patch_ratio: usize,

    /// Capacity of the FIFO chunk cache, in entries.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Compression wrapper for stored chunk payloads.
    #[serde(default)]
    pub codec: Codec,
}

impl Default for RepoParams {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            sketch_w_size: default_sketch_w_size(),
            sketch_sf_count: default_sketch_sf_count(),
            sketch_f_count: default_sketch_f_count(),
            polynomial_seed: default_polynomial_seed(),
            max_patch_ratio: default_max_patch_ratio(),
            cache_capacity: default_cache_capacity(),
            codec: Codec::default(),
        }
    }
}

impl RepoParams {
    /// Load parameters from a YAML file; absent keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let params: RepoParams = serde_yaml::from_str(&raw)
            .map_err(|e| StrataError::Config(format!("parsing '{}': {e}", path.display())))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(StrataError::Config("chunk_size must be non-zero".into()));
        }
        if self.sketch_w_size == 0 || self.sketch_sf_count == 0 || self.sketch_f_count == 0 {
            return Err(StrataError::Config(
                "sketch window, super-feature and feature counts must be non-zero".into(),
            ));
        }
        let f_size = self.chunk_size / (self.sketch_sf_count * self.sketch_f_count);
        if f_size < self.sketch_w_size {
            return Err(StrataError::Config(format!(
                "feature regions ({f_size} bytes) are smaller than the sketch window ({} bytes)",
                self.sketch_w_size
            )));
        }
        if self.max_patch_ratio == 0 {
            return Err(StrataError::Config("max_patch_ratio must be non-zero".into()));
        }
        if self.cache_capacity < STORE_QUEUE_DEPTH {
            return Err(StrataError::Config(format!(
                "cache_capacity must be at least the store queue depth ({STORE_QUEUE_DEPTH})"
            )));
        }
        Ok(())
    }

    /// Largest patch accepted for a delta chunk.
    pub fn max_patch_size(&self) -> usize {
        self.chunk_size / self.max_patch_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let params = RepoParams::default();
        params.validate().unwrap();
        assert_eq!(params.chunk_size, 8192);
        assert_eq!(params.sketch_w_size, 32);
        assert_eq!(params.sketch_sf_count, 3);
        assert_eq!(params.sketch_f_count, 4);
        assert_eq!(params.max_patch_size(), 819);
        assert_eq!(params.codec, Codec::Zlib);
    }

    #[test]
    fn yaml_overrides_and_defaults_mix() {
        let params: RepoParams = serde_yaml::from_str("chunk_size: 4096\ncodec: identity").unwrap();
        assert_eq!(params.chunk_size, 4096);
        assert_eq!(params.codec, Codec::Identity);
        assert_eq!(params.sketch_w_size, 32);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = serde_yaml::from_str::<RepoParams>("chunk_sizes: 4096").unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn validate_rejects_tiny_feature_regions() {
        let params = RepoParams {
            chunk_size: 256,
            ..RepoParams::default()
        };
        assert!(matches!(params.validate(), Err(StrataError::Config(_))));
    }

    #[test]
    fn validate_rejects_zero_ratio() {
        let params = RepoParams {
            max_patch_ratio: 0,
            ..RepoParams::default()
        };
        assert!(matches!(params.validate(), Err(StrataError::Config(_))));
    }
}
