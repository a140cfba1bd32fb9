//! Pipeline configuration.

use crate::error::{PipelineError, Result, Stage};
use mcda_algorithms::vector::DEFAULT_BUFFER_DISTANCE;
use std::path::PathBuf;

/// Settings for [`crate::McdaPipeline`].
///
/// The presigned URL lifetime belongs to the store and is set on
/// `mcda_cloud::StoreConfig`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent of the per-request staging directories
    pub staging_root: PathBuf,
    /// Planar buffer distance in layer units
    pub buffer_distance: f64,
    /// Leave per-request staging directories on disk after the response
    pub keep_staging: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            staging_root: std::env::temp_dir().join("mcda-staging"),
            buffer_distance: DEFAULT_BUFFER_DISTANCE,
            keep_staging: false,
        }
    }
}

impl PipelineConfig {
    /// Read `MCDA_STAGING_DIR`, `MCDA_BUFFER_DISTANCE` and `MCDA_KEEP_STAGING`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = var("MCDA_STAGING_DIR") {
            config.staging_root = PathBuf::from(dir);
        }
        if let Some(distance) = var("MCDA_BUFFER_DISTANCE") {
            config.buffer_distance = distance.trim().parse().map_err(|_| {
                PipelineError::invalid(
                    Stage::Buffer,
                    format!("MCDA_BUFFER_DISTANCE is not a number: {}", distance),
                )
            })?;
        }
        if let Some(keep) = var("MCDA_KEEP_STAGING") {
            config.keep_staging = matches!(keep.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.buffer_distance.is_finite() || self.buffer_distance < 0.0 {
            return Err(PipelineError::invalid(
                Stage::Buffer,
                format!("buffer distance must be finite and non-negative, got {}", self.buffer_distance),
            ));
        }
        Ok(())
    }
}
