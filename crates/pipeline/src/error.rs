//! Pipeline error taxonomy.

use mcda_cloud::CloudError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Upload,
    Buffer,
    Rasterize,
    Mask,
    Store,
    Overlay,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Buffer => "buffer",
            Stage::Rasterize => "rasterize",
            Stage::Mask => "mask",
            Stage::Store => "store",
            Stage::Overlay => "overlay",
        }
    }

    fn failure(&self) -> &'static str {
        match self {
            Stage::Upload => "Upload failed",
            Stage::Buffer => "Buffer analysis failed",
            Stage::Rasterize => "Rasterization failed",
            Stage::Mask => "Masking failed",
            Stage::Store => "File upload to object store failed",
            Stage::Overlay => "Weighted overlay analysis failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by a pipeline request.
///
/// No variant is retried; the request fails as a whole.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Network or object-store failure
    #[error("{}: {source}", .stage.failure())]
    UpstreamFetch {
        stage: Stage,
        #[source]
        source: CloudError,
    },

    /// Malformed or incomplete vector/raster input
    #[error("{}: {source}", .stage.failure())]
    Format {
        stage: Stage,
        #[source]
        source: mcda_core::Error,
    },

    #[error("Rasterization failed: no .shp file among {}", display_paths(.inputs))]
    MissingPrimaryFile { inputs: Vec<PathBuf> },

    /// Geometry, rasterization or overlay computation failure
    #[error("{}: {source}", .stage.failure())]
    StageComputation {
        stage: Stage,
        #[source]
        source: mcda_core::Error,
    },

    /// Expected output files missing or unwritable
    #[error("{}: {message}", .stage.failure())]
    StorageWrite { stage: Stage, message: String },

    #[error("{}: {message}", .stage.failure())]
    InvalidRequest { stage: Stage, message: String },

    #[error("{what} not found")]
    NotFound { what: String },
}

fn display_paths(paths: &[PathBuf]) -> String {
    let names: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    format!("[{}]", names.join(", "))
}

impl PipelineError {
    /// Classify a core error raised while running `stage`.
    pub fn core(stage: Stage, source: mcda_core::Error) -> Self {
        if matches!(source, mcda_core::Error::IncompleteDataset { .. }) {
            return PipelineError::StorageWrite {
                stage,
                message: source.to_string(),
            };
        }
        if source.is_format() || matches!(source, mcda_core::Error::Io(_)) {
            PipelineError::Format { stage, source }
        } else {
            PipelineError::StageComputation { stage, source }
        }
    }

    pub fn cloud(stage: Stage, source: CloudError) -> Self {
        PipelineError::UpstreamFetch { stage, source }
    }

    pub fn invalid(stage: Stage, message: impl Into<String>) -> Self {
        PipelineError::InvalidRequest {
            stage,
            message: message.into(),
        }
    }

    pub fn storage(stage: Stage, message: impl Into<String>) -> Self {
        PipelineError::StorageWrite {
            stage,
            message: message.into(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::UpstreamFetch { stage, .. }
            | PipelineError::Format { stage, .. }
            | PipelineError::StageComputation { stage, .. }
            | PipelineError::StorageWrite { stage, .. }
            | PipelineError::InvalidRequest { stage, .. } => *stage,
            PipelineError::MissingPrimaryFile { .. } => Stage::Rasterize,
            PipelineError::NotFound { .. } => Stage::Overlay,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::UpstreamFetch { .. } => "upstream_fetch",
            PipelineError::Format { .. } => "format",
            PipelineError::MissingPrimaryFile { .. } => "missing_primary_file",
            PipelineError::StageComputation { .. } => "stage_computation",
            PipelineError::StorageWrite { .. } => "storage_write",
            PipelineError::InvalidRequest { .. } => "invalid_request",
            PipelineError::NotFound { .. } => "not_found",
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
