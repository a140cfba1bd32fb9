//! Error types for MCDA core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for raster/vector operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Malformed GeoTIFF: {0}")]
    GeoTiff(String),

    #[error("Malformed shapefile {path}: {reason}")]
    Shapefile { path: PathBuf, reason: String },

    #[error("Dataset {stem} is incomplete, missing: {missing:?}")]
    IncompleteDataset { stem: String, missing: Vec<PathBuf> },

    #[error("CRS {0} cannot be written as WKT")]
    UnrepresentableCrs(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error describes a malformed or incomplete input dataset
    /// rather than a failed computation.
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            Error::GeoTiff(_)
                | Error::Shapefile { .. }
                | Error::UnsupportedDataType(_)
                | Error::InvalidDimensions { .. }
                | Error::UnrepresentableCrs(_)
        )
    }
}

/// Result type alias for MCDA core operations
pub type Result<T> = std::result::Result<T, Error>;
