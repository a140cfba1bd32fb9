//! # MCDA Algorithms
//!
//! The geoprocessing stages of the suitability pipeline, as pure functions
//! over `mcda-core` types.
//!
//! ## Available Algorithm Categories
//!
//! - **vector**: Buffer
//! - **conversion**: Rasterize onto a reference grid
//! - **mask**: Crop and mask a raster by boundary geometries
//! - **overlay**: Weighted overlay

pub(crate) mod coverage;
pub(crate) mod maybe_rayon;

pub mod conversion;
pub mod mask;
pub mod overlay;
pub mod vector;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::conversion::{rasterize, Rasterize, RasterizeParams};
    pub use crate::mask::{mask, Mask, MaskParams};
    pub use crate::overlay::{weighted_overlay, WeightedOverlay};
    pub use crate::vector::{buffer_geometry, buffer_layer, Buffer, BufferParams};
    pub use mcda_core::prelude::*;
}
