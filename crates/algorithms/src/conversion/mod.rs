//! Vector/raster conversion

mod rasterize;

pub use rasterize::{rasterize, Rasterize, RasterizeParams, DEFAULT_FILL};
