//! Pixel grid definition shared by aligned rasters

use crate::crs::CRS;
use crate::raster::{GeoTransform, Raster, RasterElement};
use serde::{Deserialize, Serialize};

/// The (pixel shape, affine transform, CRS) triple that defines a raster's grid.
///
/// Derived once from the reference raster; every rasterized layer is burned
/// onto exactly this grid so downstream overlay can combine cells by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
    pub crs: Option<CRS>,
}

impl GridSpec {
    pub fn new(rows: usize, cols: usize, transform: GeoTransform, crs: Option<CRS>) -> Self {
        Self {
            rows,
            cols,
            transform,
            crs,
        }
    }

    /// The grid of an existing raster
    pub fn of<T: RasterElement>(raster: &Raster<T>) -> Self {
        raster.grid_spec()
    }

    /// Shape as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Geographic bounds (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.cols, self.rows)
    }
}
