//! Raster masking by vector boundaries
//!
//! Crops a raster to the combined envelope of a set of boundary
//! geometries and blanks every cell whose centre falls outside all of
//! them. Line and point shapes keep the cells they pass through.

use crate::coverage::{self, Span};
use crate::maybe_rayon::*;
use geo::BoundingRect;
use geo_types::{Geometry, Rect};
use mcda_core::{Algorithm, Error, Raster, RasterElement, Result};
use ndarray::{s, Array2};

/// Parameters for masking
#[derive(Debug, Clone)]
pub struct MaskParams {
    /// Crop the output to the geometries' envelope (default: true)
    pub crop: bool,
    /// Value written outside the geometries. `None` uses the raster's
    /// nodata value, or zero when the raster has none.
    pub fill: Option<f64>,
}

impl Default for MaskParams {
    fn default() -> Self {
        Self {
            crop: true,
            fill: None,
        }
    }
}

/// Mask algorithm
#[derive(Debug, Clone, Default)]
pub struct Mask;

impl Algorithm for Mask {
    type Input = (Raster<f64>, Vec<Geometry<f64>>);
    type Output = Raster<f64>;
    type Params = MaskParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Mask"
    }

    fn description(&self) -> &'static str {
        "Crop a raster to boundary geometries and blank cells outside them"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        let (raster, shapes) = input;
        mask(&raster, &shapes, &params)
    }
}

/// Mask `raster` with `shapes`.
///
/// With `crop`, the output covers the smallest whole-pixel window of the
/// input that contains the shapes' envelope, and its transform is shifted
/// accordingly. CRS and nodata metadata are carried over unchanged.
///
/// Fails when there are no shapes or when they do not overlap the raster.
pub fn mask<T: RasterElement>(raster: &Raster<T>, shapes: &[Geometry<f64>], params: &MaskParams) -> Result<Raster<T>> {
    let envelope = shapes
        .iter()
        .filter_map(|g| g.bounding_rect())
        .reduce(|a, b| {
            Rect::new(
                (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
                (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
            )
        })
        .ok_or_else(|| Error::Algorithm("mask needs at least one non-empty geometry".to_string()))?;

    let window = envelope_window(raster, &envelope)
        .ok_or_else(|| Error::Algorithm("input shapes do not overlap raster".to_string()))?;

    let source = if params.crop {
        let (row_off, col_off, rows, cols) = window;
        raster.crop(row_off, col_off, rows, cols)?
    } else {
        raster.clone()
    };

    let sentinel = match params.fill {
        Some(v) => T::from_f64_saturating(v),
        None => raster.nodata().unwrap_or_else(T::zero),
    };

    let (rows, cols) = source.shape();
    let transform = *source.transform();
    let covered: Vec<Vec<Span>> = (0..shapes.len())
        .into_par_iter()
        .map(|i| coverage::spans(&shapes[i], &transform, (rows, cols), false))
        .collect();
    let mut inside = Array2::from_elem((rows, cols), false);
    for span in covered.iter().flatten() {
        inside.slice_mut(s![span.row, span.start..span.end]).fill(true);
    }

    let data: Vec<T> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![sentinel; cols];
            for (col, cell) in row_data.iter_mut().enumerate() {
                if inside[(row, col)] {
                    *cell = unsafe { source.get_unchecked(row, col) };
                }
            }
            row_data
        })
        .collect();

    let mut output = source;
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;

    Ok(output)
}

/// Pixel window `(row_off, col_off, rows, cols)` covering `envelope`,
/// clamped to the raster. `None` when they do not overlap.
fn envelope_window<T: RasterElement>(raster: &Raster<T>, envelope: &Rect<f64>) -> Option<(usize, usize, usize, usize)> {
    let (c0, r0, c1, r1) = raster
        .transform()
        .pixel_extent(envelope.min().x, envelope.min().y, envelope.max().x, envelope.max().y);
    if !(c0.is_finite() && r0.is_finite() && c1.is_finite() && r1.is_finite()) {
        return None;
    }

    let (rows, cols) = raster.shape();
    if c1 < 0.0 || r1 < 0.0 || c0 > cols as f64 || r0 > rows as f64 {
        return None;
    }

    // Edges that land on a cell boundary up to rounding noise stay on it
    let snap = |v: f64| if (v - v.round()).abs() < 1e-6 { v.round() } else { v };
    let col_start = snap(c0).floor().max(0.0) as usize;
    let row_start = snap(r0).floor().max(0.0) as usize;
    // Degenerate envelopes (a point, a straight line) still get one cell
    let col_end = (snap(c1).ceil() as usize).max(col_start + 1).min(cols);
    let row_end = (snap(r1).ceil() as usize).max(row_start + 1).min(rows);

    (col_start < col_end && row_start < row_end).then(|| {
        (row_start, col_start, row_end - row_start, col_end - col_start)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo_types::{polygon, Point};
    use mcda_core::{GeoTransform, CRS};

    fn ramp() -> Raster<f64> {
        // 10x10, x in [0, 10], y in [0, 10], value = row * 10 + col
        let mut r = Raster::from_vec((0..100).map(|v| v as f64).collect(), 10, 10).unwrap();
        r.set_transform(GeoTransform::new(0.0, 10.0, 1.0, -1.0));
        r.set_crs(Some(CRS::wgs84()));
        r
    }

    fn triangle() -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: 2.0, y: 2.0),
            (x: 6.0, y: 2.0),
            (x: 2.0, y: 6.0),
            (x: 2.0, y: 2.0),
        ])
    }

    #[test]
    fn test_crop_to_envelope() {
        let out = mask(&ramp(), &[triangle()], &MaskParams::default()).unwrap();

        assert_eq!(out.shape(), (4, 4));
        let (min_x, min_y, max_x, max_y) = out.bounds();
        assert_relative_eq!(min_x, 2.0);
        assert_relative_eq!(min_y, 2.0);
        assert_relative_eq!(max_x, 6.0);
        assert_relative_eq!(max_y, 6.0);
        assert_eq!(out.crs(), Some(&CRS::wgs84()));
    }

    #[test]
    fn test_outside_cells_get_sentinel() {
        let out = mask(&ramp(), &[triangle()], &MaskParams::default()).unwrap();

        // Bottom-left cell of the window (row 7, col 2 in the source) is inside
        assert_eq!(out.get(3, 0).unwrap(), 72.0);
        // Top-right corner of the window is outside the triangle
        assert_eq!(out.get(0, 3).unwrap(), 0.0);
        assert_eq!(out.nodata(), None);
    }

    #[test]
    fn test_sentinel_uses_raster_nodata() {
        let mut raster = ramp();
        raster.set_nodata(Some(-1.0));
        let out = mask(&raster, &[triangle()], &MaskParams::default()).unwrap();

        assert_eq!(out.get(0, 3).unwrap(), -1.0);
        assert_eq!(out.nodata(), Some(-1.0));
    }

    #[test]
    fn test_without_crop_keeps_extent() {
        let params = MaskParams {
            crop: false,
            fill: Some(-5.0),
        };
        let out = Mask.execute((ramp(), vec![triangle()]), params).unwrap();

        assert_eq!(out.shape(), (10, 10));
        assert_eq!(out.get(0, 0).unwrap(), -5.0);
        assert_eq!(out.get(7, 2).unwrap(), 72.0);
    }

    #[test]
    fn test_envelope_clamped_to_raster() {
        let wide = Geometry::Polygon(polygon![
            (x: -5.0, y: -5.0),
            (x: 3.0, y: -5.0),
            (x: 3.0, y: 3.0),
            (x: -5.0, y: 3.0),
            (x: -5.0, y: -5.0),
        ]);
        let out = mask(&ramp(), &[wide], &MaskParams::default()).unwrap();
        assert_eq!(out.shape(), (3, 3));
        assert_eq!(out.get(2, 0).unwrap(), 90.0);
    }

    #[test]
    fn test_overlapping_shapes_are_unioned() {
        let left = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 6.0, y: 0.0),
            (x: 6.0, y: 10.0),
            (x: 0.0, y: 10.0),
            (x: 0.0, y: 0.0),
        ]);
        let right = Geometry::Polygon(polygon![
            (x: 4.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 4.0, y: 10.0),
            (x: 4.0, y: 0.0),
        ]);
        let params = MaskParams {
            crop: false,
            fill: Some(-1.0),
        };
        let out = mask(&ramp(), &[left, right], &params).unwrap();
        assert!(out.data().iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_large_raster_masks_outside_ring() {
        let size = 2000;
        let mut raster: Raster<f32> = Raster::filled(size, size, 1.0);
        raster.set_transform(GeoTransform::new(0.0, size as f64, 1.0, -1.0));
        let diamond = Geometry::Polygon(polygon![
            (x: 1000.0, y: 0.0),
            (x: 2000.0, y: 1000.0),
            (x: 1000.0, y: 2000.0),
            (x: 0.0, y: 1000.0),
            (x: 1000.0, y: 0.0),
        ]);
        let params = MaskParams {
            crop: true,
            fill: Some(0.0),
        };
        let out = mask(&raster, &[diamond], &params).unwrap();

        assert_eq!(out.shape(), (size, size));
        assert_eq!(out.get(1000, 1000).unwrap(), 1.0);
        assert_eq!(out.get(0, 0).unwrap(), 0.0);
        assert_eq!(out.get(size - 1, size - 1).unwrap(), 0.0);
        // half the cells, give or take centres on the edges
        let kept = out.data().iter().filter(|&&v| v == 1.0).count() as f64;
        assert!((kept / (size * size) as f64 - 0.5).abs() < 0.005, "{kept}");
    }

    #[test]
    fn test_disjoint_shapes_rejected() {
        let far = Geometry::Point(Point::new(100.0, 100.0));
        assert!(mask(&ramp(), &[far], &MaskParams::default()).is_err());
        assert!(mask(&ramp(), &[], &MaskParams::default()).is_err());
    }
}
