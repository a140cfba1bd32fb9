//! Buffer -> rasterize -> mask on an in-memory layer, checking the
//! properties each stage hands to the next.

use geo::Area;
use geo_types::{line_string, polygon, Geometry};
use mcda_algorithms::conversion::{rasterize, RasterizeParams, DEFAULT_FILL};
use mcda_algorithms::mask::{mask, MaskParams};
use mcda_algorithms::overlay::weighted_overlay;
use mcda_algorithms::vector::{buffer_geometry, buffer_layer, BufferParams};
use mcda_core::{Feature, GeoTransform, GridSpec, Raster, VectorLayer, CRS};

/// 100 x 100 cells of 0.001 degrees starting at (82.0, 28.1)
fn reference_grid() -> GridSpec {
    GridSpec::new(
        100,
        100,
        GeoTransform::new(82.0, 28.1, 0.001, -0.001),
        Some(CRS::wgs84()),
    )
}

fn river_layer() -> VectorLayer {
    let mut layer = VectorLayer::new(None);
    layer.push(Feature::new(Geometry::LineString(line_string![
        (x: 82.01, y: 28.05),
        (x: 82.09, y: 28.05),
    ])));
    layer.push(Feature::new(Geometry::LineString(line_string![
        (x: 82.05, y: 28.01),
        (x: 82.05, y: 28.09),
    ])));
    layer
}

fn aoi() -> Geometry<f64> {
    Geometry::Polygon(polygon![
        (x: 82.02, y: 28.02),
        (x: 82.06, y: 28.02),
        (x: 82.06, y: 28.06),
        (x: 82.02, y: 28.06),
        (x: 82.02, y: 28.02),
    ])
}

#[test]
fn buffered_area_never_shrinks() {
    let params = BufferParams::default();
    let g = aoi();
    assert!(buffer_geometry(&g, &params).unsigned_area() >= g.unsigned_area());
}

#[test]
fn chain_preserves_grid_and_crops_to_aoi() {
    let buffered = buffer_layer(river_layer(), &BufferParams::default()).unwrap();
    assert_eq!(buffered.crs, Some(CRS::wgs84()));

    let grid = reference_grid();
    let burned = rasterize(&buffered, &grid, &RasterizeParams::default()).unwrap();
    assert_eq!(GridSpec::of(&burned), grid);

    // Crossing point: the later feature (ID 1) wins
    let (col, row) = grid.transform.geo_to_pixel(82.0505, 28.0505);
    assert_eq!(burned.get(row as usize, col as usize).unwrap(), 1.0);

    // Stored as 8-bit: the fill collapses to 0, IDs survive
    let stored: Raster<u8> = burned.convert();
    assert_eq!(stored.get(0, 0).unwrap(), 0);
    assert_eq!(stored.get(row as usize, col as usize).unwrap(), 1);

    let masked = mask(&stored, &[aoi()], &MaskParams::default()).unwrap();
    assert_eq!(masked.shape(), (40, 40));
    let (min_x, min_y, max_x, max_y) = masked.bounds();
    assert!((min_x - 82.02).abs() < 1e-9 && (max_x - 82.06).abs() < 1e-9);
    assert!((min_y - 28.02).abs() < 1e-9 && (max_y - 28.06).abs() < 1e-9);
    assert!(masked.rows() <= grid.rows && masked.cols() <= grid.cols);
}

#[test]
fn fill_sentinel_is_float_before_narrowing() {
    let burned = rasterize(&VectorLayer::new(Some(CRS::wgs84())), &reference_grid(), &RasterizeParams::default()).unwrap();
    assert!(burned.data().iter().all(|&v| v == DEFAULT_FILL));
}

#[test]
fn overlay_of_masked_layers() {
    let grid = reference_grid();
    let a = Raster::from_grid(&grid, 1.0f64);
    let b = Raster::from_grid(&grid, 2.0f64);
    let c = Raster::from_grid(&grid, 4.0f64);

    let out = weighted_overlay(&[a, b, c], &[0.5, 0.25, 0.25]).unwrap();
    assert_eq!(GridSpec::of(&out), grid);
    assert!(out.data().iter().all(|&v| (v - 2.0).abs() < 1e-12));
}
