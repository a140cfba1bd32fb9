//! File-level I/O tests: GeoTIFF georeferencing and shapefile datasets
//! written to a scratch directory and read back.

use geo_types::{polygon, Geometry};
use mcda_core::io::{
    read_geotiff, read_vector_layer, write_geotiff, write_vector_layer, DataType, GeoTiffOptions,
};
use mcda_core::{Feature, GeoTransform, GridSpec, Raster, VectorLayer, CRS};
use std::fs;

fn reference_grid() -> GridSpec {
    GridSpec::new(
        20,
        30,
        GeoTransform::new(82.2, 28.2, 0.001, -0.001),
        Some(CRS::wgs84()),
    )
}

// ---------------------------------------------------------------------------
// GeoTIFF
// ---------------------------------------------------------------------------

#[test]
fn geotiff_grid_survives_every_sample_type() {
    let dir = tempfile::tempdir().unwrap();
    let mut raster = Raster::from_grid(&reference_grid(), 2.0f64);
    raster.set(4, 7, 9.0).unwrap();

    for (name, data_type) in [
        ("u8.tif", DataType::UInt8),
        ("f32.tif", DataType::Float32),
        ("f64.tif", DataType::Float64),
    ] {
        let path = dir.path().join(name);
        write_geotiff(&raster, &path, Some(GeoTiffOptions::with_data_type(data_type))).unwrap();

        let back: Raster<f64> = read_geotiff(&path, None).unwrap();
        assert_eq!(GridSpec::of(&back).shape(), (20, 30), "{name}");
        assert_eq!(back.transform(), raster.transform(), "{name}");
        assert_eq!(back.crs().and_then(|c| c.epsg()), Some(4326), "{name}");
        assert_eq!(back.get(4, 7).unwrap(), 9.0, "{name}");
    }
}

#[test]
fn geotiff_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.tif");
    fs::write(&path, b"not a tiff").unwrap();

    let err = read_geotiff::<f32, _>(&path, None).unwrap_err();
    assert!(err.is_format());
}

// ---------------------------------------------------------------------------
// Shapefile
// ---------------------------------------------------------------------------

fn square_layer(crs: Option<CRS>) -> VectorLayer {
    let mut layer = VectorLayer::new(crs);
    layer.push(Feature::new(Geometry::Polygon(polygon![
        (x: 82.21, y: 28.19),
        (x: 82.22, y: 28.19),
        (x: 82.22, y: 28.18),
        (x: 82.21, y: 28.18),
        (x: 82.21, y: 28.19),
    ])));
    layer
}

#[test]
fn shapefile_without_prj_reads_with_unset_crs() {
    let dir = tempfile::tempdir().unwrap();
    let shp = dir.path().join("river.shp");
    write_vector_layer(&square_layer(Some(CRS::wgs84())), &shp).unwrap();
    fs::remove_file(shp.with_extension("prj")).unwrap();

    let mut layer = read_vector_layer(&shp).unwrap();
    assert!(layer.crs.is_none());
    assert!(layer.ensure_crs());
    assert_eq!(layer.crs.as_ref().and_then(|c| c.epsg()), Some(4326));
}

#[test]
fn shapefile_without_dbf_reads_geometry_only() {
    let dir = tempfile::tempdir().unwrap();
    let shp = dir.path().join("road.shp");
    write_vector_layer(&square_layer(Some(CRS::wgs84())), &shp).unwrap();
    fs::remove_file(shp.with_extension("dbf")).unwrap();

    let layer = read_vector_layer(&shp).unwrap();
    assert_eq!(layer.len(), 1);
    assert!(layer.fields.is_empty());
    assert!(layer.features[0].properties.is_empty());
}

#[test]
fn shapefile_projected_crs_needs_wkt() {
    let dir = tempfile::tempdir().unwrap();
    let shp = dir.path().join("settlement.shp");

    let err = write_vector_layer(&square_layer(Some(CRS::from_epsg(32644))), &shp).unwrap_err();
    assert!(err.is_format());
}
