//! File-level stages.
//!
//! Each stage reads its inputs from disk, runs one algorithm from
//! `mcda-algorithms` and writes a sibling output. They are synchronous and
//! run on the blocking pool when driven by [`crate::McdaPipeline`].

use crate::error::{PipelineError, Result, Stage};
use mcda_algorithms::conversion::{rasterize, RasterizeParams};
use mcda_algorithms::mask::{mask, MaskParams};
use mcda_algorithms::overlay::weighted_overlay;
use mcda_algorithms::vector::{buffer_layer, BufferParams};
use mcda_core::io::{
    primary_files, read_geotiff, read_geotiff_data_type, read_vector_layer, write_geotiff, write_vector_layer,
    DataType, GeoTiffOptions,
};
use mcda_core::{GridSpec, Raster};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, instrument};

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string())
}

/// Buffer the dataset at `primary` by `distance` and write
/// `<out_dir>/<stem>_buffered.*`.
///
/// Returns every file of the written dataset.
#[instrument(skip_all, fields(stage = "buffer", input = %primary.display()))]
pub fn buffer_dataset(primary: &Path, out_dir: &Path, distance: f64) -> Result<Vec<PathBuf>> {
    let start = Instant::now();
    let layer = read_vector_layer(primary).map_err(|e| PipelineError::core(Stage::Buffer, e))?;

    let params = BufferParams {
        distance,
        ..Default::default()
    };
    let buffered = buffer_layer(layer, &params).map_err(|e| PipelineError::core(Stage::Buffer, e))?;

    let output = out_dir.join(format!("{}_buffered.shp", file_stem(primary)));
    let files = write_vector_layer(&buffered, &output).map_err(|e| PipelineError::core(Stage::Buffer, e))?;

    info!(
        features = buffered.len(),
        output = %output.display(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "buffered layer"
    );
    Ok(files)
}

/// Rasterize the vector dataset among `paths` onto the grid of `reference`
/// and write `<stem>_rasterized.tif` next to it.
///
/// Feature `i` is burned as `i` with all-touched semantics over a −99999
/// fill. The file is stored as 8-bit unsigned, so the fill saturates to 0
/// and IDs above 255 to 255. No nodata tag is written since the fill has
/// no 8-bit representation.
#[instrument(skip_all, fields(stage = "rasterize", reference = %reference.display()))]
pub fn rasterize_dataset(paths: &[PathBuf], reference: &Path) -> Result<PathBuf> {
    let start = Instant::now();
    let primary = primary_files(paths)
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::MissingPrimaryFile {
            inputs: paths.to_vec(),
        })?;

    let mut layer = read_vector_layer(&primary).map_err(|e| PipelineError::core(Stage::Rasterize, e))?;
    layer.ensure_crs();

    let reference_raster: Raster<f64> =
        read_geotiff(reference, None).map_err(|e| PipelineError::core(Stage::Rasterize, e))?;
    let grid = GridSpec::of(&reference_raster);

    let mut burned = rasterize(&layer, &grid, &RasterizeParams::default())
        .map_err(|e| PipelineError::core(Stage::Rasterize, e))?;
    burned.set_nodata(None);

    let output = primary.with_file_name(format!("{}_rasterized.tif", file_stem(&primary)));
    write_geotiff(&burned, &output, Some(GeoTiffOptions::with_data_type(DataType::UInt8)))
        .map_err(|e| PipelineError::core(Stage::Rasterize, e))?;

    info!(
        features = layer.len(),
        rows = grid.rows,
        cols = grid.cols,
        output = %output.display(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "rasterized layer"
    );
    Ok(output)
}

/// Mask `raster` with the geometries of `boundary`, cropped to their
/// envelope, and write `<stem>_masked.tif` next to it.
///
/// The stored sample type, CRS and nodata of the input are kept.
#[instrument(skip_all, fields(stage = "mask", input = %raster.display()))]
pub fn mask_raster_file(raster: &Path, boundary: &Path) -> Result<PathBuf> {
    let start = Instant::now();
    let boundary_layer = read_vector_layer(boundary).map_err(|e| PipelineError::core(Stage::Mask, e))?;
    let shapes: Vec<_> = boundary_layer.geometries().cloned().collect();

    let data_type = read_geotiff_data_type(raster).map_err(|e| PipelineError::core(Stage::Mask, e))?;
    let source: Raster<f64> = read_geotiff(raster, None).map_err(|e| PipelineError::core(Stage::Mask, e))?;

    let masked = mask(&source, &shapes, &MaskParams::default()).map_err(|e| PipelineError::core(Stage::Mask, e))?;

    let output = raster.with_file_name(format!("{}_masked.tif", file_stem(raster)));
    write_geotiff(&masked, &output, Some(GeoTiffOptions::with_data_type(data_type)))
        .map_err(|e| PipelineError::core(Stage::Mask, e))?;

    info!(
        rows = masked.rows(),
        cols = masked.cols(),
        output = %output.display(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "masked raster"
    );
    Ok(output)
}

/// Weighted sum of aligned rasters; the result takes the grid of the first.
pub fn overlay_rasters(rasters: Vec<Raster<f64>>, weights: &[f64]) -> Result<Raster<f64>> {
    weighted_overlay(&rasters, weights).map_err(|e| PipelineError::core(Stage::Overlay, e))
}
