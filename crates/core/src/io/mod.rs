//! I/O operations for reading and writing geospatial data

mod geotiff;
mod shp;

pub use geotiff::{
    read_geotiff, read_geotiff_data_type, read_geotiff_from_buffer, write_geotiff, write_geotiff_to_buffer, DataType,
    GeoTiffOptions,
};
pub use shp::{
    companion_paths, primary_files, read_vector_layer, verify_dataset, write_vector_layer,
    DATASET_EXTENSIONS,
};
