//! Native GeoTIFF reading/writing via the `tiff` crate.
//!
//! Single-band GeoTIFF is the only raster format the pipeline exchanges.
//! Georeferencing is carried in the standard GeoTIFF tags:
//! ModelPixelScale (33550) + ModelTiepoint (33922) or ModelTransformation
//! (34264) for the affine transform, GeoKeyDirectory (34735) for the EPSG
//! code, and GDAL_NODATA (42113) for the nodata sentinel.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use num_traits::NumCast;
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{ColorType, Gray32Float, Gray64Float, Gray8};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKindStandard, TiffValue};
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const USER_DEFINED: u16 = 32767;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Sample type stored in the output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    /// 8-bit unsigned; values are narrowed with a saturating cast
    UInt8,
    #[default]
    Float32,
    Float64,
}

/// Options for writing GeoTIFF files
#[derive(Debug, Clone, Default)]
pub struct GeoTiffOptions {
    pub data_type: DataType,
}

impl GeoTiffOptions {
    pub fn with_data_type(data_type: DataType) -> Self {
        Self { data_type }
    }
}

/// Read one band of a GeoTIFF file into a Raster
///
/// `band` is 1-indexed and defaults to 1.
pub fn read_geotiff<T, P>(path: P, band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    decode_geotiff(file, band)
}

/// Read one band of an in-memory GeoTIFF into a Raster
///
/// Used for artifacts fetched over HTTP, which never touch the filesystem.
pub fn read_geotiff_from_buffer<T>(data: &[u8], band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
{
    decode_geotiff(Cursor::new(data), band)
}

/// Stored sample type of a GeoTIFF file, for writing derived rasters back
/// in the same type.
///
/// 8-bit samples map to `UInt8`, 64-bit to `Float64`; every other layout
/// is written back as `Float32`.
pub fn read_geotiff_data_type(path: impl AsRef<Path>) -> Result<DataType> {
    let file = File::open(path.as_ref())?;
    let mut decoder = Decoder::new(file).map_err(|e| Error::GeoTiff(format!("TIFF decode error: {}", e)))?;
    let color = decoder
        .colortype()
        .map_err(|e| Error::GeoTiff(format!("Cannot read color type: {}", e)))?;

    Ok(match color {
        tiff::ColorType::Gray(8) => DataType::UInt8,
        tiff::ColorType::Gray(64) => DataType::Float64,
        _ => DataType::Float32,
    })
}

fn decode_geotiff<T, R>(reader: R, band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
    R: Read + Seek,
{
    let mut decoder = Decoder::new(reader)
        .map_err(|e| Error::GeoTiff(format!("TIFF decode error: {}", e)))?
        .with_limits(Limits::unlimited());

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::GeoTiff(format!("Cannot read dimensions: {}", e)))?;

    let rows = height as usize;
    let cols = width as usize;

    let result = decoder
        .read_image()
        .map_err(|e| Error::GeoTiff(format!("Cannot read image data: {}", e)))?;

    let band = band.unwrap_or(1);
    let data: Vec<T> = match result {
        DecodingResult::U8(buf) => select_band(&buf, band, rows, cols)?,
        DecodingResult::U16(buf) => select_band(&buf, band, rows, cols)?,
        DecodingResult::U32(buf) => select_band(&buf, band, rows, cols)?,
        DecodingResult::I8(buf) => select_band(&buf, band, rows, cols)?,
        DecodingResult::I16(buf) => select_band(&buf, band, rows, cols)?,
        DecodingResult::I32(buf) => select_band(&buf, band, rows, cols)?,
        DecodingResult::F32(buf) => select_band(&buf, band, rows, cols)?,
        DecodingResult::F64(buf) => select_band(&buf, band, rows, cols)?,
        _ => return Err(Error::UnsupportedDataType("Unsupported TIFF pixel format".to_string())),
    };

    let mut raster = Raster::from_vec(data, rows, cols)?;

    if let Some(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    raster.set_crs(read_crs(&mut decoder));
    raster.set_nodata(read_nodata(&mut decoder).and_then(num_traits::cast));

    Ok(raster)
}

/// De-interleave pixel-interleaved samples and keep `band` (1-indexed).
fn select_band<S, T>(buf: &[S], band: usize, rows: usize, cols: usize) -> Result<Vec<T>>
where
    S: NumCast + Copy,
    T: RasterElement,
{
    let cells = rows * cols;
    if cells == 0 || buf.len() % cells != 0 {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }
    let bands = buf.len() / cells;
    if band == 0 || band > bands {
        return Err(Error::InvalidParameter {
            name: "band",
            value: band.to_string(),
            reason: format!("raster has {} band(s)", bands),
        });
    }

    Ok(buf
        .iter()
        .skip(band - 1)
        .step_by(bands)
        .map(|&v| num_traits::cast(v).unwrap_or(T::default_nodata()))
        .collect())
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(tag(MODEL_PIXEL_SCALE)).ok();
    let tiepoint = decoder.get_tag_f64_vec(tag(MODEL_TIEPOINT)).ok();

    if let (Some(scale), Some(tiepoint)) = (&scale, &tiepoint) {
        if scale.len() >= 2 && tiepoint.len() >= 6 {
            // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
            let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
            let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
            return Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]));
        }
    }

    // Row-major 4x4 matrix
    let t = decoder.get_tag_f64_vec(tag(MODEL_TRANSFORMATION)).ok()?;
    if t.len() >= 16 {
        return Some(GeoTransform {
            origin_x: t[3],
            origin_y: t[7],
            pixel_width: t[0],
            pixel_height: t[5],
            row_rotation: t[1],
            col_rotation: t[4],
        });
    }

    None
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<CRS> {
    let keys = decoder.get_tag_u16_vec(tag(GEO_KEY_DIRECTORY)).ok()?;
    // [version, revision, minor, count, (key_id, location, count, value)*]
    if keys.len() < 4 {
        return None;
    }
    let count = keys[3] as usize;

    keys[4..]
        .chunks_exact(4)
        .take(count)
        .find_map(|entry| match (entry[0], entry[1], entry[3]) {
            (GEOGRAPHIC_TYPE_KEY | PROJECTED_CS_TYPE_KEY, 0, code)
                if code > 0 && code != USER_DEFINED =>
            {
                Some(CRS::from_epsg(code as u32))
            }
            _ => None,
        })
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    decoder
        .get_tag_ascii_string(tag(GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim_end_matches('\0').trim().parse::<f64>().ok())
}

/// Write a Raster to a GeoTIFF file
///
/// The stored sample type is chosen by `options.data_type` (Float32 when
/// no options are given), independent of `T`.
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P, options: Option<GeoTiffOptions>) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    encode_geotiff(raster, &mut writer, options.unwrap_or_default())?;
    writer.flush()?;
    Ok(())
}

/// Write a Raster to an in-memory GeoTIFF buffer
pub fn write_geotiff_to_buffer<T>(raster: &Raster<T>, options: Option<GeoTiffOptions>) -> Result<Vec<u8>>
where
    T: RasterElement,
{
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf), options.unwrap_or_default())?;
    Ok(buf)
}

fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W, options: GeoTiffOptions) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
{
    let mut encoder =
        TiffEncoder::new(writer).map_err(|e| Error::GeoTiff(format!("TIFF encoder error: {}", e)))?;

    let as_f64 = |v: T| v.to_f64().unwrap_or(f64::NAN);
    let nodata = raster.nodata().map(as_f64);

    match options.data_type {
        DataType::UInt8 => {
            let data: Vec<u8> = raster.data().iter().map(|&v| u8::from_f64_saturating(as_f64(v))).collect();
            let nodata = nodata.map(|nd| u8::from_f64_saturating(nd) as f64);
            encode_band::<Gray8, _, T>(&mut encoder, raster, nodata, &data)
        }
        DataType::Float32 => {
            let data: Vec<f32> = raster.data().iter().map(|&v| as_f64(v) as f32).collect();
            encode_band::<Gray32Float, _, T>(&mut encoder, raster, nodata, &data)
        }
        DataType::Float64 => {
            let data: Vec<f64> = raster.data().iter().map(|&v| as_f64(v)).collect();
            encode_band::<Gray64Float, _, T>(&mut encoder, raster, nodata, &data)
        }
    }
}

fn encode_band<C, W, T>(
    encoder: &mut TiffEncoder<W>,
    raster: &Raster<T>,
    nodata: Option<f64>,
    data: &[C::Inner],
) -> Result<()>
where
    C: ColorType,
    [C::Inner]: TiffValue,
    W: Write + Seek,
    T: RasterElement,
{
    let (rows, cols) = raster.shape();
    let mut image = encoder
        .new_image::<C>(cols as u32, rows as u32)
        .map_err(|e| Error::GeoTiff(format!("Cannot create TIFF image: {}", e)))?;

    write_geo_tags(image.encoder(), raster.transform(), raster.crs(), nodata)
        .map_err(|e| Error::GeoTiff(format!("Cannot write GeoTIFF tags: {}", e)))?;

    image
        .write_data(data)
        .map_err(|e| Error::GeoTiff(format!("Cannot write image data: {}", e)))
}

fn write_geo_tags<W: Write + Seek>(
    dir: &mut DirectoryEncoder<'_, W, TiffKindStandard>,
    gt: &GeoTransform,
    crs: Option<&CRS>,
    nodata: Option<f64>,
) -> tiff::TiffResult<()> {
    if gt.row_rotation == 0.0 && gt.col_rotation == 0.0 {
        let scale = [gt.pixel_width, -gt.pixel_height, 0.0];
        dir.write_tag(tag(MODEL_PIXEL_SCALE), &scale[..])?;
        let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
        dir.write_tag(tag(MODEL_TIEPOINT), &tiepoint[..])?;
    } else {
        let matrix = [
            gt.pixel_width, gt.row_rotation, 0.0, gt.origin_x,
            gt.col_rotation, gt.pixel_height, 0.0, gt.origin_y,
            0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        dir.write_tag(tag(MODEL_TRANSFORMATION), &matrix[..])?;
    }

    dir.write_tag(tag(GEO_KEY_DIRECTORY), &geo_keys(crs)[..])?;

    if let Some(nd) = nodata {
        let text = format_nodata(nd);
        dir.write_tag(tag(GDAL_NODATA), text.as_str())?;
    }
    Ok(())
}

/// GeoKeyDirectory payload: model type, PixelIsArea, and the EPSG key when known.
fn geo_keys(crs: Option<&CRS>) -> Vec<u16> {
    let geographic = crs.map(|c| c.is_geographic()).unwrap_or(false);
    let mut keys: Vec<[u16; 4]> = vec![
        [GT_MODEL_TYPE_KEY, 0, 1, if geographic { 2 } else { 1 }],
        [GT_RASTER_TYPE_KEY, 0, 1, 1],
    ];
    if let Some(code) = crs.and_then(|c| c.epsg()).and_then(|c| u16::try_from(c).ok()) {
        let key = if geographic { GEOGRAPHIC_TYPE_KEY } else { PROJECTED_CS_TYPE_KEY };
        keys.push([key, 0, 1, code]);
    }

    let mut out = vec![1, 1, 0, keys.len() as u16];
    out.extend(keys.into_iter().flatten());
    out
}

fn format_nodata(nd: f64) -> String {
    if nd.is_nan() {
        "nan".to_string()
    } else if nd.fract() == 0.0 && nd.abs() < 1e15 {
        format!("{}", nd as i64)
    } else {
        format!("{}", nd)
    }
}
