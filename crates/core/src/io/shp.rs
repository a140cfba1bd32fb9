//! ESRI shapefile reading/writing via the `shapefile` crate.
//!
//! A shapefile dataset is a set of sibling files sharing one stem. Reading
//! needs only `.shp`; writing always produces `.shp`, `.shx`, `.dbf`, `.prj`
//! and `.cpg` and verifies that all five exist afterwards.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::vector::{AttributeValue, Feature, VectorLayer};
use geo_types::Geometry;
use shapefile::dbase::{self, FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::record::EsriShape;
use shapefile::{Shape, ShapeReader, Writer};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extensions of a complete dataset, primary file first
pub const DATASET_EXTENSIONS: [&str; 5] = ["shp", "shx", "dbf", "prj", "cpg"];

const ENCODING: &str = "UTF-8";
const MAX_FIELD_NAME: usize = 10;
const CHARACTER_WIDTH: u8 = 254;

fn shp_error(path: &Path, reason: impl ToString) -> Error {
    Error::Shapefile {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Paths of every file in the dataset whose primary file is `shp`, in
/// [`DATASET_EXTENSIONS`] order.
pub fn companion_paths(shp: &Path) -> Vec<PathBuf> {
    DATASET_EXTENSIONS
        .iter()
        .map(|ext| shp.with_extension(ext))
        .collect()
}

/// Check that every companion of `shp` exists, returning them in order.
pub fn verify_dataset(shp: &Path) -> Result<Vec<PathBuf>> {
    let paths = companion_paths(shp);
    let missing: Vec<PathBuf> = paths.iter().filter(|p| !p.is_file()).cloned().collect();
    if missing.is_empty() {
        Ok(paths)
    } else {
        Err(Error::IncompleteDataset {
            stem: shp
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            missing,
        })
    }
}

/// Read a shapefile dataset into a [`VectorLayer`].
///
/// Null shapes become features without geometry, so feature `i` is always
/// record `i`. A missing `.dbf` yields features without attributes; a
/// missing `.prj` leaves the CRS unset.
pub fn read_vector_layer(path: impl AsRef<Path>) -> Result<VectorLayer> {
    let path = path.as_ref();

    let shapes = ShapeReader::from_path(path)
        .and_then(|reader| reader.read())
        .map_err(|e| shp_error(path, e))?;

    let dbf = path.with_extension("dbf");
    let (fields, records) = if dbf.is_file() {
        let mut reader = dbase::Reader::from_path(&dbf).map_err(|e| shp_error(&dbf, e))?;
        let fields: Vec<String> = reader
            .fields()
            .iter()
            .map(|f| f.name().to_string())
            .filter(|name| name != "DeletionFlag")
            .collect();
        let records = reader.read().map_err(|e| shp_error(&dbf, e))?;
        (fields, Some(records))
    } else {
        (Vec::new(), None)
    };

    if let Some(records) = &records {
        if records.len() != shapes.len() {
            return Err(shp_error(
                path,
                format!("{} shapes but {} attribute records", shapes.len(), records.len()),
            ));
        }
    }

    let prj = path.with_extension("prj");
    let crs = if prj.is_file() {
        let wkt = fs::read_to_string(&prj)?;
        let wkt = wkt.trim();
        (!wkt.is_empty()).then(|| CRS::from_wkt(wkt))
    } else {
        None
    };

    let mut layer = VectorLayer::new(crs);
    layer.fields = fields;

    let mut records = records.map(Vec::into_iter);
    for (index, shape) in shapes.into_iter().enumerate() {
        let record = records.as_mut().and_then(Iterator::next);
        // null shapes keep their row so ids stay aligned with record order
        let geometry = match shape {
            Shape::NullShape => None,
            shape => Some(Geometry::<f64>::try_from(shape).map_err(|e| shp_error(path, e))?),
        };

        let mut feature = Feature {
            geometry,
            properties: Default::default(),
            id: Some(index.to_string()),
        };
        if let Some(record) = record {
            for name in &layer.fields {
                if let Some(value) = record.get(name) {
                    feature.set_property(name.clone(), attribute_from_dbf(value));
                }
            }
        }
        layer.push(feature);
    }

    debug!(path = %path.display(), features = layer.len(), "read shapefile");
    Ok(layer)
}

fn attribute_from_dbf(value: &FieldValue) -> AttributeValue {
    match value {
        FieldValue::Character(Some(s)) => AttributeValue::String(s.trim_end().to_string()),
        FieldValue::Numeric(Some(v)) => AttributeValue::Float(*v),
        FieldValue::Float(Some(v)) => AttributeValue::Float(*v as f64),
        FieldValue::Logical(Some(b)) => AttributeValue::Bool(*b),
        FieldValue::Integer(i) => AttributeValue::Int(*i as i64),
        FieldValue::Double(v) | FieldValue::Currency(v) => AttributeValue::Float(*v),
        FieldValue::Memo(s) => AttributeValue::String(s.clone()),
        FieldValue::Character(None)
        | FieldValue::Numeric(None)
        | FieldValue::Float(None)
        | FieldValue::Logical(None)
        | FieldValue::Date(None) => AttributeValue::Null,
        other => AttributeValue::String(format!("{:?}", other)),
    }
}

/// Column type of a written attribute table, inferred from the values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Logical,
    Integer,
    Real,
    Text,
}

impl ColumnKind {
    fn infer<'a>(values: impl Iterator<Item = &'a AttributeValue>) -> Self {
        let mut kind: Option<ColumnKind> = None;
        for value in values {
            let this = match value {
                AttributeValue::Null => continue,
                AttributeValue::Bool(_) => ColumnKind::Logical,
                AttributeValue::Int(_) => ColumnKind::Integer,
                AttributeValue::Float(_) => ColumnKind::Real,
                AttributeValue::String(_) => ColumnKind::Text,
            };
            kind = Some(match (kind, this) {
                (None, k) => k,
                (Some(a), b) if a == b => a,
                (Some(ColumnKind::Integer), ColumnKind::Real)
                | (Some(ColumnKind::Real), ColumnKind::Integer) => ColumnKind::Real,
                _ => ColumnKind::Text,
            });
        }
        kind.unwrap_or(ColumnKind::Text)
    }

    fn to_dbf(self, value: Option<&AttributeValue>) -> FieldValue {
        match (self, value) {
            (ColumnKind::Logical, Some(AttributeValue::Bool(b))) => FieldValue::Logical(Some(*b)),
            (ColumnKind::Logical, _) => FieldValue::Logical(None),
            (ColumnKind::Integer, Some(AttributeValue::Int(i))) => FieldValue::Numeric(Some(*i as f64)),
            (ColumnKind::Real, Some(AttributeValue::Int(i))) => FieldValue::Numeric(Some(*i as f64)),
            (ColumnKind::Real, Some(AttributeValue::Float(v))) => FieldValue::Numeric(Some(*v)),
            (ColumnKind::Integer | ColumnKind::Real, _) => FieldValue::Numeric(None),
            (ColumnKind::Text, None | Some(AttributeValue::Null)) => FieldValue::Character(None),
            (ColumnKind::Text, Some(AttributeValue::String(s))) => FieldValue::Character(Some(s.clone())),
            (ColumnKind::Text, Some(other)) => FieldValue::Character(Some(attribute_text(other))),
        }
    }
}

fn attribute_text(value: &AttributeValue) -> String {
    match value {
        AttributeValue::Null => String::new(),
        AttributeValue::Bool(b) => b.to_string(),
        AttributeValue::Int(i) => i.to_string(),
        AttributeValue::Float(v) => v.to_string(),
        AttributeValue::String(s) => s.clone(),
    }
}

/// Shape family of a written dataset; a shapefile holds a single family.
enum ShapeFamily {
    Point(Vec<shapefile::Point>),
    Multipoint(Vec<shapefile::Multipoint>),
    Polyline(Vec<shapefile::Polyline>),
    Polygon(Vec<shapefile::Polygon>),
}

impl ShapeFamily {
    fn collect<'a>(path: &Path, geometries: impl Iterator<Item = &'a Geometry<f64>>) -> Result<Self> {
        let mut family: Option<ShapeFamily> = None;
        for geometry in geometries {
            let entry = family.get_or_insert_with(|| ShapeFamily::for_geometry(geometry));
            entry.push(path, geometry)?;
        }
        Ok(family.unwrap_or(ShapeFamily::Polygon(Vec::new())))
    }

    fn for_geometry(geometry: &Geometry<f64>) -> Self {
        match geometry {
            Geometry::Point(_) => ShapeFamily::Point(Vec::new()),
            Geometry::MultiPoint(_) => ShapeFamily::Multipoint(Vec::new()),
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                ShapeFamily::Polyline(Vec::new())
            }
            _ => ShapeFamily::Polygon(Vec::new()),
        }
    }

    fn push(&mut self, path: &Path, geometry: &Geometry<f64>) -> Result<()> {
        match (self, geometry.clone()) {
            (ShapeFamily::Point(v), Geometry::Point(p)) => v.push(p.into()),
            (ShapeFamily::Multipoint(v), Geometry::MultiPoint(mp)) => v.push(mp.into()),
            (ShapeFamily::Polyline(v), Geometry::Line(l)) => v.push(l.into()),
            (ShapeFamily::Polyline(v), Geometry::LineString(ls)) => v.push(ls.into()),
            (ShapeFamily::Polyline(v), Geometry::MultiLineString(mls)) => v.push(mls.into()),
            (ShapeFamily::Polygon(v), Geometry::Polygon(p)) => v.push(p.into()),
            (ShapeFamily::Polygon(v), Geometry::MultiPolygon(mp)) => v.push(mp.into()),
            (ShapeFamily::Polygon(v), Geometry::Rect(r)) => v.push(r.to_polygon().into()),
            (ShapeFamily::Polygon(v), Geometry::Triangle(t)) => v.push(t.to_polygon().into()),
            (_, other) => {
                return Err(shp_error(
                    path,
                    format!("cannot mix {} with the layer's first geometry type", kind_name(&other)),
                ))
            }
        }
        Ok(())
    }
}

fn kind_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Empty geometries have no shapefile record form other than a null shape.
fn has_parts(geometry: &Geometry<f64>) -> bool {
    match geometry {
        Geometry::LineString(ls) => !ls.0.is_empty(),
        Geometry::Polygon(p) => !p.exterior().0.is_empty(),
        Geometry::MultiPoint(mp) => !mp.0.is_empty(),
        Geometry::MultiLineString(mls) => mls.0.iter().any(|ls| !ls.0.is_empty()),
        Geometry::MultiPolygon(mp) => mp.0.iter().any(|p| !p.exterior().0.is_empty()),
        Geometry::GeometryCollection(gc) => gc.0.iter().any(has_parts),
        _ => true,
    }
}

fn write_shapes<S: EsriShape>(
    path: &Path,
    table: TableWriterBuilder,
    shapes: Vec<S>,
    records: Vec<Record>,
) -> Result<()> {
    let mut writer = Writer::from_path(path, table).map_err(|e| shp_error(path, e))?;
    for (shape, record) in shapes.iter().zip(records.iter()) {
        writer
            .write_shape_and_record(shape, record)
            .map_err(|e| shp_error(path, e))?;
    }
    Ok(())
}

fn field_name(path: &Path, name: &str) -> Result<FieldName> {
    let short: String = name.chars().take(MAX_FIELD_NAME).collect();
    FieldName::try_from(short.as_str())
        .map_err(|e| shp_error(path, format!("invalid field name {:?}: {:?}", name, e)))
}

/// Write `layer` as a complete shapefile dataset at `path` (the `.shp` file).
///
/// Features without geometry, or with an empty one, are not written: the
/// writer has no null shape records. When the layer has no attribute
/// columns an `FID` column numbering the features is written.
/// Returns the dataset's paths in [`DATASET_EXTENSIONS`] order.
pub fn write_vector_layer(layer: &VectorLayer, path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let path = path.as_ref().with_extension("shp");

    let crs = layer.crs.as_ref().ok_or_else(|| Error::InvalidParameter {
        name: "crs",
        value: "unset".to_string(),
        reason: "a layer needs a CRS before it can be written".to_string(),
    })?;
    let wkt = crs.to_wkt()?;

    let features: Vec<&Feature> = layer
        .iter()
        .filter(|f| f.geometry.as_ref().is_some_and(has_parts))
        .collect();

    // (dbf name, source attribute, kind); the FID column has no source
    let mut columns: Vec<(String, Option<&str>, ColumnKind)> = Vec::new();
    if layer.fields.is_empty() {
        columns.push(("FID".to_string(), None, ColumnKind::Integer));
    } else {
        for name in &layer.fields {
            let kind = ColumnKind::infer(features.iter().filter_map(|f| f.get_property(name)));
            let short: String = name.chars().take(MAX_FIELD_NAME).collect();
            columns.push((short, Some(name.as_str()), kind));
        }
    }

    let mut table = TableWriterBuilder::new();
    for (name, _, kind) in &columns {
        let name = field_name(&path, name)?;
        table = match kind {
            ColumnKind::Logical => table.add_logical_field(name),
            ColumnKind::Integer => table.add_numeric_field(name, 18, 0),
            ColumnKind::Real => table.add_numeric_field(name, 24, 15),
            ColumnKind::Text => table.add_character_field(name, CHARACTER_WIDTH),
        };
    }

    let records: Vec<Record> = features
        .iter()
        .enumerate()
        .map(|(index, feature)| {
            let mut record = Record::default();
            for (name, source, kind) in &columns {
                let value = match source {
                    Some(source) => kind.to_dbf(feature.get_property(source)),
                    None => FieldValue::Numeric(Some(index as f64)),
                };
                record.insert(name.clone(), value);
            }
            record
        })
        .collect();

    let geometries = features.iter().filter_map(|f| f.geometry.as_ref());
    match ShapeFamily::collect(&path, geometries)? {
        ShapeFamily::Point(shapes) => write_shapes(&path, table, shapes, records)?,
        ShapeFamily::Multipoint(shapes) => write_shapes(&path, table, shapes, records)?,
        ShapeFamily::Polyline(shapes) => write_shapes(&path, table, shapes, records)?,
        ShapeFamily::Polygon(shapes) => write_shapes(&path, table, shapes, records)?,
    }

    fs::write(path.with_extension("prj"), wkt)?;
    fs::write(path.with_extension("cpg"), ENCODING)?;

    debug!(path = %path.display(), features = features.len(), "wrote shapefile");
    verify_dataset(&path)
}

/// The `.shp` entries of an unordered bag of dataset files.
pub fn primary_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    paths
        .iter()
        .filter(|p| {
            p.extension()
                .map(|e| e.eq_ignore_ascii_case("shp"))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}
