//! Buffer operations
//!
//! Create buffer zones around geometries. For points, generates circles
//! approximated as polygons. For lines and polygons, offsets the boundary.
//!
//! Distances are planar and expressed in the layer's CRS units. On a
//! geographic CRS that means degrees, so the default 0.0038 is an angular
//! distance (roughly 420 m of latitude).

use geo::{Buffer as GeoBuffer, Geometry, LineString, MultiPolygon, Point, Polygon};
use mcda_core::{Algorithm, Error, Result, VectorLayer};
use std::f64::consts::PI;
use tracing::debug;

/// Default buffer distance, in layer units
pub const DEFAULT_BUFFER_DISTANCE: f64 = 0.0038;

/// Default number of segments in a point buffer
pub const DEFAULT_CIRCLE_SEGMENTS: usize = 64;

/// Parameters for buffer operations
#[derive(Debug, Clone)]
pub struct BufferParams {
    /// Buffer distance (positive = expand, negative = shrink)
    pub distance: f64,
    /// Number of segments to approximate point circles (default: 64, i.e.
    /// 16 per quadrant)
    pub segments: usize,
}

impl Default for BufferParams {
    fn default() -> Self {
        Self {
            distance: DEFAULT_BUFFER_DISTANCE,
            segments: DEFAULT_CIRCLE_SEGMENTS,
        }
    }
}

/// Buffer algorithm over a whole layer
#[derive(Debug, Clone, Default)]
pub struct Buffer;

impl Algorithm for Buffer {
    type Input = VectorLayer;
    type Output = VectorLayer;
    type Params = BufferParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Buffer"
    }

    fn description(&self) -> &'static str {
        "Buffer every feature of a layer by a fixed planar distance, defaulting the CRS to EPSG:4326"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        buffer_layer(input, &params)
    }
}

/// Create a circular buffer around a point.
///
/// Generates a polygon approximating a circle with the given number
/// of segments.
pub fn buffer_points(point: &Point<f64>, params: &BufferParams) -> Polygon<f64> {
    let n = params.segments.max(4);
    let r = params.distance.abs();
    let cx = point.x();
    let cy = point.y();

    let mut coords = Vec::with_capacity(n + 1);
    for i in 0..n {
        let angle = 2.0 * PI * i as f64 / n as f64;
        coords.push((cx + r * angle.cos(), cy + r * angle.sin()));
    }
    // Close the ring
    coords.push(coords[0]);

    Polygon::new(LineString::from(coords), vec![])
}

/// Buffer a single geometry.
///
/// Points and multipoints use [`buffer_points`] (a non-positive distance
/// yields an empty result). Everything else is offset with `geo`'s buffer.
pub fn buffer_geometry(geometry: &Geometry<f64>, params: &BufferParams) -> MultiPolygon<f64> {
    match geometry {
        Geometry::Point(p) if params.distance > 0.0 => MultiPolygon::new(vec![buffer_points(p, params)]),
        Geometry::MultiPoint(mp) if params.distance > 0.0 => {
            MultiPolygon::new(mp.iter().map(|p| buffer_points(p, params)).collect())
        }
        Geometry::Point(_) | Geometry::MultiPoint(_) => MultiPolygon::new(vec![]),
        other => other.buffer(params.distance),
    }
}

/// Buffer every feature in `layer`.
///
/// A layer without a CRS gets EPSG:4326 first. Attributes, feature order
/// and the field layout are kept; each geometry becomes a MultiPolygon.
pub fn buffer_layer(mut layer: VectorLayer, params: &BufferParams) -> Result<VectorLayer> {
    if !params.distance.is_finite() {
        return Err(Error::InvalidParameter {
            name: "distance",
            value: params.distance.to_string(),
            reason: "buffer distance must be finite".to_string(),
        });
    }

    if layer.ensure_crs() {
        debug!("layer has no CRS, assuming EPSG:4326");
    }

    for feature in layer.features.iter_mut() {
        if let Some(geometry) = feature.geometry.take() {
            feature.geometry = Some(Geometry::MultiPolygon(buffer_geometry(&geometry, params)));
        }
    }

    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::Area;
    use geo_types::{line_string, polygon};
    use mcda_core::{AttributeValue, Feature, CRS};

    #[test]
    fn test_buffer_point_circle() {
        let point = Point::new(0.0, 0.0);
        let params = BufferParams {
            distance: 10.0,
            segments: 64,
        };

        let polygon = buffer_points(&point, &params);

        // Area should approximate π * r²
        let expected_area = PI * 100.0;
        let actual_area = polygon.unsigned_area();

        let error = (actual_area - expected_area).abs() / expected_area;
        assert!(
            error < 0.01,
            "Circle area error {:.2}% (expected {:.1}, got {:.1})",
            error * 100.0,
            expected_area,
            actual_area
        );
    }

    #[test]
    fn test_buffer_point_vertex_count() {
        let point = Point::new(5.0, 5.0);
        let params = BufferParams {
            distance: 1.0,
            segments: 32,
        };

        let polygon = buffer_points(&point, &params);

        // Should have segments + 1 coordinates (closed ring)
        assert_eq!(polygon.exterior().0.len(), 33);
    }

    #[test]
    fn test_default_point_buffer_is_64_gon() {
        let buffered = buffer_geometry(
            &Geometry::Point(Point::new(0.0, 0.0)),
            &BufferParams {
                distance: 1.0,
                ..Default::default()
            },
        );

        assert_eq!(buffered.0.len(), 1);
        assert_eq!(buffered.0[0].exterior().0.len(), 65);
        // area of a regular 64-gon with unit circumradius: 32 * sin(2π / 64)
        let expected = 32.0 * (2.0 * PI / 64.0).sin();
        assert_relative_eq!(buffered.unsigned_area(), expected, epsilon = 1e-9);
        assert_relative_eq!(buffered.unsigned_area(), 3.13655, epsilon = 1e-4);
    }

    #[test]
    fn test_polygon_buffer_grows_area() {
        let square = Geometry::Polygon(polygon![
            (x: 85.0, y: 27.0),
            (x: 85.01, y: 27.0),
            (x: 85.01, y: 27.01),
            (x: 85.0, y: 27.01),
            (x: 85.0, y: 27.0),
        ]);
        let original = square.unsigned_area();
        let buffered = buffer_geometry(&square, &BufferParams::default());

        assert!(buffered.unsigned_area() >= original);
    }

    #[test]
    fn test_line_buffer_has_area() {
        let line = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)]);
        let buffered = buffer_geometry(&line, &BufferParams { distance: 0.1, segments: 16 });

        // Roughly a 1 x 0.2 strip plus two end caps
        assert!(buffered.unsigned_area() > 0.2);
    }

    #[test]
    fn test_layer_without_crs_becomes_wgs84() {
        let mut layer = VectorLayer::new(None);
        let mut feature = Feature::new(Geometry::Point(Point::new(82.5, 28.0)));
        feature.set_property("name", AttributeValue::String("well".into()));
        layer.fields = vec!["name".to_string()];
        layer.push(feature);

        let out = buffer_layer(layer, &BufferParams::default()).unwrap();
        assert_eq!(out.crs, Some(CRS::wgs84()));
        assert_eq!(out.fields, vec!["name".to_string()]);
        assert!(matches!(out.features[0].geometry, Some(Geometry::MultiPolygon(_))));
        assert_eq!(
            out.features[0].get_property("name"),
            Some(&AttributeValue::String("well".into()))
        );
    }

    #[test]
    fn test_layer_keeps_existing_crs() {
        let layer = VectorLayer::new(Some(CRS::from_epsg(32644)));
        let out = Buffer.execute(layer, BufferParams::default()).unwrap();
        assert_eq!(out.crs.and_then(|c| c.epsg()), Some(32644));
    }

    #[test]
    fn test_non_finite_distance_rejected() {
        let params = BufferParams {
            distance: f64::NAN,
            segments: 16,
        };
        assert!(buffer_layer(VectorLayer::new(None), &params).is_err());
    }
}
