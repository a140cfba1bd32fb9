//! Vector data structures

use crate::crs::CRS;
use geo::BoundingRect;
use geo_types::{Geometry, Rect};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attribute value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// A geographic feature with geometry and attributes
#[derive(Debug, Clone)]
pub struct Feature {
    /// Feature geometry
    pub geometry: Option<Geometry<f64>>,
    /// Feature attributes
    pub properties: HashMap<String, AttributeValue>,
    /// Optional feature ID
    pub id: Option<String>,
}

impl Feature {
    /// Create a new feature with geometry
    pub fn new(geometry: Geometry<f64>) -> Self {
        Self {
            geometry: Some(geometry),
            properties: HashMap::new(),
            id: None,
        }
    }

    /// Set an attribute
    pub fn set_property(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.properties.insert(key.into(), value);
    }

    /// Get an attribute
    pub fn get_property(&self, key: &str) -> Option<&AttributeValue> {
        self.properties.get(key)
    }
}

/// A vector layer: ordered features, their CRS and the attribute column order.
///
/// The CRS must be set before any geometric operation; [`VectorLayer::ensure_crs`]
/// injects EPSG:4326 when the source carried no projection.
#[derive(Debug, Clone, Default)]
pub struct VectorLayer {
    pub features: Vec<Feature>,
    pub crs: Option<CRS>,
    /// Attribute column names in table order
    pub fields: Vec<String>,
}

impl VectorLayer {
    pub fn new(crs: Option<CRS>) -> Self {
        Self {
            features: Vec::new(),
            crs,
            fields: Vec::new(),
        }
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Assign `CRS::wgs84()` when no CRS is set. Returns `true` if one was injected.
    pub fn ensure_crs(&mut self) -> bool {
        if self.crs.is_none() {
            self.crs = Some(CRS::wgs84());
            true
        } else {
            false
        }
    }

    /// Geometries in iteration order, skipping features without one
    pub fn geometries(&self) -> impl Iterator<Item = &Geometry<f64>> {
        self.features.iter().filter_map(|f| f.geometry.as_ref())
    }

    /// Combined bounding envelope of all geometries
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.geometries()
            .filter_map(|g| g.bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
                    (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
                )
            })
    }
}

impl IntoIterator for VectorLayer {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{point, polygon};

    #[test]
    fn test_ensure_crs_injects_wgs84_once() {
        let mut layer = VectorLayer::new(None);
        assert!(layer.ensure_crs());
        assert_eq!(layer.crs.as_ref().and_then(|c| c.epsg()), Some(4326));
        assert!(!layer.ensure_crs());

        let mut projected = VectorLayer::new(Some(CRS::from_epsg(32645)));
        assert!(!projected.ensure_crs());
        assert_eq!(projected.crs.unwrap().epsg(), Some(32645));
    }

    #[test]
    fn test_bounds_union() {
        let mut layer = VectorLayer::new(None);
        layer.push(Feature::new(Geometry::Point(point!(x: 1.0, y: 5.0))));
        layer.push(Feature::new(Geometry::Polygon(polygon![
            (x: 2.0, y: 2.0),
            (x: 4.0, y: 2.0),
            (x: 4.0, y: 3.0),
            (x: 2.0, y: 2.0),
        ])));

        let b = layer.bounds().unwrap();
        assert_eq!((b.min().x, b.min().y), (1.0, 2.0));
        assert_eq!((b.max().x, b.max().y), (4.0, 5.0));
        assert!(VectorLayer::default().bounds().is_none());
    }
}
