//! Coordinate Reference System handling

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// ESRI-flavoured WKT for EPSG:4326, as written into `.prj` sidecars.
pub const WGS84_WKT: &str = "GEOGCS[\"GCS_WGS_1984\",DATUM[\"D_WGS_1984\",SPHEROID[\"WGS_1984\",6378137.0,298.257223563]],PRIMEM[\"Greenwich\",0.0],UNIT[\"Degree\",0.0174532925199433]]";

/// EPSG codes of geographic (lat/lon) CRSs we expect to see in uploads.
const GEOGRAPHIC_EPSG: &[u32] = &[4326, 4269, 4258, 4283, 4617, 4674, 4755, 4979];

/// Coordinate Reference System representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    /// WKT representation (primary)
    wkt: Option<String>,
    /// EPSG code if known
    epsg: Option<u32>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            wkt: None,
            epsg: Some(code),
        }
    }

    /// Create a CRS from a WKT string.
    ///
    /// A trailing `AUTHORITY["EPSG","<code>"]` clause, if present, also
    /// populates the EPSG code.
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        let wkt = wkt.into();
        let epsg = parse_authority_code(&wkt).or_else(|| {
            if is_wgs84_wkt(&wkt) {
                Some(4326)
            } else {
                None
            }
        });
        Self {
            wkt: Some(wkt),
            epsg,
        }
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Get WKT representation
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// Whether coordinates are angular (degrees) rather than projected.
    pub fn is_geographic(&self) -> bool {
        if let Some(code) = self.epsg {
            return GEOGRAPHIC_EPSG.contains(&code);
        }
        self.wkt
            .as_deref()
            .map(|w| {
                let w = w.trim_start();
                w.starts_with("GEOGCS") || w.starts_with("GEOGCRS")
            })
            .unwrap_or(false)
    }

    /// Render as WKT for a `.prj` sidecar.
    pub fn to_wkt(&self) -> Result<String> {
        if let Some(wkt) = &self.wkt {
            return Ok(wkt.clone());
        }
        match self.epsg {
            Some(4326) => Ok(WGS84_WKT.to_string()),
            _ => Err(Error::UnrepresentableCrs(self.identifier())),
        }
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }

        // Comparing WKT text is imperfect but sufficient for sidecars we wrote ourselves
        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            return a == b;
        }

        false
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(wkt) = &self.wkt {
            let end = wkt.char_indices().nth(50).map(|(i, _)| i).unwrap_or(wkt.len());
            return format!("WKT:{}", &wkt[..end]);
        }
        "Unknown".to_string()
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Default for CRS {
    fn default() -> Self {
        Self::wgs84()
    }
}

/// Pull the code out of the last `AUTHORITY["EPSG","xxxx"]` clause.
fn parse_authority_code(wkt: &str) -> Option<u32> {
    let idx = wkt.rfind("AUTHORITY[\"EPSG\"")?;
    wkt[idx..]
        .split('"')
        .nth(3)
        .and_then(|code| code.trim().parse().ok())
}

fn is_wgs84_wkt(wkt: &str) -> bool {
    let w = wkt.trim_start();
    (w.starts_with("GEOGCS[\"GCS_WGS_1984\"") || w.starts_with("GEOGCS[\"WGS 84\""))
        && !w.contains("PROJCS")
}
