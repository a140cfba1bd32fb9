//! Layer roles and upload slots.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The criterion layers combined by the weighted overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerRole {
    River,
    Road,
    Settlement,
}

impl LayerRole {
    pub const ALL: [LayerRole; 3] = [LayerRole::River, LayerRole::Road, LayerRole::Settlement];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerRole::River => "river",
            LayerRole::Road => "road",
            LayerRole::Settlement => "settlement",
        }
    }
}

impl fmt::Display for LayerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "river" => Ok(LayerRole::River),
            "road" => Ok(LayerRole::Road),
            "settlement" => Ok(LayerRole::Settlement),
            other => Err(format!("unknown layer role '{}'", other)),
        }
    }
}

/// Where an uploaded file belongs within a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StagingSlot {
    /// Area-of-interest boundary
    Aoi,
    /// Reference raster defining the output grid
    Reference,
    Layer(LayerRole),
}

impl StagingSlot {
    /// Every slot an upload must fill
    pub const REQUIRED: [StagingSlot; 5] = [
        StagingSlot::Aoi,
        StagingSlot::Layer(LayerRole::River),
        StagingSlot::Layer(LayerRole::Road),
        StagingSlot::Layer(LayerRole::Settlement),
        StagingSlot::Reference,
    ];

    /// Slot for a multipart form field name
    pub fn from_field(name: &str) -> Option<Self> {
        match name {
            "aoi_shapefile" | "dang_shapefile" => Some(StagingSlot::Aoi),
            "river_shapefile" => Some(StagingSlot::Layer(LayerRole::River)),
            "road_shapefile" => Some(StagingSlot::Layer(LayerRole::Road)),
            "settlement_shapefile" => Some(StagingSlot::Layer(LayerRole::Settlement)),
            "rasterfile" => Some(StagingSlot::Reference),
            _ => None,
        }
    }

    /// Form field name
    pub fn field_name(&self) -> &'static str {
        match self {
            StagingSlot::Aoi => "aoi_shapefile",
            StagingSlot::Reference => "rasterfile",
            StagingSlot::Layer(LayerRole::River) => "river_shapefile",
            StagingSlot::Layer(LayerRole::Road) => "road_shapefile",
            StagingSlot::Layer(LayerRole::Settlement) => "settlement_shapefile",
        }
    }

    /// Subdirectory of the request staging directory
    pub fn dir_name(&self) -> &'static str {
        match self {
            StagingSlot::Aoi => "aoi",
            StagingSlot::Reference => "reference",
            StagingSlot::Layer(role) => role.as_str(),
        }
    }

    pub fn is_vector(&self) -> bool {
        !matches!(self, StagingSlot::Reference)
    }
}
