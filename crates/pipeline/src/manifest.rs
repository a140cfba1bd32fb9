//! Upload manifest: the explicit handoff from an upload to later overlays.

use crate::error::{PipelineError, Result, Stage};
use crate::roles::LayerRole;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use mcda_cloud::{ArtifactKey, ArtifactRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// File name of the manifest under the request prefix
pub const MANIFEST_FILE: &str = "manifest.json";

/// Which stored artifact holds each role's masked raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadManifest {
    pub request_id: Uuid,
    pub bucket: String,
    pub created_at: DateTime<Utc>,
    pub layers: BTreeMap<LayerRole, ArtifactKey>,
}

impl UploadManifest {
    pub fn to_bytes(&self) -> Result<Bytes> {
        serde_json::to_vec_pretty(self)
            .map(Bytes::from)
            .map_err(|e| PipelineError::storage(Stage::Store, format!("cannot encode manifest: {}", e)))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| PipelineError::storage(Stage::Overlay, format!("manifest is unreadable: {}", e)))
    }

    /// Stored key for `role`, or `NotFound`
    pub fn layer(&self, role: LayerRole) -> Result<&ArtifactKey> {
        self.layers.get(&role).ok_or_else(|| PipelineError::NotFound {
            what: format!("{} layer of request {}", role, self.request_id),
        })
    }
}

/// Response to an upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub request_id: Uuid,
    pub manifest_key: ArtifactKey,
    pub layers: BTreeMap<LayerRole, ArtifactRef>,
}

/// Response to a weighted overlay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayResponse {
    pub request_id: Uuid,
    pub overlay_id: Uuid,
    #[serde(flatten)]
    pub artifact: ArtifactRef,
}
