//! Request orchestration.

use crate::commit::ArtifactTransaction;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result, Stage};
use crate::manifest::{OverlayResponse, UploadManifest, UploadResponse, MANIFEST_FILE};
use crate::roles::{LayerRole, StagingSlot};
use crate::stages::{buffer_dataset, mask_raster_file, overlay_rasters, rasterize_dataset};
use crate::staging::{RequestStaging, StagingArea};
use crate::transactions::{TracingTransactionLog, TransactionLog, TransactionRecord};
use bytes::Bytes;
use chrono::Utc;
use futures::future::try_join_all;
use mcda_cloud::{ArtifactKey, ArtifactStore, CloudError};
use mcda_core::io::{read_geotiff_from_buffer, write_geotiff_to_buffer, DataType, GeoTiffOptions};
use mcda_core::Raster;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// One uploaded file and the slot it fills
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub slot: StagingSlot,
    pub file_name: String,
    pub data: Bytes,
}

/// The files of one upload request.
///
/// Vector slots may carry several files (`.shp` plus companions).
#[derive(Debug, Clone, Default)]
pub struct UploadBundle {
    files: Vec<UploadedFile>,
}

impl UploadBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, slot: StagingSlot, file_name: impl Into<String>, data: impl Into<Bytes>) {
        self.files.push(UploadedFile {
            slot,
            file_name: file_name.into(),
            data: data.into(),
        });
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Weights for an overlay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OverlayWeights {
    /// One weight per role of the request's manifest
    Roles(BTreeMap<LayerRole, f64>),
    /// Explicit artifact keys with their weights
    Explicit(Vec<(ArtifactKey, f64)>),
}

impl OverlayWeights {
    /// Role weights from the three scalar weights of the HTTP form
    pub fn from_scalars(river: f64, road: f64, settlement: f64) -> Self {
        OverlayWeights::Roles(BTreeMap::from([
            (LayerRole::River, river),
            (LayerRole::Road, road),
            (LayerRole::Settlement, settlement),
        ]))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayRequest {
    pub request_id: Uuid,
    pub weights: OverlayWeights,
}

/// The MCDA pipeline: per-request staging, the three role sub-pipelines,
/// two-phase artifact commit and the weighted overlay.
pub struct McdaPipeline {
    store: Arc<ArtifactStore>,
    staging: StagingArea,
    config: PipelineConfig,
    log: Arc<dyn TransactionLog>,
}

impl McdaPipeline {
    pub fn new(store: Arc<ArtifactStore>, config: PipelineConfig) -> Self {
        Self {
            store,
            staging: StagingArea::new(&config.staging_root, config.keep_staging),
            config,
            log: Arc::new(TracingTransactionLog),
        }
    }

    pub fn with_transaction_log(mut self, log: Arc<dyn TransactionLog>) -> Self {
        self.log = log;
        self
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stage the uploaded files, run buffer → rasterize → mask for river,
    /// road and settlement concurrently, and commit the masked rasters plus
    /// a manifest.
    ///
    /// Any failure aborts the request and deletes whatever it uploaded.
    #[instrument(skip_all, fields(request_id, files = bundle.len()))]
    pub async fn process_upload(&self, bundle: UploadBundle) -> Result<UploadResponse> {
        let start = Instant::now();
        let mut staging = self.staging.begin()?;
        let request_id = staging.request_id();
        tracing::Span::current().record("request_id", tracing::field::display(request_id));

        for file in bundle.files() {
            staging.add_file(file.slot, &file.file_name, &file.data).await?;
        }
        staging.check_complete()?;

        let aoi = staging.primary(StagingSlot::Aoi)?;
        let reference = staging.primary(StagingSlot::Reference)?;

        let txn = ArtifactTransaction::begin(self.store.clone(), request_id);
        match self.run_roles(&staging, &txn, &aoi, &reference).await {
            Ok(response) => {
                let committed = txn.commit().await?;
                for key in committed {
                    self.record("upload", key, request_id).await;
                }
                info!(elapsed_ms = start.elapsed().as_millis() as u64, "upload processed");
                Ok(response)
            }
            Err(e) => {
                warn!(error = %e, "upload failed");
                txn.rollback().await;
                Err(e)
            }
        }
    }

    async fn run_roles(
        &self,
        staging: &RequestStaging,
        txn: &ArtifactTransaction,
        aoi: &Path,
        reference: &Path,
    ) -> Result<UploadResponse> {
        let (river, road, settlement) = tokio::try_join!(
            self.run_role(staging, txn, LayerRole::River, aoi, reference),
            self.run_role(staging, txn, LayerRole::Road, aoi, reference),
            self.run_role(staging, txn, LayerRole::Settlement, aoi, reference),
        )?;
        let layers = BTreeMap::from([
            (LayerRole::River, river),
            (LayerRole::Road, road),
            (LayerRole::Settlement, settlement),
        ]);

        let manifest = UploadManifest {
            request_id: txn.request_id(),
            bucket: self.store.bucket().to_string(),
            created_at: Utc::now(),
            layers,
        };
        let manifest_key = txn.stage(MANIFEST_FILE, manifest.to_bytes()?).await?;

        // URLs are signed for the final keys before promotion so a signing
        // failure still rolls the request back
        let mut refs = BTreeMap::new();
        for (role, key) in &manifest.layers {
            let artifact = self
                .store
                .artifact_ref(key)
                .await
                .map_err(|e| PipelineError::cloud(Stage::Store, e))?;
            refs.insert(*role, artifact);
        }

        Ok(UploadResponse {
            request_id: txn.request_id(),
            manifest_key,
            layers: refs,
        })
    }

    #[instrument(skip_all, fields(request_id = %staging.request_id(), role = %role))]
    async fn run_role(
        &self,
        staging: &RequestStaging,
        txn: &ArtifactTransaction,
        role: LayerRole,
        aoi: &Path,
        reference: &Path,
    ) -> Result<ArtifactKey> {
        let slot = StagingSlot::Layer(role);
        let primary = staging.primary(slot)?;
        let out_dir = staging.slot_dir(slot);
        let distance = self.config.buffer_distance;
        let aoi = aoi.to_path_buf();
        let reference = reference.to_path_buf();

        let masked = run_blocking(Stage::Mask, move || {
            let buffered = buffer_dataset(&primary, &out_dir, distance)?;
            let rasterized = rasterize_dataset(&buffered, &reference)?;
            mask_raster_file(&rasterized, &aoi)
        })
        .await?;

        let data = tokio::fs::read(&masked).await.map_err(|e| {
            PipelineError::storage(Stage::Store, format!("cannot read {}: {}", masked.display(), e))
        })?;
        let file = format!("{}/{}", role, file_name(&masked));
        txn.stage(&file, Bytes::from(data)).await
    }

    /// Manifest stored by an earlier upload
    pub async fn load_manifest(&self, request_id: Uuid) -> Result<UploadManifest> {
        let key = self.store.key([request_id.to_string().as_str(), MANIFEST_FILE]);
        match self.store.get(&key).await {
            Ok(data) => UploadManifest::from_bytes(&data),
            Err(CloudError::NotFound { .. }) => Err(PipelineError::NotFound {
                what: format!("upload {}", request_id),
            }),
            Err(e) => Err(PipelineError::cloud(Stage::Overlay, e)),
        }
    }

    /// Fetch the request's masked rasters through presigned URLs, combine
    /// them with the given weights and store the result under a key unique
    /// to this invocation.
    #[instrument(skip_all, fields(request_id = %request.request_id))]
    pub async fn weighted_overlay(&self, request: OverlayRequest) -> Result<OverlayResponse> {
        let start = Instant::now();
        let inputs = self.resolve_inputs(&request).await?;

        let fetches = inputs.iter().map(|(key, _)| self.fetch_artifact(key));
        let payloads = try_join_all(fetches).await?;
        let weights: Vec<f64> = inputs.iter().map(|(_, w)| *w).collect();

        let encoded = run_blocking(Stage::Overlay, move || {
            let rasters = payloads
                .iter()
                .map(|data| read_geotiff_from_buffer::<f64>(data, None))
                .collect::<mcda_core::Result<Vec<Raster<f64>>>>()
                .map_err(|e| PipelineError::core(Stage::Overlay, e))?;
            let overlay = overlay_rasters(rasters, &weights)?;
            write_geotiff_to_buffer(&overlay, Some(GeoTiffOptions::with_data_type(DataType::Float64)))
                .map_err(|e| PipelineError::core(Stage::Overlay, e))
        })
        .await?;

        let overlay_id = Uuid::new_v4();
        let key = self.store.key([
            request.request_id.to_string().as_str(),
            "overlay",
            format!("{}_weighted_overlay.tif", overlay_id).as_str(),
        ]);
        self.store
            .put(&key, Bytes::from(encoded))
            .await
            .map_err(|e| PipelineError::cloud(Stage::Store, e))?;
        self.record("overlay", key.clone(), request.request_id).await;

        let artifact = self
            .store
            .artifact_ref(&key)
            .await
            .map_err(|e| PipelineError::cloud(Stage::Store, e))?;

        info!(
            %overlay_id,
            inputs = inputs.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "weighted overlay stored"
        );
        Ok(OverlayResponse {
            request_id: request.request_id,
            overlay_id,
            artifact,
        })
    }

    async fn resolve_inputs(&self, request: &OverlayRequest) -> Result<Vec<(ArtifactKey, f64)>> {
        let inputs = match &request.weights {
            OverlayWeights::Roles(weights) => {
                let manifest = self.load_manifest(request.request_id).await?;
                let mut inputs = Vec::with_capacity(LayerRole::ALL.len());
                for role in LayerRole::ALL {
                    let weight = weights.get(&role).copied().ok_or_else(|| {
                        PipelineError::invalid(Stage::Overlay, format!("missing weight for {}", role))
                    })?;
                    inputs.push((manifest.layer(role)?.clone(), weight));
                }
                inputs
            }
            OverlayWeights::Explicit(pairs) => {
                if pairs.is_empty() {
                    return Err(PipelineError::invalid(Stage::Overlay, "no rasters to overlay"));
                }
                pairs.clone()
            }
        };

        if let Some((key, w)) = inputs.iter().find(|(_, w)| !w.is_finite()) {
            return Err(PipelineError::invalid(
                Stage::Overlay,
                format!("weight for {} is not a finite number: {}", key, w),
            ));
        }
        Ok(inputs)
    }

    /// Download an artifact the way a client would: through a fresh
    /// presigned URL.
    async fn fetch_artifact(&self, key: &ArtifactKey) -> Result<Bytes> {
        let url = self
            .store
            .presigned_url(key)
            .await
            .map_err(|e| PipelineError::cloud(Stage::Overlay, e))?;
        match self.store.fetch_url(&url).await {
            Ok(data) => Ok(data),
            Err(CloudError::NotFound { .. }) => Err(PipelineError::NotFound {
                what: format!("artifact {}", key),
            }),
            Err(e) => Err(PipelineError::cloud(Stage::Overlay, e)),
        }
    }

    async fn record(&self, action: &str, key: ArtifactKey, request_id: Uuid) {
        let record = TransactionRecord::new(action, self.store.bucket(), key, request_id);
        if let Err(e) = self.log.record(&record).await {
            warn!(error = %e, key = %record.object_key, "failed to write transaction record");
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Run a synchronous stage on the blocking pool.
async fn run_blocking<T, F>(stage: Stage, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        PipelineError::core(stage, mcda_core::Error::Algorithm(format!("stage task failed: {}", e)))
    })?
}
