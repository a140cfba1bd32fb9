//! Full upload → overlay runs against the local object-store backend.

use approx::assert_relative_eq;
use geo_types::{line_string, point, polygon, Geometry};
use mcda_cloud::{ArtifactStore, StoreConfig};
use mcda_core::io::{read_geotiff_from_buffer, write_geotiff, write_vector_layer};
use mcda_core::{Feature, GeoTransform, Raster, VectorLayer, CRS};
use mcda_pipeline::{
    JsonLinesTransactionLog, LayerRole, McdaPipeline, OverlayRequest, OverlayWeights, PipelineConfig, StagingSlot,
    TransactionRecord, UploadBundle,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

const ROWS: usize = 100;
const COLS: usize = 100;

struct Fixture {
    _dirs: (TempDir, TempDir, TempDir),
    inputs: PathBuf,
    staging_root: PathBuf,
    log_path: PathBuf,
    pipeline: McdaPipeline,
}

async fn fixture() -> Fixture {
    let store_dir = tempfile::tempdir().unwrap();
    let staging_dir = tempfile::tempdir().unwrap();
    let input_dir = tempfile::tempdir().unwrap();

    let store = ArtifactStore::new(&StoreConfig::local(store_dir.path())).unwrap();
    store.ensure_namespace().await.unwrap();

    let config = PipelineConfig {
        staging_root: staging_dir.path().to_path_buf(),
        ..PipelineConfig::default()
    };
    let log_path = input_dir.path().join("transactions.jsonl");
    let pipeline = McdaPipeline::new(Arc::new(store), config)
        .with_transaction_log(Arc::new(JsonLinesTransactionLog::new(&log_path)));

    Fixture {
        inputs: input_dir.path().to_path_buf(),
        staging_root: staging_dir.path().to_path_buf(),
        log_path,
        _dirs: (store_dir, staging_dir, input_dir),
        pipeline,
    }
}

fn square(x0: f64, y0: f64, size: f64) -> Geometry<f64> {
    Geometry::Polygon(polygon![
        (x: x0, y: y0),
        (x: x0 + size, y: y0),
        (x: x0 + size, y: y0 + size),
        (x: x0, y: y0 + size),
        (x: x0, y: y0),
    ])
}

fn aoi() -> Vec<Geometry<f64>> {
    vec![square(82.02, 28.02, 0.06)]
}

fn layer_geometries(role: LayerRole) -> Vec<Geometry<f64>> {
    match role {
        LayerRole::River => vec![
            Geometry::LineString(line_string![(x: 82.0, y: 28.05), (x: 82.1, y: 28.05)]),
            Geometry::LineString(line_string![(x: 82.0, y: 28.03), (x: 82.1, y: 28.03)]),
        ],
        LayerRole::Road => vec![
            Geometry::LineString(line_string![(x: 82.04, y: 28.0), (x: 82.04, y: 28.1)]),
            Geometry::LineString(line_string![(x: 82.07, y: 28.0), (x: 82.07, y: 28.1)]),
        ],
        LayerRole::Settlement => vec![
            Geometry::Point(point!(x: 82.03, y: 28.07)),
            Geometry::Point(point!(x: 82.06, y: 28.04)),
        ],
    }
}

fn write_layer(dir: &Path, name: &str, geometries: Vec<Geometry<f64>>, crs: Option<CRS>) -> Vec<PathBuf> {
    let mut layer = VectorLayer::new(Some(CRS::wgs84()));
    for g in geometries {
        layer.push(Feature::new(g));
    }
    let files = write_vector_layer(&layer, dir.join(format!("{}.shp", name))).unwrap();
    if crs.is_none() {
        // drop the .prj so the pipeline has to assume EPSG:4326
        for f in files.iter().filter(|f| f.extension().is_some_and(|e| e == "prj")) {
            std::fs::remove_file(f).unwrap();
        }
    }
    files.into_iter().filter(|f| f.exists()).collect()
}

fn write_reference(dir: &Path) -> PathBuf {
    let mut raster: Raster<f32> = Raster::new(ROWS, COLS);
    raster.set_transform(GeoTransform::new(82.0, 28.1, 0.001, -0.001));
    raster.set_crs(Some(CRS::wgs84()));
    let path = dir.join("reference.tif");
    write_geotiff(&raster, &path, None).unwrap();
    path
}

fn add_files(bundle: &mut UploadBundle, slot: StagingSlot, files: &[PathBuf]) {
    for f in files {
        let name = f.file_name().unwrap().to_string_lossy().into_owned();
        bundle.add(slot, name, std::fs::read(f).unwrap());
    }
}

/// River and settlement ship their `.prj`; road does not.
fn full_bundle(dir: &Path) -> UploadBundle {
    let mut bundle = UploadBundle::new();
    add_files(&mut bundle, StagingSlot::Aoi, &write_layer(dir, "dang", aoi(), Some(CRS::wgs84())));
    for role in LayerRole::ALL {
        let crs = (role != LayerRole::Road).then(CRS::wgs84);
        let files = write_layer(dir, &format!("{}_dang", role), layer_geometries(role), crs);
        add_files(&mut bundle, StagingSlot::Layer(role), &files);
    }
    let reference = write_reference(dir);
    add_files(&mut bundle, StagingSlot::Reference, &[reference]);
    bundle
}

async fn fetch_raster(pipeline: &McdaPipeline, url: &str) -> Raster<f64> {
    let bytes = pipeline.store().fetch_url(url).await.unwrap();
    read_geotiff_from_buffer(&bytes, None).unwrap()
}

#[tokio::test]
async fn upload_produces_cropped_layers_and_manifest() {
    let fx = fixture().await;
    let response = fx.pipeline.process_upload(full_bundle(&fx.inputs)).await.unwrap();

    assert_eq!(response.layers.len(), 3);
    assert_eq!(
        response.manifest_key.as_str(),
        format!("mcda/{}/manifest.json", response.request_id)
    );

    for (role, artifact) in &response.layers {
        assert_eq!(artifact.bucket, "bucket1");
        assert!(artifact
            .object_key
            .as_str()
            .starts_with(&format!("mcda/{}/{}/", response.request_id, role)));
        assert!(artifact.object_key.as_str().ends_with("_buffered_rasterized_masked.tif"));

        let raster = fetch_raster(&fx.pipeline, &artifact.presigned_url).await;
        // cropped to the AOI envelope
        assert_eq!(raster.shape(), (60, 60));
        assert!(raster.rows() <= ROWS && raster.cols() <= COLS);

        // the second feature is burned as 1 and must stay near its geometry
        let geometry = &layer_geometries(*role)[1];
        let ones: Vec<(f64, f64)> = (0..raster.rows())
            .flat_map(|r| (0..raster.cols()).map(move |c| (r, c)))
            .filter(|&(r, c)| raster.get(r, c).unwrap() == 1.0)
            .map(|(r, c)| raster.pixel_to_geo(c, r))
            .collect();
        assert!(!ones.is_empty(), "{} has no burned cells", role);

        let reach = 0.0038 + 0.0025;
        for (x, y) in ones {
            let near = match geometry {
                Geometry::LineString(ls) => {
                    let a = ls.0[0];
                    if a.y == ls.0[1].y {
                        (y - a.y).abs() <= reach
                    } else {
                        (x - a.x).abs() <= reach
                    }
                }
                Geometry::Point(p) => (x - p.x()).abs() <= reach && (y - p.y()).abs() <= reach,
                _ => unreachable!(),
            };
            assert!(near, "{} cell at ({}, {}) is outside the buffered footprint", role, x, y);
            assert!((82.019..=82.081).contains(&x) && (28.019..=28.081).contains(&y));
        }
    }

    // staged copies were removed after promotion
    let store = fx.pipeline.store();
    assert!(store.list(&store.key([".staging"])).await.unwrap().is_empty());

    let manifest = fx.pipeline.load_manifest(response.request_id).await.unwrap();
    assert_eq!(manifest.layers.len(), 3);

    let records: Vec<TransactionRecord> = std::fs::read_to_string(&fx.log_path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.request_id == response.request_id && r.action == "upload"));

    // request staging directory is gone
    assert!(!fx.staging_root.join(response.request_id.to_string()).exists());
}

#[tokio::test]
async fn overlay_combines_layers_by_weight() {
    let fx = fixture().await;
    let upload = fx.pipeline.process_upload(full_bundle(&fx.inputs)).await.unwrap();

    let request = OverlayRequest {
        request_id: upload.request_id,
        weights: OverlayWeights::from_scalars(1.0, 2.0, 3.0),
    };
    let first = fx.pipeline.weighted_overlay(request.clone()).await.unwrap();
    let second = fx.pipeline.weighted_overlay(request).await.unwrap();

    // every invocation gets its own output key
    assert_ne!(first.artifact.object_key, second.artifact.object_key);
    assert!(first.artifact.object_key.as_str().ends_with("_weighted_overlay.tif"));

    let overlay = fetch_raster(&fx.pipeline, &first.artifact.presigned_url).await;
    let river = fetch_raster(&fx.pipeline, &upload.layers[&LayerRole::River].presigned_url).await;
    let road = fetch_raster(&fx.pipeline, &upload.layers[&LayerRole::Road].presigned_url).await;
    let settlement = fetch_raster(&fx.pipeline, &upload.layers[&LayerRole::Settlement].presigned_url).await;

    assert_eq!(overlay.shape(), river.shape());
    assert_eq!(overlay.transform(), river.transform());
    for r in 0..overlay.rows() {
        for c in 0..overlay.cols() {
            let expected = river.get(r, c).unwrap() + 2.0 * road.get(r, c).unwrap() + 3.0 * settlement.get(r, c).unwrap();
            assert_relative_eq!(overlay.get(r, c).unwrap(), expected, epsilon = 1e-9);
        }
    }
}

#[tokio::test]
async fn overlay_accepts_explicit_keys() {
    let fx = fixture().await;
    let upload = fx.pipeline.process_upload(full_bundle(&fx.inputs)).await.unwrap();
    let river_key = upload.layers[&LayerRole::River].object_key.clone();

    let response = fx
        .pipeline
        .weighted_overlay(OverlayRequest {
            request_id: upload.request_id,
            weights: OverlayWeights::Explicit(vec![(river_key, 0.5)]),
        })
        .await
        .unwrap();

    let river = fetch_raster(&fx.pipeline, &upload.layers[&LayerRole::River].presigned_url).await;
    let overlay = fetch_raster(&fx.pipeline, &response.artifact.presigned_url).await;
    for (a, b) in overlay.data().iter().zip(river.data().iter()) {
        assert_relative_eq!(*a, b * 0.5);
    }
}

#[tokio::test]
async fn overlay_errors() {
    let fx = fixture().await;

    let err = fx
        .pipeline
        .weighted_overlay(OverlayRequest {
            request_id: Uuid::new_v4(),
            weights: OverlayWeights::from_scalars(1.0, 1.0, 1.0),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    let upload = fx.pipeline.process_upload(full_bundle(&fx.inputs)).await.unwrap();
    let mut weights = std::collections::BTreeMap::new();
    weights.insert(LayerRole::River, 1.0);
    let err = fx
        .pipeline
        .weighted_overlay(OverlayRequest {
            request_id: upload.request_id,
            weights: OverlayWeights::Roles(weights),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_request");
}

#[tokio::test]
async fn failed_layer_rolls_back_the_request() {
    let fx = fixture().await;
    let mut bundle = UploadBundle::new();
    for file in full_bundle(&fx.inputs).files() {
        if file.slot == StagingSlot::Layer(LayerRole::Settlement) && file.file_name.ends_with(".shp") {
            bundle.add(file.slot, file.file_name.clone(), b"not a shapefile".to_vec());
        } else {
            bundle.add(file.slot, file.file_name.clone(), file.data.clone());
        }
    }

    let err = fx.pipeline.process_upload(bundle).await.unwrap_err();
    assert_eq!(err.code(), "format");
    assert!(err.to_string().starts_with("Buffer analysis failed"));

    let store = fx.pipeline.store();
    assert!(store.list(&store.key([""])).await.unwrap().is_empty());
    assert!(!fx.log_path.exists());
}

#[tokio::test]
async fn missing_field_is_rejected() {
    let fx = fixture().await;
    let mut bundle = UploadBundle::new();
    for file in full_bundle(&fx.inputs).files() {
        if file.slot != StagingSlot::Reference {
            bundle.add(file.slot, file.file_name.clone(), file.data.clone());
        }
    }

    let err = fx.pipeline.process_upload(bundle).await.unwrap_err();
    assert_eq!(err.code(), "invalid_request");
    assert!(err.to_string().contains("rasterfile"));
}
