//! Local-backend round trips through presigned URLs.

use bytes::Bytes;
use mcda_cloud::{ArtifactStore, CloudError, StoreConfig};
use std::time::Duration;

fn store_at(dir: &std::path::Path, expiry: Duration) -> ArtifactStore {
    let mut config = StoreConfig::local(dir);
    config.presign_expiry = expiry;
    ArtifactStore::new(&config).unwrap()
}

#[tokio::test]
async fn presigned_url_returns_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path(), Duration::from_secs(600));
    store.ensure_namespace().await.unwrap();
    // second call is a no-op
    store.ensure_namespace().await.unwrap();

    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let key = store.key(["req", "river_masked.tif"]);
    store.put(&key, Bytes::from(payload.clone())).await.unwrap();

    let artifact = store.artifact_ref(&key).await.unwrap();
    assert_eq!(artifact.bucket, "bucket1");
    assert_eq!(artifact.object_key.as_str(), "mcda/req/river_masked.tif");
    assert!(artifact.presigned_url.starts_with("file://"));

    let fetched = store.fetch_url(&artifact.presigned_url).await.unwrap();
    assert_eq!(fetched.as_ref(), payload.as_slice());
}

#[tokio::test]
async fn url_expires() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path(), Duration::from_secs(1));
    store.ensure_namespace().await.unwrap();

    let key = store.key(["a.tif"]);
    store.put(&key, Bytes::from_static(b"abc")).await.unwrap();
    let url = store.presigned_url(&key).await.unwrap();

    tokio::time::sleep(Duration::from_millis(2100)).await;
    let err = store.fetch_url(&url).await.unwrap_err();
    assert!(matches!(err, CloudError::Expired { .. }));
}

#[tokio::test]
async fn deleted_object_url_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path(), Duration::from_secs(600));
    store.ensure_namespace().await.unwrap();

    let key = store.key(["gone.tif"]);
    store.put(&key, Bytes::from_static(b"abc")).await.unwrap();
    let url = store.presigned_url(&key).await.unwrap();
    store.delete(&key).await.unwrap();

    let err = store.fetch_url(&url).await.unwrap_err();
    assert!(matches!(err, CloudError::NotFound { .. }));
}

#[tokio::test]
async fn malformed_url_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path(), Duration::from_secs(600));

    let err = store.fetch_url("not a url").await.unwrap_err();
    assert!(matches!(err, CloudError::InvalidUrl { .. }));
}

#[test]
fn s3_config_without_credentials_fails() {
    let config = StoreConfig::default();
    assert!(matches!(
        ArtifactStore::new(&config),
        Err(CloudError::Config(_))
    ));
}
