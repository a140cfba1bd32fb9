//! Artifact store over `object_store`: an S3-compatible bucket or a local
//! directory, with presigned read URLs.

use crate::config::{Backend, StoreConfig};
use crate::error::{CloudError, Result};
use crate::http::{redact, HttpClient, DEFAULT_TIMEOUT};
use crate::key::{ArtifactKey, ArtifactRef};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{ClientOptions, ObjectStore};
use reqwest::{Method, StatusCode, Url};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How presigned URLs are produced for a backend.
#[derive(Debug)]
enum Signing {
    S3(Arc<AmazonS3>),
    /// `file://` URLs with an `expires` query parameter, checked on fetch
    Local { root: PathBuf },
}

/// Keyed blob storage with time-limited read URLs.
///
/// Created once per process and shared; all methods take `&self`.
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
    signing: Signing,
    bucket: String,
    prefix: String,
    presign_expiry: Duration,
    http: HttpClient,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("signing", &self.signing)
            .finish()
    }
}

fn client_options() -> ClientOptions {
    ClientOptions::new()
        .with_default_content_type("application/octet-stream")
        .with_content_type_for_suffix("tif", "image/tiff")
        .with_content_type_for_suffix("tiff", "image/tiff")
        .with_content_type_for_suffix("json", "application/json")
        .with_content_type_for_suffix("prj", "text/plain")
        .with_content_type_for_suffix("cpg", "text/plain")
}

impl ArtifactStore {
    /// Connect to the configured backend.
    ///
    /// Nothing is created remotely; call [`ArtifactStore::ensure_namespace`]
    /// once at startup.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        config.validate()?;

        let (store, signing): (Arc<dyn ObjectStore>, Signing) = match config.backend {
            Backend::S3 => {
                let endpoint = config
                    .endpoint
                    .as_deref()
                    .ok_or_else(|| CloudError::Config("S3 backend needs an endpoint".into()))?;
                let mut builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_bucket_name(&config.bucket)
                    .with_region(&config.region)
                    .with_client_options(client_options());
                if let Some(key) = &config.access_key_id {
                    builder = builder.with_access_key_id(key);
                }
                if let Some(secret) = &config.secret_access_key {
                    builder = builder.with_secret_access_key(secret);
                }
                if config.allow_http {
                    builder = builder.with_allow_http(true);
                }

                let s3 = Arc::new(builder.build().map_err(|e| {
                    CloudError::Config(format!("failed to create S3 client: {}", e))
                })?);
                (s3.clone(), Signing::S3(s3))
            }
            Backend::Local => {
                let root = config.local_root.join(&config.bucket);
                std::fs::create_dir_all(&root)?;
                let root = root.canonicalize()?;
                let local = LocalFileSystem::new_with_prefix(&root)
                    .map_err(|e| CloudError::store(root.display().to_string(), e))?;
                (Arc::new(local), Signing::Local { root })
            }
        };

        Ok(Self {
            store,
            signing,
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
            presign_expiry: config.presign_expiry,
            http: HttpClient::new(DEFAULT_TIMEOUT)?,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Key under the configured namespace prefix
    pub fn key<I, S>(&self, segments: I) -> ArtifactKey
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parts = vec![self.prefix.clone()];
        parts.extend(segments.into_iter().map(|s| s.as_ref().to_string()));
        ArtifactKey::join(parts)
    }

    /// Create the bucket if it does not exist yet. Idempotent.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn ensure_namespace(&self) -> Result<()> {
        match &self.signing {
            Signing::Local { root } => {
                tokio::fs::create_dir_all(root).await?;
                Ok(())
            }
            Signing::S3(s3) => {
                let first = self.store.list(None).next().await;
                match first {
                    None | Some(Ok(_)) => {
                        debug!("bucket exists");
                        Ok(())
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "bucket listing failed, creating bucket");
                        self.create_bucket(s3).await
                    }
                }
            }
        }
    }

    /// PUT on the bucket root is CreateBucket; sent through a presigned URL
    /// so the request carries the store's own credentials.
    async fn create_bucket(&self, s3: &AmazonS3) -> Result<()> {
        let url = s3
            .signed_url(Method::PUT, &Path::from(""), Duration::from_secs(60))
            .await
            .map_err(|e| CloudError::store(&self.bucket, e))?;

        let resp = reqwest::Client::new().put(url.as_str()).send().await?;
        match resp.status() {
            s if s.is_success() => {
                info!(bucket = %self.bucket, "created bucket");
                Ok(())
            }
            StatusCode::CONFLICT => Ok(()),
            s => Err(CloudError::Network(format!(
                "creating bucket {} failed with HTTP {}",
                self.bucket, s
            ))),
        }
    }

    /// Store `data` under `key`, replacing any previous object.
    ///
    /// The content type is chosen from the key's extension.
    #[instrument(skip(self, data), fields(bucket = %self.bucket, key = %key))]
    pub async fn put(&self, key: &ArtifactKey, data: Bytes) -> Result<()> {
        let location = Path::from(key.as_str());
        debug!(size = data.len(), content_type = key.content_type(), "writing object");

        self.store
            .put(&location, data.into())
            .await
            .map_err(|e| CloudError::store(key.as_str(), e))?;
        Ok(())
    }

    /// Read a whole object.
    #[instrument(skip(self), fields(bucket = %self.bucket, key = %key))]
    pub async fn get(&self, key: &ArtifactKey) -> Result<Bytes> {
        let location = Path::from(key.as_str());
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| CloudError::store(key.as_str(), e))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| CloudError::store(key.as_str(), e))?;

        debug!(size = bytes.len(), "read object");
        Ok(bytes)
    }

    /// Check if an object exists.
    pub async fn exists(&self, key: &ArtifactKey) -> Result<bool> {
        match self.store.head(&Path::from(key.as_str())).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(CloudError::store(key.as_str(), e)),
        }
    }

    /// Server-side copy, replacing `to` if present.
    #[instrument(skip(self), fields(bucket = %self.bucket, from = %from, to = %to))]
    pub async fn copy(&self, from: &ArtifactKey, to: &ArtifactKey) -> Result<()> {
        self.store
            .copy(&Path::from(from.as_str()), &Path::from(to.as_str()))
            .await
            .map_err(|e| CloudError::store(from.as_str(), e))
    }

    /// Delete an object.
    #[instrument(skip(self), fields(bucket = %self.bucket, key = %key))]
    pub async fn delete(&self, key: &ArtifactKey) -> Result<()> {
        self.store
            .delete(&Path::from(key.as_str()))
            .await
            .map_err(|e| CloudError::store(key.as_str(), e))
    }

    /// Keys under `prefix`.
    pub async fn list(&self, prefix: &ArtifactKey) -> Result<Vec<ArtifactKey>> {
        let prefix_path = Path::from(prefix.as_str());
        let mut keys = Vec::new();

        let mut stream = self.store.list(Some(&prefix_path));
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(|e| CloudError::store(prefix.as_str(), e))?;
            keys.push(ArtifactKey::from(meta.location.to_string()));
        }
        Ok(keys)
    }

    /// Time-limited read URL for `key`.
    ///
    /// The object is not checked for existence.
    #[instrument(skip(self), fields(bucket = %self.bucket, key = %key))]
    pub async fn presigned_url(&self, key: &ArtifactKey) -> Result<String> {
        match &self.signing {
            Signing::S3(s3) => {
                let url = s3
                    .signed_url(Method::GET, &Path::from(key.as_str()), self.presign_expiry)
                    .await
                    .map_err(|e| CloudError::store(key.as_str(), e))?;
                Ok(url.to_string())
            }
            Signing::Local { root } => {
                let path = root.join(key.as_str());
                let mut url = Url::from_file_path(&path).map_err(|_| CloudError::InvalidUrl {
                    url: path.display().to_string(),
                    reason: "not an absolute path".to_string(),
                })?;
                let expires = Utc::now().timestamp() + self.presign_expiry.as_secs() as i64;
                url.query_pairs_mut().append_pair("expires", &expires.to_string());
                Ok(url.to_string())
            }
        }
    }

    /// `{bucket, objectKey, presignedUrl}` for a stored object.
    pub async fn artifact_ref(&self, key: &ArtifactKey) -> Result<ArtifactRef> {
        Ok(ArtifactRef {
            bucket: self.bucket.clone(),
            object_key: key.clone(),
            presigned_url: self.presigned_url(key).await?,
        })
    }

    /// Download the object behind a URL from [`ArtifactStore::presigned_url`].
    #[instrument(skip(self, url), fields(url = %redact(url)))]
    pub async fn fetch_url(&self, url: &str) -> Result<Bytes> {
        let parsed = Url::parse(url).map_err(|e| CloudError::InvalidUrl {
            url: redact(url).to_string(),
            reason: e.to_string(),
        })?;

        match (parsed.scheme(), &self.signing) {
            ("file", Signing::Local { root }) => self.fetch_local(&parsed, root).await,
            ("file", _) => Err(CloudError::InvalidUrl {
                url: redact(url).to_string(),
                reason: "file URLs are only served by the local backend".to_string(),
            }),
            _ => self.http.fetch(url).await,
        }
    }

    async fn fetch_local(&self, url: &Url, root: &std::path::Path) -> Result<Bytes> {
        let invalid = |reason: &str| CloudError::InvalidUrl {
            url: redact(url.as_str()).to_string(),
            reason: reason.to_string(),
        };

        let expires: i64 = url
            .query_pairs()
            .find(|(k, _)| k == "expires")
            .and_then(|(_, v)| v.parse().ok())
            .ok_or_else(|| invalid("missing expiry"))?;
        if Utc::now().timestamp() > expires {
            return Err(CloudError::Expired {
                url: redact(url.as_str()).to_string(),
            });
        }

        let path = url.to_file_path().map_err(|_| invalid("not a file path"))?;
        // Normalize before the containment check so `..` cannot escape the bucket
        let path = match path.canonicalize() {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CloudError::NotFound {
                    key: path.display().to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        if !path.starts_with(root) {
            warn!(path = %path.display(), "rejected file URL outside the store");
            return Err(invalid("outside the store"));
        }

        let data = tokio::fs::read(&path).await?;
        Ok(Bytes::from(data))
    }
}
