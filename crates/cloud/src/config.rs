//! Store configuration, read from the environment.

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default bucket name
pub const DEFAULT_BUCKET: &str = "bucket1";
/// Default key prefix for every artifact
pub const DEFAULT_PREFIX: &str = "mcda";
/// Seven days, the longest expiry S3 accepts for a presigned URL
pub const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Where artifacts are kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// S3-compatible service (AWS S3, MinIO)
    S3,
    /// A directory on the local filesystem
    Local,
}

impl std::str::FromStr for Backend {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" | "minio" => Ok(Backend::S3),
            "local" | "file" => Ok(Backend::Local),
            other => Err(CloudError::Config(format!("unknown store backend '{}'", other))),
        }
    }
}

/// Configuration for the artifact store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: Backend,
    /// S3/MinIO endpoint URL
    pub endpoint: Option<String>,
    pub bucket: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// AWS region (MinIO accepts "us-east-1")
    pub region: String,
    /// Allow plain HTTP endpoints (local MinIO)
    pub allow_http: bool,
    /// Root directory of the local backend; the bucket is a subdirectory
    pub local_root: PathBuf,
    pub presign_expiry: Duration,
    /// Namespace prefix prepended to every key
    pub prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::S3,
            endpoint: Some("http://localhost:9000".to_string()),
            bucket: DEFAULT_BUCKET.to_string(),
            access_key_id: None,
            secret_access_key: None,
            region: "us-east-1".to_string(),
            allow_http: true,
            local_root: std::env::temp_dir().join("mcda-store"),
            presign_expiry: DEFAULT_PRESIGN_EXPIRY,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl StoreConfig {
    /// Local-filesystem store rooted at `root`
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Local,
            endpoint: None,
            local_root: root.into(),
            ..Self::default()
        }
    }

    /// Build a configuration from environment variables.
    ///
    /// | variable | meaning |
    /// |---|---|
    /// | `MCDA_STORE_BACKEND` | `s3` (default) or `local` |
    /// | `S3_ENDPOINT` / `MINIO_HOSTNAME` | endpoint URL, or a MinIO host on port 9000 |
    /// | `S3_ACCESS_KEY` / `MINIO_ACCESS_KEY` | access key |
    /// | `S3_SECRET_KEY` / `MINIO_SECRET_KEY` | secret key |
    /// | `S3_BUCKET` | bucket (default `bucket1`) |
    /// | `S3_REGION` | region (default `us-east-1`) |
    /// | `S3_ALLOW_HTTP` | `true`/`false` |
    /// | `MCDA_LOCAL_STORE` | root directory of the local backend |
    /// | `MCDA_PRESIGN_EXPIRY_SECS` | presigned URL lifetime |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`StoreConfig::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(backend) = var("MCDA_STORE_BACKEND") {
            config.backend = backend.parse()?;
        }

        if let Some(endpoint) = var("S3_ENDPOINT") {
            config.endpoint = Some(endpoint);
        } else if let Some(host) = var("MINIO_HOSTNAME") {
            config.endpoint = Some(format!("http://{}:9000", host));
        }

        config.access_key_id = var("S3_ACCESS_KEY").or_else(|| var("MINIO_ACCESS_KEY"));
        config.secret_access_key = var("S3_SECRET_KEY").or_else(|| var("MINIO_SECRET_KEY"));

        if let Some(bucket) = var("S3_BUCKET") {
            config.bucket = bucket;
        }
        if let Some(region) = var("S3_REGION") {
            config.region = region;
        }
        if let Some(allow) = var("S3_ALLOW_HTTP") {
            config.allow_http = parse_bool("S3_ALLOW_HTTP", &allow)?;
        } else if let Some(endpoint) = &config.endpoint {
            config.allow_http = endpoint.starts_with("http://");
        }
        if let Some(root) = var("MCDA_LOCAL_STORE") {
            config.local_root = PathBuf::from(root);
        }
        if let Some(secs) = var("MCDA_PRESIGN_EXPIRY_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| CloudError::Config(format!("MCDA_PRESIGN_EXPIRY_SECS is not a number: {}", secs)))?;
            config.presign_expiry = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the selected backend has what it needs.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(CloudError::Config("bucket name is empty".into()));
        }
        if self.presign_expiry.is_zero() || self.presign_expiry > DEFAULT_PRESIGN_EXPIRY {
            return Err(CloudError::Config(format!(
                "presign expiry must be between 1s and {}s",
                DEFAULT_PRESIGN_EXPIRY.as_secs()
            )));
        }
        if self.backend == Backend::S3 {
            if self.endpoint.is_none() {
                return Err(CloudError::Config("S3 backend needs an endpoint".into()));
            }
            if self.access_key_id.is_none() || self.secret_access_key.is_none() {
                return Err(CloudError::Config("S3 backend needs access and secret keys".into()));
            }
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(CloudError::Config(format!("{} must be true or false, got {}", name, value))),
    }
}
