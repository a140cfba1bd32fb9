//! # MCDA Cloud
//!
//! Staging layer for pipeline artifacts: an S3-compatible bucket (AWS, MinIO)
//! or a local directory, addressed by [`ArtifactKey`] and handed to clients as
//! time-limited presigned URLs.
//!
//! ```no_run
//! # async fn demo() -> mcda_cloud::Result<()> {
//! use mcda_cloud::{ArtifactStore, StoreConfig};
//!
//! let store = ArtifactStore::new(&StoreConfig::from_env()?)?;
//! store.ensure_namespace().await?;
//!
//! let key = store.key(["demo", "hello.txt"]);
//! store.put(&key, bytes::Bytes::from_static(b"hello")).await?;
//! let url = store.presigned_url(&key).await?;
//! assert_eq!(&store.fetch_url(&url).await?[..], b"hello");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod key;
pub mod store;

pub use config::{Backend, StoreConfig, DEFAULT_BUCKET, DEFAULT_PREFIX, DEFAULT_PRESIGN_EXPIRY};
pub use error::{CloudError, Result};
pub use http::HttpClient;
pub use key::{ArtifactKey, ArtifactRef};
pub use store::ArtifactStore;
