//! Two-phase artifact commit.
//!
//! Outputs of a request are uploaded under `<prefix>/.staging/<request_id>/`
//! and only copied to `<prefix>/<request_id>/` once every part of the
//! request has succeeded. On failure everything the request wrote is
//! deleted.

use crate::error::{PipelineError, Result, Stage};
use bytes::Bytes;
use mcda_cloud::{ArtifactKey, ArtifactStore, CloudError};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pending artifacts of one request.
///
/// `stage` takes `&self` so the role sub-pipelines can upload concurrently.
pub struct ArtifactTransaction {
    store: Arc<ArtifactStore>,
    request_id: Uuid,
    staging_prefix: ArtifactKey,
    final_prefix: ArtifactKey,
    staged: Mutex<Vec<ArtifactKey>>,
}

impl ArtifactTransaction {
    pub fn begin(store: Arc<ArtifactStore>, request_id: Uuid) -> Self {
        let id = request_id.to_string();
        let staging_prefix = store.key([".staging", id.as_str()]);
        let final_prefix = store.key([id.as_str()]);
        Self {
            store,
            request_id,
            staging_prefix,
            final_prefix,
            staged: Mutex::new(Vec::new()),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Key `file` will have once committed
    pub fn final_key(&self, file: &str) -> ArtifactKey {
        ArtifactKey::join([self.final_prefix.as_str(), file])
    }

    /// Upload `data` to the staging area and return its final key.
    pub async fn stage(&self, file: &str, data: Bytes) -> Result<ArtifactKey> {
        let staged = ArtifactKey::join([self.staging_prefix.as_str(), file]);
        // recorded before the put so a cancelled upload is still cleaned up
        self.pending().push(staged.clone());

        self.store
            .put(&staged, data)
            .await
            .map_err(|e| PipelineError::cloud(Stage::Store, e))?;
        Ok(self.final_key(file))
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Vec<ArtifactKey>> {
        self.staged.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_pending(&self) -> Vec<ArtifactKey> {
        std::mem::take(&mut *self.pending())
    }

    /// Promote every staged artifact and return the final keys.
    ///
    /// If any promotion fails, both staged and already promoted objects are
    /// deleted and the error is returned.
    pub async fn commit(self) -> Result<Vec<ArtifactKey>> {
        let staged = self.take_pending();
        let mut promoted = Vec::with_capacity(staged.len());

        for key in &staged {
            let target = key.rebase(&self.staging_prefix, &self.final_prefix).ok_or_else(|| {
                PipelineError::storage(Stage::Store, format!("{} is outside {}", key, self.staging_prefix))
            })?;
            promoted.push(target.clone());

            if let Err(e) = self.store.copy(key, &target).await {
                warn!(request_id = %self.request_id, key = %key, error = %e, "promotion failed, rolling back");
                self.delete_all(staged.iter().chain(promoted.iter())).await;
                return Err(PipelineError::cloud(Stage::Store, e));
            }
        }

        self.delete_all(staged.iter()).await;
        info!(request_id = %self.request_id, artifacts = promoted.len(), "committed artifacts");
        Ok(promoted)
    }

    /// Delete everything staged so far.
    pub async fn rollback(self) {
        let staged = self.take_pending();
        if !staged.is_empty() {
            warn!(request_id = %self.request_id, artifacts = staged.len(), "rolling back staged artifacts");
        }
        self.delete_all(staged.iter()).await;
    }

    async fn delete_all<'a>(&self, keys: impl Iterator<Item = &'a ArtifactKey>) {
        for key in keys {
            match self.store.delete(key).await {
                Ok(()) => debug!(key = %key, "deleted"),
                Err(CloudError::NotFound { .. }) => {}
                Err(e) => warn!(key = %key, error = %e, "failed to delete artifact"),
            }
        }
    }
}
