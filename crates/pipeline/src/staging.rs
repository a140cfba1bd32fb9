//! Per-request local staging.
//!
//! Each request gets its own directory named by a fresh request id, and an
//! explicit table of which uploaded file fills which slot. Nothing is keyed
//! by the uploaded file name alone, so concurrent requests never share a
//! path.

use crate::error::{PipelineError, Result, Stage};
use crate::roles::StagingSlot;
use mcda_core::io::primary_files;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Parent directory for request staging directories.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
    keep: bool,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>, keep: bool) -> Self {
        Self { root: root.into(), keep }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a fresh staging directory for one request.
    pub fn begin(&self) -> Result<RequestStaging> {
        let request_id = Uuid::new_v4();
        let dir = self.root.join(request_id.to_string());
        std::fs::create_dir_all(&dir).map_err(|e| {
            PipelineError::storage(Stage::Upload, format!("cannot create {}: {}", dir.display(), e))
        })?;

        debug!(%request_id, dir = %dir.display(), "opened request staging");
        Ok(RequestStaging {
            request_id,
            dir,
            slots: BTreeMap::new(),
            keep: self.keep,
        })
    }
}

/// Staging directory and slot table of a single request.
///
/// The directory is removed on drop unless the area was configured to
/// keep it.
#[derive(Debug)]
pub struct RequestStaging {
    request_id: Uuid,
    dir: PathBuf,
    slots: BTreeMap<StagingSlot, Vec<PathBuf>>,
    keep: bool,
}

impl RequestStaging {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Working directory of a slot; stage outputs are written next to inputs
    pub fn slot_dir(&self, slot: StagingSlot) -> PathBuf {
        self.dir.join(slot.dir_name())
    }

    /// Write an uploaded file into `slot`.
    ///
    /// `file_name` is reduced to a plain file name first. Re-adding the same
    /// name overwrites the earlier file.
    pub async fn add_file(&mut self, slot: StagingSlot, file_name: &str, data: &[u8]) -> Result<PathBuf> {
        let name = sanitize_file_name(file_name).ok_or_else(|| {
            PipelineError::invalid(
                Stage::Upload,
                format!("invalid file name '{}' for field {}", file_name, slot.field_name()),
            )
        })?;

        let dir = self.slot_dir(slot);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PipelineError::storage(Stage::Upload, format!("cannot create {}: {}", dir.display(), e)))?;

        let path = dir.join(&name);
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| PipelineError::storage(Stage::Upload, format!("cannot write {}: {}", path.display(), e)))?;

        let files = self.slots.entry(slot).or_default();
        if !files.contains(&path) {
            files.push(path.clone());
        }
        debug!(request_id = %self.request_id, field = slot.field_name(), size = data.len(), file = %name, "staged upload");
        Ok(path)
    }

    /// Files staged in `slot`, in upload order
    pub fn files(&self, slot: StagingSlot) -> &[PathBuf] {
        self.slots.get(&slot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The file a stage reads for `slot`: the `.shp` of a vector slot, the
    /// GeoTIFF (or the only file) of the reference slot.
    pub fn primary(&self, slot: StagingSlot) -> Result<PathBuf> {
        let files = self.files(slot);
        let found = if slot.is_vector() {
            primary_files(files).into_iter().next()
        } else {
            files
                .iter()
                .find(|p| has_extension(p, &["tif", "tiff"]))
                .or_else(|| files.first())
                .cloned()
        };

        found.ok_or_else(|| {
            let expected = if slot.is_vector() { "a .shp file" } else { "a GeoTIFF" };
            PipelineError::invalid(
                Stage::Upload,
                format!("field {} must carry {}", slot.field_name(), expected),
            )
        })
    }

    /// Check that every required slot has its primary file.
    pub fn check_complete(&self) -> Result<()> {
        for slot in StagingSlot::REQUIRED {
            self.primary(slot)?;
        }
        Ok(())
    }
}

impl Drop for RequestStaging {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), error = %e, "failed to remove request staging");
            }
        }
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// Reduce an uploaded name to a safe file name, or `None` if nothing usable
/// remains.
///
/// Directory components are dropped, characters outside `[A-Za-z0-9._-]`
/// become `_` and leading dots are stripped.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::LayerRole;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("river.shp").as_deref(), Some("river.shp"));
        assert_eq!(sanitize_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_file_name("C:\\data\\road line.shp").as_deref(), Some("road_line.shp"));
        assert_eq!(sanitize_file_name("..").as_deref(), None);
        assert_eq!(sanitize_file_name("").as_deref(), None);
    }

    #[tokio::test]
    async fn test_requests_are_isolated() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path(), false);

        let mut a = area.begin().unwrap();
        let mut b = area.begin().unwrap();
        assert_ne!(a.request_id(), b.request_id());

        let slot = StagingSlot::Layer(LayerRole::River);
        let pa = a.add_file(slot, "river.shp", b"a").await.unwrap();
        let pb = b.add_file(slot, "river.shp", b"b").await.unwrap();

        assert_ne!(pa, pb);
        assert_eq!(std::fs::read(&pa).unwrap(), b"a");
        assert_eq!(std::fs::read(&pb).unwrap(), b"b");
    }

    #[tokio::test]
    async fn test_primary_and_completeness() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path(), false);
        let mut staging = area.begin().unwrap();

        let slot = StagingSlot::Layer(LayerRole::Road);
        staging.add_file(slot, "road.dbf", b"").await.unwrap();
        assert!(staging.primary(slot).is_err());

        staging.add_file(slot, "road.SHP", b"").await.unwrap();
        assert!(staging.primary(slot).unwrap().ends_with("road.SHP"));

        staging.add_file(StagingSlot::Reference, "ref.tif", b"").await.unwrap();
        assert!(staging.primary(StagingSlot::Reference).unwrap().ends_with("ref.tif"));

        let err = staging.check_complete().unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_drop_removes_directory_unless_kept() {
        let root = tempfile::tempdir().unwrap();

        let dir = {
            let mut staging = StagingArea::new(root.path(), false).begin().unwrap();
            staging.add_file(StagingSlot::Aoi, "aoi.shp", b"x").await.unwrap();
            staging.dir().to_path_buf()
        };
        assert!(!dir.exists());

        let dir = {
            let staging = StagingArea::new(root.path(), true).begin().unwrap();
            staging.dir().to_path_buf()
        };
        assert!(dir.exists());
    }
}
