//! Artifact keys and references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of an object inside the bucket, e.g. `mcda/<request>/river_masked.tif`.
///
/// Keys are plain `/`-separated strings. Putting an existing key
/// overwrites it; there is no versioning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// Join non-empty segments with `/`, trimming stray slashes.
    pub fn join<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts: Vec<String> = segments
            .into_iter()
            .map(|s| s.as_ref().trim_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self(parts.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Same file name under another prefix
    pub fn rebase(&self, from: &ArtifactKey, to: &ArtifactKey) -> Option<ArtifactKey> {
        let rest = self.0.strip_prefix(from.as_str())?.trim_start_matches('/');
        Some(ArtifactKey::join([to.as_str(), rest]))
    }

    /// Content type stored with the object, chosen by extension.
    pub fn content_type(&self) -> &'static str {
        let ext = self
            .file_name()
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("tif") | Some("tiff") => "image/tiff",
            Some("json") => "application/json",
            Some("prj") | Some("cpg") => "text/plain",
            _ => "application/octet-stream",
        }
    }
}

impl From<&str> for ArtifactKey {
    fn from(s: &str) -> Self {
        ArtifactKey::join([s])
    }
}

impl From<String> for ArtifactKey {
    fn from(s: String) -> Self {
        ArtifactKey::join([s])
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a client receives for a stored artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub bucket: String,
    pub object_key: ArtifactKey,
    pub presigned_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_trims_slashes() {
        let key = ArtifactKey::join(["mcda/", "/abc", "", "river_masked.tif"]);
        assert_eq!(key.as_str(), "mcda/abc/river_masked.tif");
        assert_eq!(key.file_name(), "river_masked.tif");
    }

    #[test]
    fn test_rebase() {
        let staged = ArtifactKey::from("mcda/.staging/r1/road_masked.tif");
        let promoted = staged
            .rebase(&"mcda/.staging/r1".into(), &"mcda/r1".into())
            .unwrap();
        assert_eq!(promoted.as_str(), "mcda/r1/road_masked.tif");
        assert!(staged.rebase(&"other".into(), &"x".into()).is_none());
    }

    #[test]
    fn test_content_type_by_extension() {
        assert_eq!(ArtifactKey::from("a/b.TIF").content_type(), "image/tiff");
        assert_eq!(ArtifactKey::from("a/manifest.json").content_type(), "application/json");
        assert_eq!(ArtifactKey::from("a/b.shp").content_type(), "application/octet-stream");
    }

    #[test]
    fn test_ref_serializes_camel_case() {
        let r = ArtifactRef {
            bucket: "bucket1".into(),
            object_key: "mcda/x.tif".into(),
            presigned_url: "http://h/x".into(),
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["objectKey"], "mcda/x.tif");
        assert_eq!(json["presignedUrl"], "http://h/x");
    }
}
