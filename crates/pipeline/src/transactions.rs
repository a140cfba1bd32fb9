//! Transaction log for stored artifacts.
//!
//! Records are informational; a failed write is logged and never fails
//! the request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mcda_cloud::ArtifactKey;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// One stored artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub action: String,
    pub bucket: String,
    pub object_key: ArtifactKey,
    pub request_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(action: impl Into<String>, bucket: impl Into<String>, object_key: ArtifactKey, request_id: Uuid) -> Self {
        Self {
            action: action.into(),
            bucket: bucket.into(),
            object_key,
            request_id,
            created_at: Utc::now(),
        }
    }
}

/// Sink for transaction records
#[async_trait]
pub trait TransactionLog: Send + Sync {
    async fn record(&self, record: &TransactionRecord) -> io::Result<()>;
}

/// Emits each record as a tracing event
#[derive(Debug, Clone, Default)]
pub struct TracingTransactionLog;

#[async_trait]
impl TransactionLog for TracingTransactionLog {
    async fn record(&self, record: &TransactionRecord) -> io::Result<()> {
        info!(
            target: "mcda::transactions",
            action = %record.action,
            bucket = %record.bucket,
            object_key = %record.object_key,
            request_id = %record.request_id,
            "artifact stored"
        );
        Ok(())
    }
}

/// Appends one JSON object per line to a file
#[derive(Debug)]
pub struct JsonLinesTransactionLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesTransactionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TransactionLog for JsonLinesTransactionLog {
    async fn record(&self, record: &TransactionRecord) -> io::Result<()> {
        let mut line = serde_json::to_vec(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_json_lines_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonLinesTransactionLog::new(dir.path().join("tx.jsonl"));
        let request_id = Uuid::new_v4();

        for name in ["a.tif", "b.tif"] {
            let record = TransactionRecord::new("upload", "bucket1", ArtifactKey::from(name), request_id);
            log.record(&record).await.unwrap();
        }

        let text = std::fs::read_to_string(log.path()).unwrap();
        let records: Vec<TransactionRecord> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].object_key.as_str(), "b.tif");
        assert_eq!(records[0].request_id, request_id);
    }

    #[tokio::test]
    async fn test_unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonLinesTransactionLog::new(dir.path().join("missing").join("tx.jsonl"));
        let record = TransactionRecord::new("upload", "bucket1", ArtifactKey::from("a"), Uuid::nil());
        assert!(log.record(&record).await.is_err());
    }
}
