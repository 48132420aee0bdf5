//! Persistence callback for completed verifications.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use streamverify_core::VerificationRecord;
use tracing::info;

use crate::error::SinkError;

/// Receives the final text of each successful verification.
///
/// Called at most once per completed request, never for failed ones.
#[async_trait]
pub trait VerificationSink: Send + Sync {
    async fn persist(&self, group_id: &str, final_text: &str) -> Result<(), SinkError>;
}

/// Keeps the latest record per group in memory.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<BTreeMap<String, VerificationRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<VerificationRecord> {
        let records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.values().cloned().collect()
    }

    pub fn get(&self, group_id: &str) -> Option<VerificationRecord> {
        self.records().into_iter().find(|r| r.id == group_id)
    }
}

#[async_trait]
impl VerificationSink for MemorySink {
    async fn persist(&self, group_id: &str, final_text: &str) -> Result<(), SinkError> {
        let record = VerificationRecord::now(group_id, final_text);
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.insert(group_id.to_string(), record);
        Ok(())
    }
}

/// Stores records as a JSON array in a file, one record per group id.
///
/// Re-verifying a group replaces its previous record. Writes go through a
/// temporary file and a rename.
pub struct JsonFileSink {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all stored records. A missing file reads as empty.
    pub async fn load(&self) -> Result<Vec<VerificationRecord>, SinkError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl VerificationSink for JsonFileSink {
    async fn persist(&self, group_id: &str, final_text: &str) -> Result<(), SinkError> {
        let _guard = self.lock.lock().await;

        let mut records = self.load().await?;
        let record = VerificationRecord::now(group_id, final_text);
        match records.iter_mut().find(|r| r.id == group_id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&records)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        info!(path = %self.path.display(), id = group_id, "stored verification");
        Ok(())
    }
}
