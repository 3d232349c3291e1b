//! Record storage behind a swappable interface
//!
//! The tracker is a best-effort durability layer over authoritative on-chain
//! state; production uses a flat JSON file and an embedded or remote store
//! can be slotted in without touching the tracker. Persisting is an upsert:
//! records already in the store stay there even after the tracker's bounded
//! cache has evicted them, so the full history survives.

use crate::error::{AgentError, Result};
use crate::tracker::record::TransactionRecord;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

/// Storage seam for transaction records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load the most recent `limit` records, newest last
    async fn load_recent(&self, limit: usize) -> Result<Vec<TransactionRecord>>;

    /// Upsert the given records by id; stored records not named are kept
    async fn persist(&self, records: &[TransactionRecord]) -> Result<()>;
}

/// Flat-file JSON store; persists merge into the file so the full history
/// survives cache eviction in the tracker
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes rewrites so concurrent persists cannot interleave
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    // Reads the full record set; callers that mutate must hold `write_lock`
    async fn read_all(&self) -> Result<Vec<TransactionRecord>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("record store {} does not exist yet", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(AgentError::Io(e)),
        };

        if data.trim().is_empty() {
            return Ok(Vec::new());
        }

        Ok(serde_json::from_str(&data)?)
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn load_recent(&self, limit: usize) -> Result<Vec<TransactionRecord>> {
        let mut records = self.read_all().await?;
        if records.len() > limit {
            records.drain(..records.len() - limit);
        }
        Ok(records)
    }

    async fn persist(&self, records: &[TransactionRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut all = self.read_all().await?;
        for record in records {
            match all.iter_mut().find(|r| r.id == record.id) {
                Some(slot) => *slot = record.clone(),
                None => all.push(record.clone()),
            }
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a sibling temp file first so a crash never truncates the store
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(&all)?;
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("persisted {} records to {}", all.len(), self.path.display());
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<TransactionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn load_recent(&self, limit: usize) -> Result<Vec<TransactionRecord>> {
        let records = self.records.lock().await;
        let start = records.len().saturating_sub(limit);
        Ok(records[start..].to_vec())
    }

    async fn persist(&self, records: &[TransactionRecord]) -> Result<()> {
        let mut all = self.records.lock().await;
        for record in records {
            match all.iter_mut().find(|r| r.id == record.id) {
                Some(slot) => *slot = record.clone(),
                None => all.push(record.clone()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("records.json"));

        assert!(store.load_recent(10).await.unwrap().is_empty());

        let records = vec![
            TransactionRecord::new("job-1", "0xaaa", "fund-a"),
            TransactionRecord::new("job-2", "0xbbb", "fund-b"),
        ];
        store.persist(&records).await.unwrap();

        let loaded = store.load_recent(10).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].job_id, "job-1");
        assert_eq!(loaded[1].job_id, "job-2");
    }

    #[tokio::test]
    async fn test_file_store_limit_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("records.json"));

        let records: Vec<_> = (0..5)
            .map(|i| TransactionRecord::new(&format!("job-{i}"), "0xaaa", "fund"))
            .collect();
        store.persist(&records).await.unwrap();

        let loaded = store.load_recent(2).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].job_id, "job-3");
        assert_eq!(loaded[1].job_id, "job-4");
    }

    #[tokio::test]
    async fn test_file_store_persist_merges_with_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("records.json"));

        let first = TransactionRecord::new("job-1", "0xaaa", "fund-a");
        store.persist(&[first.clone()]).await.unwrap();

        // A later persist that no longer carries job-1 must not erase it
        let mut second = TransactionRecord::new("job-2", "0xbbb", "fund-b");
        store.persist(&[second.clone()]).await.unwrap();

        let loaded = store.load_recent(10).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].job_id, "job-1");

        // Same id replaces the stored copy in place
        second.error = Some("boom".into());
        store.persist(&[second]).await.unwrap();
        let loaded = store.load_recent(10).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        let records = vec![TransactionRecord::new("job-1", "0xaaa", "fund")];
        store.persist(&records).await.unwrap();
        assert_eq!(store.load_recent(10).await.unwrap().len(), 1);
    }
}
