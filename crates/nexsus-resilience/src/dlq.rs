//! Dead-letter queue.
//!
//! A bounded, deduplicated record of sync failures, persisted to a JSON
//! file on every mutation (write-to-temp, rename). Re-inserting an entry
//! with the same `(model_name, record_id)` key updates it in place and
//! increments `retry_count`; exceeding the size cap evicts the oldest
//! entries first.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use nexsus_core::error::{NexsusError, Result};

pub const DEFAULT_MAX_DLQ_SIZE: usize = 1000;

/// Where in the pipeline a record failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Config,
    Encoding,
    Embedding,
    Upsert,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Encoding => "encoding",
            Self::Embedding => "embedding",
            Self::Upsert => "upsert",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub record_id: u64,
    pub model_name: String,
    pub model_id: u32,
    pub failure_stage: FailureStage,
    pub error_message: String,
    pub batch_number: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_string: Option<String>,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl DlqEntry {
    fn key(&self) -> (String, u64) {
        (self.model_name.clone(), self.record_id)
    }
}

/// Counts by model and by stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DlqStats {
    pub total: usize,
    pub by_model: BTreeMap<String, usize>,
    pub by_stage: BTreeMap<String, usize>,
}

struct DlqInner {
    /// Insertion-ordered; front is oldest.
    entries: Vec<DlqEntry>,
}

/// File-persisted dead-letter queue. Writes are immediate.
pub struct DeadLetterQueue {
    path: PathBuf,
    max_size: usize,
    inner: Mutex<DlqInner>,
}

impl DeadLetterQueue {
    /// Open (or create) the queue at `path`, loading any persisted entries.
    pub fn open(path: impl Into<PathBuf>, max_size: usize) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| NexsusError::Config(format!("dlq read {}: {e}", path.display())))?;
            serde_json::from_str::<Vec<DlqEntry>>(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "dlq file unreadable, starting empty");
                Vec::new()
            })
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            max_size,
            inner: Mutex::new(DlqInner { entries }),
        })
    }

    /// Insert or update one failed record, then persist.
    pub fn push(&self, entry: DlqEntry) -> Result<()> {
        let mut inner = self.inner.lock();
        let key = entry.key();
        if let Some(existing) = inner.entries.iter_mut().find(|e| e.key() == key) {
            let retries = existing.retry_count + 1;
            *existing = entry;
            existing.retry_count = retries;
            debug!(
                model = %existing.model_name,
                record_id = existing.record_id,
                retry_count = retries,
                "dlq entry updated"
            );
        } else {
            let mut entry = entry;
            if entry.retry_count == 0 {
                entry.retry_count = 1;
            }
            inner.entries.push(entry);
            while inner.entries.len() > self.max_size {
                let evicted = inner.entries.remove(0);
                warn!(
                    model = %evicted.model_name,
                    record_id = evicted.record_id,
                    "dlq full, evicted oldest entry"
                );
            }
        }
        self.persist(&inner.entries)
    }

    pub fn get(&self) -> Vec<DlqEntry> {
        self.inner.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> DlqStats {
        let inner = self.inner.lock();
        let mut stats = DlqStats {
            total: inner.entries.len(),
            ..Default::default()
        };
        for entry in &inner.entries {
            *stats.by_model.entry(entry.model_name.clone()).or_default() += 1;
            *stats
                .by_stage
                .entry(entry.failure_stage.as_str().to_string())
                .or_default() += 1;
        }
        stats
    }

    /// Remove entries, optionally scoped to one model. Returns how many
    /// were dropped.
    pub fn clear(&self, model: Option<&str>) -> Result<usize> {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        match model {
            Some(model) => inner.entries.retain(|e| e.model_name != model),
            None => inner.entries.clear(),
        }
        let removed = before - inner.entries.len();
        self.persist(&inner.entries)?;
        Ok(removed)
    }

    fn persist(&self, entries: &[DlqEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| NexsusError::Config(format!("dlq dir {}: {e}", parent.display())))?;
            }
        }
        write_json_atomic(&self.path, entries)
    }
}

/// Serialize `value` to `path` via a temp file + rename, so readers never
/// observe a torn write.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)
        .map_err(|e| NexsusError::Config(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| NexsusError::Config(format!("rename {} -> {}: {e}", tmp.display(), path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(model: &str, record_id: u64, stage: FailureStage) -> DlqEntry {
        DlqEntry {
            record_id,
            model_name: model.into(),
            model_id: 10,
            failure_stage: stage,
            error_message: "boom".into(),
            batch_number: 1,
            encoded_string: None,
            failed_at: Utc::now(),
            retry_count: 0,
        }
    }

    #[test]
    fn dedup_increments_retry_count() {
        let dir = tempdir().unwrap();
        let dlq = DeadLetterQueue::open(dir.path().join("dlq.json"), 10).unwrap();
        dlq.push(entry("m1", 7, FailureStage::Embedding)).unwrap();
        dlq.push(entry("m1", 7, FailureStage::Embedding)).unwrap();
        let entries = dlq.get();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].retry_count, 2);
    }

    #[test]
    fn cap_evicts_oldest_first() {
        let dir = tempdir().unwrap();
        let dlq = DeadLetterQueue::open(dir.path().join("dlq.json"), 3).unwrap();
        for id in 1..=4 {
            dlq.push(entry("m1", id, FailureStage::Upsert)).unwrap();
        }
        let ids: Vec<u64> = dlq.get().iter().map(|e| e.record_id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dlq.json");
        {
            let dlq = DeadLetterQueue::open(&path, 10).unwrap();
            dlq.push(entry("m1", 1, FailureStage::Encoding)).unwrap();
            dlq.push(entry("m2", 2, FailureStage::Embedding)).unwrap();
        }
        let dlq = DeadLetterQueue::open(&path, 10).unwrap();
        assert_eq!(dlq.len(), 2);
        let stats = dlq.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_model["m1"], 1);
        assert_eq!(stats.by_stage["embedding"], 1);
    }

    #[test]
    fn clear_scoped_to_model() {
        let dir = tempdir().unwrap();
        let dlq = DeadLetterQueue::open(dir.path().join("dlq.json"), 10).unwrap();
        dlq.push(entry("m1", 1, FailureStage::Upsert)).unwrap();
        dlq.push(entry("m2", 2, FailureStage::Upsert)).unwrap();
        assert_eq!(dlq.clear(Some("m1")).unwrap(), 1);
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq.clear(None).unwrap(), 1);
        assert!(dlq.is_empty());
    }

    #[test]
    fn unreadable_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dlq.json");
        fs::write(&path, "not json").unwrap();
        let dlq = DeadLetterQueue::open(&path, 10).unwrap();
        assert!(dlq.is_empty());
    }
}
