//! Per-model sync watermarks.
//!
//! One JSON file per model records the last successful sync time and
//! count; incremental syncs without an explicit date window start from
//! here. Files are replaced atomically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use nexsus_core::error::{NexsusError, Result};
use nexsus_resilience::dlq::write_json_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    pub model: String,
    pub last_synced: DateTime<Utc>,
    pub records_synced: u64,
}

pub struct WatermarkStore {
    dir: PathBuf,
}

impl WatermarkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, model: &str) -> PathBuf {
        // Model names contain dots; keep them, they are path-safe.
        self.dir.join(format!("{model}.json"))
    }

    pub fn load(&self, model: &str) -> Result<Option<Watermark>> {
        let path = self.path(model);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| NexsusError::Config(format!("watermark {}: {e}", path.display())))?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn save(&self, watermark: &Watermark) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| NexsusError::Config(format!("watermark dir {}: {e}", self.dir.display())))?;
        let path = self.path(&watermark.model);
        write_json_atomic(&path, watermark)?;
        debug!(model = %watermark.model, path = %path.display(), "watermark saved");
        Ok(())
    }

    pub fn clear(&self, model: &str) -> Result<()> {
        let path = self.path(model);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| NexsusError::Config(format!("watermark {}: {e}", path.display())))?;
        }
        Ok(())
    }
}

/// All watermark files currently present.
pub fn list_watermarks(dir: &Path) -> Vec<Watermark> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut marks: Vec<Watermark> = entries
        .flatten()
        .filter_map(|entry| {
            let raw = fs::read_to_string(entry.path()).ok()?;
            serde_json::from_str(&raw).ok()
        })
        .collect();
    marks.sort_by(|a, b| a.model.cmp(&b.model));
    marks
}
