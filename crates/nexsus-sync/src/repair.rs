//! Orphan repair.
//!
//! Discovers FK references whose target points are missing, groups them
//! by target model, and drives targeted resyncs through the cascade
//! scheduler. Running repair twice over unchanged data performs zero
//! writes the second time: every target then exists.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

use nexsus_core::error::Result;

use crate::integrity::{orphan_bucket, probe_missing, scan_fk_refs};
use crate::queue::WorkItem;
use crate::scheduler::{CascadeScheduler, SyncContext};

/// Repair summary per target model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRepair {
    pub found: u64,
    pub synced: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairReport {
    pub found: u64,
    pub synced: u64,
    pub failed: u64,
    pub skipped: u64,
    pub by_model: BTreeMap<String, ModelRepair>,
    /// Buckets that cannot be synced (`model_id:<n>`, unparseable).
    pub unresolvable: BTreeMap<String, u64>,
}

pub struct OrphanRepair {
    ctx: Arc<SyncContext>,
    /// Per-model cap on targeted resync size.
    sync_limit: usize,
}

impl OrphanRepair {
    pub fn new(ctx: Arc<SyncContext>, sync_limit: usize) -> Self {
        Self { ctx, sync_limit }
    }

    /// Find orphan targets referenced from `source_model`, grouped by
    /// target model name.
    pub async fn find_orphans(&self, source_model: &str) -> Result<BTreeMap<String, BTreeSet<u64>>> {
        let scan = scan_fk_refs(&self.ctx, source_model).await?;
        let mut groups: BTreeMap<String, BTreeSet<u64>> = BTreeMap::new();

        for field_scan in scan.fields.values() {
            let referenced: BTreeSet<String> = field_scan.refs.keys().cloned().collect();
            let missing =
                probe_missing(&self.ctx, &referenced, self.ctx.config.probe_chunk_size).await?;
            for uuid in missing {
                match orphan_bucket(&self.ctx, &uuid) {
                    Some((bucket, _, record_id)) => {
                        groups.entry(bucket).or_default().insert(record_id);
                    }
                    None => {
                        groups
                            .entry("unparseable".to_string())
                            .or_default()
                            .insert(0);
                    }
                }
            }
        }
        Ok(groups)
    }

    /// Repair orphans referenced from one source model.
    pub async fn repair_model(&self, source_model: &str) -> Result<RepairReport> {
        let groups = self.find_orphans(source_model).await?;
        self.repair_groups(groups).await
    }

    /// Repair orphans referenced from every known model.
    pub async fn repair_all(&self) -> Result<RepairReport> {
        let mut merged: BTreeMap<String, BTreeSet<u64>> = BTreeMap::new();
        for model in self.ctx.registry.model_names() {
            for (bucket, ids) in self.find_orphans(&model).await? {
                merged.entry(bucket).or_default().extend(ids);
            }
        }
        self.repair_groups(merged).await
    }

    async fn repair_groups(&self, groups: BTreeMap<String, BTreeSet<u64>>) -> Result<RepairReport> {
        let mut report = RepairReport::default();
        let mut items: Vec<WorkItem> = Vec::new();

        for (bucket, ids) in groups {
            let found = ids.len() as u64;
            report.found += found;

            // Unknown model ids are reported but never synced.
            if !self.ctx.registry.model_exists(&bucket) {
                warn!(bucket = %bucket, orphans = found, "orphans point at unknown model, skipping");
                report.skipped += found;
                report.unresolvable.insert(bucket, found);
                continue;
            }

            let mut ids: Vec<u64> = ids.into_iter().collect();
            let capped = ids.len().saturating_sub(self.sync_limit) as u64;
            ids.truncate(self.sync_limit);

            let entry = report.by_model.entry(bucket.clone()).or_default();
            entry.found = found;
            entry.skipped = capped;
            report.skipped += capped;

            items.push(WorkItem::targeted(bucket, ids));
        }

        if items.is_empty() {
            info!("no repairable orphans found");
            return Ok(report);
        }

        let scheduler = CascadeScheduler::new(self.ctx.clone());
        let run = scheduler.run(items, true).await?;
        report.synced = run.records_synced;
        report.failed = run.records_failed;

        for entry in report.by_model.values_mut() {
            entry.synced = entry.found - entry.skipped;
        }

        info!(
            found = report.found,
            synced = report.synced,
            failed = report.failed,
            skipped = report.skipped,
            "orphan repair finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::WorkItem;
    use crate::scheduler::CascadeScheduler;
    use crate::testing::fixture;
    use serde_json::json;

    /// Sync only m_parent, leaving its partner reference dangling.
    async fn seed_with_orphan(fx: &crate::testing::Fixture) {
        fx.source
            .add_records("m_parent", vec![json!({"id": 1, "partner_id": [99, "G"]})]);
        fx.source
            .add_records("m_partner", vec![json!({"id": 99, "name": "G"})]);
        let scheduler = CascadeScheduler::new(fx.ctx.clone());
        scheduler
            .run(vec![WorkItem::root("m_parent")], true) // no cascade
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn find_orphans_groups_by_target_model() {
        let fx = fixture();
        seed_with_orphan(&fx).await;

        let repair = OrphanRepair::new(fx.ctx.clone(), 5000);
        let groups = repair.find_orphans("m_parent").await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups["m_partner"], BTreeSet::from([99]));
    }

    #[tokio::test]
    async fn repair_syncs_missing_targets() {
        let fx = fixture();
        seed_with_orphan(&fx).await;

        let repair = OrphanRepair::new(fx.ctx.clone(), 5000);
        let report = repair.repair_model("m_parent").await.unwrap();
        assert_eq!(report.found, 1);
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 0);
        assert!(report.by_model.contains_key("m_partner"));

        // The orphan target now exists.
        assert_eq!(fx.ctx.store.count_data("m_partner").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn second_repair_run_performs_zero_writes() {
        let fx = fixture();
        seed_with_orphan(&fx).await;

        let repair = OrphanRepair::new(fx.ctx.clone(), 5000);
        repair.repair_model("m_parent").await.unwrap();

        let writes_before = fx.memory.upsert_count();
        let report = repair.repair_model("m_parent").await.unwrap();
        assert_eq!(report.found, 0);
        assert_eq!(report.synced, 0);
        assert_eq!(fx.memory.upsert_count(), writes_before);
    }

    #[tokio::test]
    async fn sync_limit_caps_each_model_group() {
        let fx = fixture();
        fx.source.add_records(
            "m_parent",
            (1..=4)
                .map(|i| json!({"id": i, "partner_id": [100 + i, "X"]}))
                .collect(),
        );
        for i in 1..=4 {
            fx.source
                .add_records("m_partner", vec![json!({"id": 100 + i, "name": "X"})]);
        }
        let scheduler = CascadeScheduler::new(fx.ctx.clone());
        scheduler
            .run(vec![WorkItem::root("m_parent")], true)
            .await
            .unwrap();

        let repair = OrphanRepair::new(fx.ctx.clone(), 2);
        let report = repair.repair_model("m_parent").await.unwrap();
        assert_eq!(report.found, 4);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.by_model["m_partner"].skipped, 2);
    }
}
