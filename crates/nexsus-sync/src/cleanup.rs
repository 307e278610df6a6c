//! Stale-point cleanup.
//!
//! Removes data points whose record id no longer exists in the source.
//! Cascaded child points of removed parents are kept; the integrity
//! validator will flag them as orphans if their references break.

use std::collections::BTreeSet;
use tracing::info;

use nexsus_core::error::Result;
use nexsus_core::identity::data_uuid;
use nexsus_store::store::DeleteSelector;
use nexsus_store::unified::UnifiedStore;

use crate::scheduler::SyncContext;
use crate::source::Domain;

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub model: String,
    pub store_records: u64,
    pub source_records: u64,
    pub stale: u64,
    pub deleted: u64,
    pub dry_run: bool,
}

/// Diff the store against the source and delete stale data points.
pub async fn cleanup_model(ctx: &SyncContext, model: &str, dry_run: bool) -> Result<CleanupReport> {
    let schema = ctx.registry.model(model)?;

    // Record ids currently in the store.
    let mut store_ids: BTreeSet<u64> = BTreeSet::new();
    ctx.store
        .scroll_each(
            &UnifiedStore::data_filter(model),
            ctx.config.scan_batch_size,
            |points| {
                for point in points {
                    if let Some(id) = point.u64_field("record_id") {
                        store_ids.insert(id);
                    }
                }
            },
        )
        .await?;

    // Record ids the source still has.
    let mut source_ids: BTreeSet<u64> = BTreeSet::new();
    let mut offset = 0usize;
    let id_field = vec!["id".to_string()];
    loop {
        let page = ctx
            .source
            .fetch(model, &Domain::new(), &id_field, offset, ctx.config.fetch_batch_size)
            .await?;
        if page.is_empty() {
            break;
        }
        offset += page.len();
        for record in &page {
            if let Some(id) = record.get("id").and_then(serde_json::Value::as_u64) {
                source_ids.insert(id);
            }
        }
    }

    let stale: Vec<u64> = store_ids.difference(&source_ids).copied().collect();
    let mut report = CleanupReport {
        model: model.to_string(),
        store_records: store_ids.len() as u64,
        source_records: source_ids.len() as u64,
        stale: stale.len() as u64,
        deleted: 0,
        dry_run,
    };

    if !dry_run && !stale.is_empty() {
        let ids: Vec<String> = stale
            .iter()
            .filter_map(|rid| data_uuid(schema.model_id, *rid).ok())
            .map(|id| id.into_string())
            .collect();
        ctx.store.delete(DeleteSelector::Ids(ids)).await?;
        report.deleted = stale.len() as u64;
    }

    info!(
        model,
        in_store = report.store_records,
        in_source = report.source_records,
        stale = report.stale,
        deleted = report.deleted,
        dry_run,
        "cleanup finished"
    );
    Ok(report)
}
