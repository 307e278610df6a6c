//! FK integrity validation.
//!
//! Walks a model's data points, probes every `*_qdrant` reference for
//! existence, and reports orphans per field, without performing any
//! sync. Optionally writes the result back onto the corresponding graph
//! edges (latest orphan count, integrity score, bounded history).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use nexsus_core::error::Result;
use nexsus_core::identity::{graph_uuid, parse_data};

use crate::scheduler::SyncContext;

/// One orphaned reference, for the truncated detail list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanDetail {
    pub source_record_id: u64,
    pub field: String,
    pub target_model: String,
    pub target_record_id: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelIntegrityReport {
    pub model: String,
    pub total_records: u64,
    pub fk_fields_checked: u64,
    pub total_fk_references: u64,
    pub missing_references: u64,
    /// Truncated to the configured cap.
    pub orphan_details: Vec<OrphanDetail>,
    /// References whose UUID would not parse back to a data tuple.
    pub unparseable: u64,
    /// Missing count per target model (or `model_id:<n>` bucket).
    pub missing_by_target: BTreeMap<String, u64>,
}

impl ModelIntegrityReport {
    pub fn integrity_score(&self) -> f64 {
        if self.total_fk_references == 0 {
            1.0
        } else {
            1.0 - self.missing_references as f64 / self.total_fk_references as f64
        }
    }
}

/// Global rollup across the validated models.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub models: Vec<ModelIntegrityReport>,
    pub total_fk_references: u64,
    pub missing_references: u64,
    /// Histogram of missing references by target model.
    pub missing_by_target: BTreeMap<String, u64>,
}

/// Per-field scan result: every referenced UUID with the source records
/// that reference it.
#[derive(Debug, Default)]
pub(crate) struct FieldScan {
    pub total_refs: u64,
    pub refs: BTreeMap<String, Vec<u64>>,
}

#[derive(Debug, Default)]
pub(crate) struct FkScan {
    pub total_records: u64,
    pub fields: BTreeMap<String, FieldScan>,
}

/// Collect all `*_qdrant` references of one model's data points.
pub(crate) async fn scan_fk_refs(ctx: &SyncContext, model: &str) -> Result<FkScan> {
    let filter = nexsus_store::unified::UnifiedStore::data_filter(model);
    let mut scan = FkScan::default();
    ctx.store
        .scroll_each(&filter, ctx.config.scan_batch_size, |points| {
            for point in points {
                scan.total_records += 1;
                let source_id = point.u64_field("record_id").unwrap_or(0);
                for (key, value) in &point.payload {
                    let Some(field) = key.strip_suffix("_qdrant") else {
                        continue;
                    };
                    let slot = scan.fields.entry(field.to_string()).or_default();
                    match value {
                        Value::String(uuid) => {
                            slot.total_refs += 1;
                            slot.refs.entry(uuid.clone()).or_default().push(source_id);
                        }
                        Value::Array(uuids) => {
                            for uuid in uuids.iter().filter_map(Value::as_str) {
                                slot.total_refs += 1;
                                slot.refs
                                    .entry(uuid.to_string())
                                    .or_default()
                                    .push(source_id);
                            }
                        }
                        _ => {}
                    }
                }
            }
        })
        .await?;
    Ok(scan)
}

/// Which of `uuids` have no point in the store.
pub(crate) async fn probe_missing(
    ctx: &SyncContext,
    uuids: &BTreeSet<String>,
    chunk_size: usize,
) -> Result<BTreeSet<String>> {
    let all: Vec<String> = uuids.iter().cloned().collect();
    let mut missing = BTreeSet::new();
    for chunk in all.chunks(chunk_size) {
        let found = ctx.store.retrieve(chunk, false, false).await?;
        let present: BTreeSet<&str> = found.iter().map(|p| p.id.as_str()).collect();
        for uuid in chunk {
            if !present.contains(uuid.as_str()) {
                missing.insert(uuid.clone());
            }
        }
    }
    Ok(missing)
}

/// Resolve an orphan UUID to `(bucket, target_record_id)`; the bucket is
/// the model name when known, `model_id:<n>` otherwise.
pub(crate) fn orphan_bucket(ctx: &SyncContext, uuid: &str) -> Option<(String, u32, u64)> {
    let (model_id, record_id) = parse_data(uuid).ok()?;
    let bucket = ctx
        .registry
        .model_name_by_id(model_id)
        .unwrap_or_else(|| format!("model_id:{model_id}"));
    Some((bucket, model_id, record_id))
}

pub struct IntegrityValidator<'a> {
    ctx: &'a SyncContext,
    /// Write results back into graph edges.
    store_orphans: bool,
    /// Append a bounded history snapshot per validation run.
    track_history: bool,
}

impl<'a> IntegrityValidator<'a> {
    pub fn new(ctx: &'a SyncContext, store_orphans: bool, track_history: bool) -> Self {
        Self {
            ctx,
            store_orphans,
            track_history,
        }
    }

    pub async fn validate_model(&self, model: &str) -> Result<ModelIntegrityReport> {
        // Unknown model is fatal for validation: nothing to scan against.
        let schema = self.ctx.registry.model(model)?;
        let scan = scan_fk_refs(self.ctx, model).await?;

        let mut report = ModelIntegrityReport {
            model: model.to_string(),
            total_records: scan.total_records,
            fk_fields_checked: scan.fields.len() as u64,
            ..Default::default()
        };

        for (field, field_scan) in &scan.fields {
            report.total_fk_references += field_scan.total_refs;
            let referenced: BTreeSet<String> = field_scan.refs.keys().cloned().collect();
            let missing = probe_missing(self.ctx, &referenced, self.ctx.config.probe_chunk_size).await?;

            let mut field_missing_refs = 0u64;
            for uuid in &missing {
                let sources = &field_scan.refs[uuid];
                field_missing_refs += sources.len() as u64;
                match orphan_bucket(self.ctx, uuid) {
                    Some((bucket, _, target_record_id)) => {
                        *report.missing_by_target.entry(bucket.clone()).or_default() +=
                            sources.len() as u64;
                        for source_record_id in sources {
                            if report.orphan_details.len() < self.ctx.config.orphan_detail_cap {
                                report.orphan_details.push(OrphanDetail {
                                    source_record_id: *source_record_id,
                                    field: field.clone(),
                                    target_model: bucket.clone(),
                                    target_record_id,
                                });
                            }
                        }
                    }
                    None => {
                        warn!(model, field, uuid, "unparseable FK reference");
                        report.unparseable += sources.len() as u64;
                    }
                }
            }
            report.missing_references += field_missing_refs;

            if self.store_orphans {
                self.write_edge_feedback(&schema, field, field_missing_refs, field_scan.total_refs)
                    .await?;
            }
        }

        info!(
            model,
            records = report.total_records,
            refs = report.total_fk_references,
            missing = report.missing_references,
            score = report.integrity_score(),
            "integrity validated"
        );
        Ok(report)
    }

    /// Validate several models and roll up.
    pub async fn validate_models(&self, models: &[String]) -> Result<IntegrityReport> {
        let mut rollup = IntegrityReport::default();
        for model in models {
            let report = self.validate_model(model).await?;
            rollup.total_fk_references += report.total_fk_references;
            rollup.missing_references += report.missing_references;
            for (bucket, count) in &report.missing_by_target {
                *rollup.missing_by_target.entry(bucket.clone()).or_default() += count;
            }
            rollup.models.push(report);
        }
        Ok(rollup)
    }

    async fn write_edge_feedback(
        &self,
        schema: &nexsus_core::schema::ModelSchema,
        field: &str,
        orphans: u64,
        total_refs: u64,
    ) -> Result<()> {
        let Some(def) = schema.field(field) else {
            return Ok(());
        };
        let (Some(target_model_id), Some(rel)) =
            (def.fk_model_id, def.field_type.relationship_code())
        else {
            return Ok(());
        };
        let edge_id = graph_uuid(schema.model_id, target_model_id, rel, def.field_id)?;
        let written = self
            .ctx
            .store
            .record_edge_validation(
                edge_id.as_str(),
                Utc::now(),
                orphans,
                total_refs,
                self.track_history,
            )
            .await?;
        if !written {
            warn!(
                model = %schema.model_name,
                field,
                "no graph edge to annotate; run a sync with graph updates first"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::WorkItem;
    use crate::scheduler::CascadeScheduler;
    use crate::testing::fixture;
    use nexsus_core::identity::RelationshipCode;
    use serde_json::json;

    #[tokio::test]
    async fn reports_orphans_per_field() {
        let fx = fixture();
        fx.source
            .add_records("m_parent", vec![json!({"id": 1, "partner_id": [99, "G"]})]);
        let scheduler = CascadeScheduler::new(fx.ctx.clone());
        scheduler
            .run(vec![WorkItem::root("m_parent")], true)
            .await
            .unwrap();

        let validator = IntegrityValidator::new(&fx.ctx, false, false);
        let report = validator.validate_model("m_parent").await.unwrap();

        assert_eq!(report.total_records, 1);
        assert_eq!(report.fk_fields_checked, 1);
        assert_eq!(report.total_fk_references, 1);
        assert_eq!(report.missing_references, 1);
        assert_eq!(report.missing_by_target.get("m_partner"), Some(&1));
        assert_eq!(
            report.orphan_details,
            vec![OrphanDetail {
                source_record_id: 1,
                field: "partner_id".into(),
                target_model: "m_partner".into(),
                target_record_id: 99,
            }]
        );
        assert_eq!(report.integrity_score(), 0.0);
    }

    #[tokio::test]
    async fn clean_model_scores_one() {
        let fx = fixture();
        fx.source
            .add_records("m_parent", vec![json!({"id": 1, "partner_id": [7, "P"]})]);
        fx.source
            .add_records("m_partner", vec![json!({"id": 7, "name": "P"})]);
        let scheduler = CascadeScheduler::new(fx.ctx.clone());
        scheduler
            .run(vec![WorkItem::root("m_parent")], false)
            .await
            .unwrap();

        let validator = IntegrityValidator::new(&fx.ctx, false, false);
        let rollup = validator
            .validate_models(&["m_parent".to_string()])
            .await
            .unwrap();
        assert_eq!(rollup.missing_references, 0);
        assert_eq!(rollup.models[0].integrity_score(), 1.0);
    }

    #[tokio::test]
    async fn feedback_lands_on_graph_edge() {
        let fx = fixture();
        fx.source
            .add_records("m_parent", vec![json!({"id": 1, "partner_id": [99, "G"]})]);
        let scheduler = CascadeScheduler::new(fx.ctx.clone());
        scheduler
            .run(vec![WorkItem::root("m_parent")], true)
            .await
            .unwrap();

        let validator = IntegrityValidator::new(&fx.ctx, true, true);
        validator.validate_model("m_parent").await.unwrap();

        let edge_id = graph_uuid(10, 20, RelationshipCode::ManyToOne, 104).unwrap();
        let edge = fx
            .ctx
            .store
            .get_graph_edge(edge_id.as_str())
            .await
            .unwrap()
            .expect("edge annotated");
        let integrity = edge.integrity.expect("integrity written");
        assert_eq!(integrity.last_validated_orphans, 1);
        assert_eq!(integrity.integrity_score, 0.0);
        assert_eq!(edge.history.len(), 1);
    }

    #[tokio::test]
    async fn validating_unknown_model_fails() {
        let fx = fixture();
        let validator = IntegrityValidator::new(&fx.ctx, false, false);
        assert!(validator.validate_model("m_missing").await.is_err());
    }
}
