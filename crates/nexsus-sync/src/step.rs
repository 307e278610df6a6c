//! The per-model sync step.
//!
//! One worker runs one step start-to-finish: fetch records in batches,
//! transform, embed, upsert, fold FK observations into graph edges, and
//! hand back cascade work items for the scheduler. Failures degrade at
//! record granularity into the DLQ; a cancelled run finishes its current
//! batch and releases.

use ahash::AHashMap;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use nexsus_core::error::{NexsusError, Result};
use nexsus_core::point::Point;
use nexsus_core::transform::{FkRef, RecordTransformer, TransformedRecord};
use nexsus_core::value::decode_record;
use nexsus_resilience::dlq::{DlqEntry, FailureStage};
use nexsus_store::graph::GraphEdge;

use crate::queue::{VisitedSet, WorkItem};
use crate::scheduler::SyncContext;
use crate::source::ids_domain;

/// What one step did.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub model_name: String,
    pub fetched: u64,
    pub synced: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cascade_items: Vec<WorkItem>,
    /// The step stopped early (cancellation or an open breaker).
    pub aborted: bool,
}

/// Per-FK-field aggregate across the records of one step.
#[derive(Debug, Default)]
struct FkAggregate {
    field_id: u64,
    field_label: String,
    field_type: Option<nexsus_core::schema::FieldType>,
    target_model: String,
    target_model_id: u32,
    total_references: u64,
    distinct_targets: BTreeSet<u64>,
}

pub async fn run_step(
    ctx: &SyncContext,
    item: &WorkItem,
    visited: &Mutex<VisitedSet>,
    cancel: &watch::Receiver<bool>,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome {
        model_name: item.model_name.clone(),
        ..Default::default()
    };

    // Stage 1: resolve the model; unknown models are a config failure.
    let schema = match ctx.registry.model(&item.model_name) {
        Ok(schema) => schema,
        Err(err) => {
            ctx.dlq.push(DlqEntry {
                record_id: 0,
                model_name: item.model_name.clone(),
                model_id: 0,
                failure_stage: FailureStage::Config,
                error_message: err.to_string(),
                batch_number: 0,
                encoded_string: None,
                failed_at: Utc::now(),
                retry_count: 0,
            })?;
            return Err(err);
        }
    };

    let skip_existing = item.skip_existing.unwrap_or(ctx.config.skip_existing);
    let pattern = ctx.patterns.get(&item.model_name);
    let transformer = RecordTransformer::new(&schema, pattern);
    let fields: Vec<String> = schema
        .fields
        .iter()
        .filter(|f| f.stored)
        .map(|f| f.field_name.clone())
        .collect();

    let mut aggregates: AHashMap<String, FkAggregate> = AHashMap::new();
    let mut batch_number = 0usize;

    // Stage 2: resolve which record ids this step will fetch.
    if item.record_ids.is_empty() {
        // Whole-model sync: page by offset, filter visited per page.
        let mut offset = 0usize;
        loop {
            if *cancel.borrow() {
                outcome.aborted = true;
                break;
            }
            let raw = ctx
                .source
                .fetch(
                    &item.model_name,
                    &item.extra_domain,
                    &fields,
                    offset,
                    ctx.config.fetch_batch_size,
                )
                .await?;
            if raw.is_empty() {
                break;
            }
            offset += raw.len();
            batch_number += 1;
            let aborted = process_batch(
                ctx,
                &schema,
                &transformer,
                raw,
                visited,
                BatchFilter {
                    check_visited: true,
                    skip_existing,
                },
                batch_number,
                &mut outcome,
                &mut aggregates,
            )
            .await?;
            if aborted {
                outcome.aborted = true;
                break;
            }
        }
    } else {
        let wanted = {
            let mut visited = visited.lock();
            visited.filter_unvisited(&item.model_name, &item.record_ids)
        };
        outcome.skipped += (item.record_ids.len() - wanted.len()) as u64;

        let wanted = if skip_existing && !wanted.is_empty() {
            let existing = ctx
                .store
                .existing_record_ids(schema.model_id, &wanted)
                .await?;
            let existing: BTreeSet<u64> = existing.into_iter().collect();
            let before = wanted.len();
            let remaining: Vec<u64> = wanted
                .into_iter()
                .filter(|id| !existing.contains(id))
                .collect();
            outcome.skipped += (before - remaining.len()) as u64;
            remaining
        } else {
            wanted
        };

        for chunk in wanted.chunks(ctx.config.fetch_batch_size) {
            if *cancel.borrow() {
                outcome.aborted = true;
                break;
            }
            let raw = ctx
                .source
                .fetch(&item.model_name, &ids_domain(chunk), &fields, 0, chunk.len())
                .await?;
            batch_number += 1;
            let aborted = process_batch(
                ctx,
                &schema,
                &transformer,
                raw,
                visited,
                BatchFilter::default(), // ids were filtered above
                batch_number,
                &mut outcome,
                &mut aggregates,
            )
            .await?;
            if aborted {
                outcome.aborted = true;
                break;
            }
        }
    }

    // Stage 7: fold FK observations into graph edges.
    if ctx.config.update_graph && !outcome.aborted {
        let now = Utc::now();
        for (field_name, agg) in &aggregates {
            let Some(field_type) = agg.field_type else {
                continue;
            };
            let target_is_leaf = ctx
                .registry
                .model(&agg.target_model)
                .map(|m| m.is_leaf())
                .unwrap_or(true);
            let mut cascade_sources = BTreeSet::from([item.model_name.clone()]);
            if let Some(trigger) = &item.triggered_by_model {
                cascade_sources.insert(trigger.clone());
            }
            let delta = GraphEdge {
                source_model: item.model_name.clone(),
                source_model_id: schema.model_id,
                target_model: agg.target_model.clone(),
                target_model_id: agg.target_model_id,
                field_name: field_name.clone(),
                field_label: agg.field_label.clone(),
                field_type,
                field_id: agg.field_id,
                is_leaf: target_is_leaf,
                edge_count: agg.total_references,
                unique_targets: agg.distinct_targets.len() as u64,
                cascade_sources,
                last_cascade: now,
                integrity: None,
                history: Vec::new(),
            };
            ctx.store.merge_graph_edge(&delta, now).await?;
        }
    }

    // Stage 8: hand back cascade items for every observed FK target.
    if !outcome.aborted {
        for (field_name, agg) in aggregates {
            if agg.distinct_targets.is_empty() || !ctx.registry.model_exists(&agg.target_model) {
                continue;
            }
            outcome.cascade_items.push(WorkItem::cascade(
                agg.target_model.clone(),
                agg.distinct_targets.into_iter().collect(),
                item.depth + 1,
                item.model_name.clone(),
                field_name,
            ));
        }
        // Keep filter compilation off the scan path for this model.
        ctx.store
            .register_model_indexes(&schema, &ctx.registry)
            .await?;
    }

    info!(
        model = %outcome.model_name,
        fetched = outcome.fetched,
        synced = outcome.synced,
        failed = outcome.failed,
        skipped = outcome.skipped,
        cascades = outcome.cascade_items.len(),
        aborted = outcome.aborted,
        "sync step finished"
    );
    Ok(outcome)
}

/// Which pre-filters a batch still needs.
#[derive(Debug, Clone, Copy, Default)]
struct BatchFilter {
    check_visited: bool,
    skip_existing: bool,
}

/// Stages 3–6 for one fetched batch. Returns `true` when the step should
/// stop (open breaker).
#[allow(clippy::too_many_arguments)]
async fn process_batch(
    ctx: &SyncContext,
    schema: &nexsus_core::schema::ModelSchema,
    transformer: &RecordTransformer<'_>,
    raw_records: Vec<crate::source::RawRecord>,
    visited: &Mutex<VisitedSet>,
    filter: BatchFilter,
    batch_number: usize,
    outcome: &mut StepOutcome,
    aggregates: &mut AHashMap<String, FkAggregate>,
) -> Result<bool> {
    outcome.fetched += raw_records.len() as u64;
    let now = Utc::now();

    let already_present: BTreeSet<u64> = if filter.skip_existing {
        let candidate_ids: Vec<u64> = raw_records
            .iter()
            .filter_map(|r| r.get("id").and_then(serde_json::Value::as_u64))
            .collect();
        ctx.store
            .existing_record_ids(schema.model_id, &candidate_ids)
            .await?
            .into_iter()
            .collect()
    } else {
        BTreeSet::new()
    };

    // Stage 4: transform, dropping visited/existing records first.
    let mut transformed: Vec<TransformedRecord> = Vec::new();
    for raw in raw_records {
        let record = decode_record(&raw, |name| schema.field(name).map(|f| f.field_type));
        let record_id = record
            .get("id")
            .and_then(nexsus_core::value::RecordValue::as_i64)
            .filter(|id| *id >= 0)
            .map(|id| id as u64);

        if let Some(id) = record_id {
            if filter.check_visited {
                let fresh = visited.lock().should_process(&schema.model_name, id);
                if !fresh {
                    outcome.skipped += 1;
                    continue;
                }
            }
            if already_present.contains(&id) {
                outcome.skipped += 1;
                continue;
            }
        }

        match transformer.transform(&record, now) {
            Ok(t) => transformed.push(t),
            Err(err) => {
                outcome.failed += 1;
                ctx.dlq.push(DlqEntry {
                    record_id: record_id.unwrap_or(0),
                    model_name: schema.model_name.clone(),
                    model_id: schema.model_id,
                    failure_stage: FailureStage::Encoding,
                    error_message: err.to_string(),
                    batch_number,
                    encoded_string: None,
                    failed_at: now,
                    retry_count: 0,
                })?;
            }
        }
    }
    if transformed.is_empty() {
        return Ok(false);
    }

    // Stage 5: embed narratives.
    let narratives: Vec<String> = transformed.iter().map(|t| t.narrative.clone()).collect();
    let vectors = match ctx.gateway.embed_documents(&narratives).await {
        Ok(vectors) => vectors,
        Err(err) => {
            warn!(
                model = %schema.model_name,
                batch_number,
                error = %err,
                "embedding failed, dead-lettering batch"
            );
            for t in &transformed {
                outcome.failed += 1;
                ctx.dlq.push(DlqEntry {
                    record_id: t.record_id,
                    model_name: schema.model_name.clone(),
                    model_id: schema.model_id,
                    failure_stage: FailureStage::Embedding,
                    error_message: err.to_string(),
                    batch_number,
                    encoded_string: Some(t.narrative.clone()),
                    failed_at: now,
                    retry_count: 0,
                })?;
            }
            // Fail fast for the rest of the item when the breaker is open.
            return Ok(matches!(err, NexsusError::CircuitOpen { .. }));
        }
    };

    // Stage 6: pair and upsert in bounded chunks, preserving fetch order.
    let points: Vec<Point> = transformed
        .iter()
        .zip(vectors)
        .map(|(t, vector)| Point::new(t.point_id.clone(), vector, t.payload.clone()))
        .collect();
    for (chunk_no, chunk) in points.chunks(ctx.config.upsert_batch_size).enumerate() {
        let start = chunk_no * ctx.config.upsert_batch_size;
        match ctx.store.upsert(chunk.to_vec()).await {
            Ok(()) => outcome.synced += chunk.len() as u64,
            Err(err) => {
                for t in transformed.iter().skip(start).take(chunk.len()) {
                    outcome.failed += 1;
                    ctx.dlq.push(DlqEntry {
                        record_id: t.record_id,
                        model_name: schema.model_name.clone(),
                        model_id: schema.model_id,
                        failure_stage: FailureStage::Upsert,
                        error_message: err.to_string(),
                        batch_number,
                        encoded_string: None,
                        failed_at: now,
                        retry_count: 0,
                    })?;
                }
            }
        }
    }

    // Fold the FK observations for graph edges and cascades.
    for t in &transformed {
        for fk in &t.fk_refs {
            fold_fk(aggregates, fk);
        }
    }
    debug!(
        model = %schema.model_name,
        batch_number,
        batch_synced = transformed.len(),
        "batch processed"
    );
    Ok(false)
}

fn fold_fk(aggregates: &mut AHashMap<String, FkAggregate>, fk: &FkRef) {
    let agg = aggregates.entry(fk.field_name.clone()).or_default();
    agg.field_id = fk.field_id;
    agg.field_label = fk.field_label.clone();
    agg.field_type = Some(fk.field_type);
    agg.target_model = fk.target_model.clone();
    agg.target_model_id = fk.target_model_id;
    agg.total_references += fk.target_ids.len() as u64;
    agg.distinct_targets.extend(fk.target_ids.iter().copied());
}
