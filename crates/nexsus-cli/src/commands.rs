//! Command handlers.

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use nexsus_core::identity::PointKind;
use nexsus_core::NexsusConfig;
use nexsus_store::unified::UnifiedStore;
use nexsus_sync::cleanup::cleanup_model;
use nexsus_sync::integrity::IntegrityValidator;
use nexsus_sync::knowledge::{KnowledgeCatalog, KnowledgeSync};
use nexsus_sync::queue::WorkItem;
use nexsus_sync::repair::OrphanRepair;
use nexsus_sync::scheduler::{CascadeScheduler, SyncReport};
use nexsus_sync::schema_sync::{Catalog, SchemaSync};
use nexsus_sync::source::{DomainLeaf, JsonExportSource};
use nexsus_sync::watermark::{list_watermarks, Watermark};

use crate::app;

pub struct SyncModelArgs {
    pub model: String,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub no_cascade: bool,
    pub force: bool,
    pub dry_run: bool,
}

pub async fn sync_model(config: &NexsusConfig, args: SyncModelArgs) -> Result<()> {
    let app = app::build(config).await?;
    let ctx = &app.ctx;

    if !ctx.registry.model_exists(&args.model) {
        anyhow::bail!(nexsus_core::error::NexsusError::ModelNotFound(
            args.model.clone()
        ));
    }

    let mut item = WorkItem::root(args.model.as_str());

    // Explicit window wins; otherwise resume from the watermark.
    let date_from = match (&args.date_from, app.watermarks.load(&args.model)?) {
        (Some(explicit), _) => Some(explicit.clone()),
        (None, Some(mark)) => {
            println!(
                "resuming from watermark {}",
                mark.last_synced.to_rfc3339().cyan()
            );
            Some(mark.last_synced.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        (None, None) => None,
    };
    if let Some(from) = &date_from {
        item.extra_domain
            .push(DomainLeaf::new("write_date", ">=", json!(from)));
    }
    if let Some(to) = &args.date_to {
        item.extra_domain
            .push(DomainLeaf::new("write_date", "<=", json!(to)));
    }

    if args.dry_run {
        let count = ctx
            .source
            .count(&args.model, &item.extra_domain)
            .await
            .context("counting source records")?;
        println!(
            "{} {} records of {} would sync (cascade {})",
            "dry-run:".yellow().bold(),
            count,
            args.model.bold(),
            if args.no_cascade { "off" } else { "on" },
        );
        return Ok(());
    }

    if args.force {
        println!("{} dropping data points of {}", "force:".yellow().bold(), args.model);
        ctx.store.delete_model_data(&args.model).await?;
        app.watermarks.clear(&args.model)?;
    }

    let scheduler = CascadeScheduler::new(ctx.clone());
    let report = scheduler.run(vec![item], args.no_cascade).await?;
    print_sync_report(&report);

    if report.model_errors.is_empty() {
        app.watermarks.save(&Watermark {
            model: args.model.clone(),
            last_synced: Utc::now(),
            records_synced: report.records_synced,
        })?;
    }
    Ok(())
}

pub async fn sync_schema(
    config: &NexsusConfig,
    source_kind: &str,
    file: Option<&Path>,
    force: bool,
) -> Result<()> {
    let app = match source_kind {
        "excel" => {
            let file = file.ok_or_else(|| {
                anyhow::anyhow!(nexsus_core::error::NexsusError::Config(
                    "--source excel requires --file <export.json>".into()
                ))
            })?;
            let source = Arc::new(JsonExportSource::load(file)?);
            app::build_with_source(config, source).await?
        }
        _ => app::build(config).await?,
    };

    let catalog = match &config.catalog_path {
        Some(path) => Catalog::load(path)?,
        None => Catalog::default(),
    };
    let report = SchemaSync::new(&app.ctx, catalog).run(force).await?;
    println!(
        "{} {} models, {} fields ({} skipped)",
        "schema sync:".green().bold(),
        report.models,
        report.fields,
        report.skipped_fields,
    );
    Ok(())
}

pub async fn sync_knowledge(config: &NexsusConfig, catalog: &Path, force: bool) -> Result<()> {
    let app = app::build(config).await?;
    let catalog = KnowledgeCatalog::load(catalog)?;
    let report = KnowledgeSync::new(&app.ctx).run(&catalog, force).await?;
    println!(
        "{} {} documents indexed",
        "knowledge sync:".green().bold(),
        report.indexed
    );
    for warning in &report.warnings {
        println!("  {} {warning}", "warning:".yellow());
    }
    Ok(())
}

pub struct ValidateArgs {
    pub model: Option<String>,
    pub auto_sync: bool,
    pub store_orphans: bool,
    pub track_history: bool,
    pub bidirectional: bool,
}

pub async fn validate_fk(config: &NexsusConfig, args: ValidateArgs) -> Result<()> {
    let app = app::build(config).await?;
    let ctx = &app.ctx;

    let mut models = match &args.model {
        Some(model) => vec![model.clone()],
        None => ctx.registry.model_names(),
    };
    if args.bidirectional {
        // Also look at the models our selection points at.
        let mut extra = Vec::new();
        for model in &models {
            if let Ok(schema) = ctx.registry.model(model) {
                for field in schema.fk_fields() {
                    if let Some(target) = &field.fk_model {
                        if ctx.registry.model_exists(target) && !models.contains(target) {
                            extra.push(target.clone());
                        }
                    }
                }
            }
        }
        models.extend(extra);
        models.dedup();
    }

    let validator = IntegrityValidator::new(ctx, args.store_orphans, args.track_history);
    let report = validator.validate_models(&models).await?;

    for model in &report.models {
        let score = model.integrity_score();
        let headline = format!(
            "{}: {} records, {} refs over {} fields, {} missing (score {:.3})",
            model.model,
            model.total_records,
            model.total_fk_references,
            model.fk_fields_checked,
            model.missing_references,
            score,
        );
        if model.missing_references == 0 {
            println!("{}", headline.green());
        } else {
            println!("{}", headline.red());
            for detail in &model.orphan_details {
                println!(
                    "    record {} {} -> {}({})",
                    detail.source_record_id, detail.field, detail.target_model, detail.target_record_id
                );
            }
        }
    }
    if !report.missing_by_target.is_empty() {
        println!("{}", "missing references by target model:".bold());
        for (target, count) in &report.missing_by_target {
            println!("    {target}: {count}");
        }
    }

    if args.auto_sync && report.missing_references > 0 {
        println!("{}", "auto-sync: repairing orphans".bold());
        let repair = OrphanRepair::new(ctx.clone(), config.sync.sync_limit);
        let repair_report = match &args.model {
            Some(model) => repair.repair_model(model).await?,
            None => repair.repair_all().await?,
        };
        print_repair(&repair_report);
    }
    Ok(())
}

pub async fn fix_orphans(
    config: &NexsusConfig,
    model: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let app = app::build(config).await?;
    let repair = OrphanRepair::new(
        app.ctx.clone(),
        limit.unwrap_or(config.sync.sync_limit),
    );
    let report = match model {
        Some(model) => repair.repair_model(model).await?,
        None => repair.repair_all().await?,
    };
    print_repair(&report);
    Ok(())
}

pub async fn cleanup(config: &NexsusConfig, model: &str, dry_run: bool) -> Result<()> {
    let app = app::build(config).await?;
    let report = cleanup_model(&app.ctx, model, dry_run).await?;
    let verb = if report.dry_run { "would delete" } else { "deleted" };
    println!(
        "{} {} store records, {} in source, {} stale ({verb} {})",
        format!("cleanup {model}:").bold(),
        report.store_records,
        report.source_records,
        report.stale,
        if report.dry_run { report.stale } else { report.deleted },
    );
    Ok(())
}

pub async fn status(config: &NexsusConfig) -> Result<()> {
    // Status only reads the store; no record source required.
    let app = app::build_with_source(
        config,
        Arc::new(nexsus_sync::source::StaticSource::new()),
    )
    .await?;
    let ctx = &app.ctx;

    let info = ctx.store.collection_info().await?;
    println!("{}", "collection".bold());
    println!(
        "    {} points, dim {}, status {}, {} indexed fields",
        info.points_count,
        info.vector_size,
        info.status,
        info.indexed_fields.len()
    );

    println!("{}", "points by type".bold());
    for kind in [
        PointKind::Schema,
        PointKind::Data,
        PointKind::Graph,
        PointKind::Knowledge,
    ] {
        let count = ctx.store.count(&UnifiedStore::kind_filter(kind)).await?;
        println!("    {}: {count}", kind.as_str());
    }

    println!("{}", "circuit breakers".bold());
    for snapshot in ctx.breakers.snapshots() {
        let line = format!(
            "    {}: {} ({} trips)",
            snapshot.service,
            snapshot.state.as_str(),
            snapshot.trips
        );
        match snapshot.state {
            nexsus_resilience::breaker::BreakerState::Closed => println!("{}", line.green()),
            _ => println!("{}", line.red()),
        }
    }

    let stats = ctx.dlq.stats();
    println!("{}", "dead-letter queue".bold());
    println!("    {} entries", stats.total);
    for (stage, count) in &stats.by_stage {
        println!("    {stage}: {count}");
    }

    let marks = list_watermarks(&config.watermark_dir);
    if !marks.is_empty() {
        println!("{}", "watermarks".bold());
        for mark in marks {
            println!(
                "    {}: {} ({} records)",
                mark.model,
                mark.last_synced.to_rfc3339(),
                mark.records_synced
            );
        }
    }
    Ok(())
}

pub fn dlq_show(config: &NexsusConfig) -> Result<()> {
    let dlq = nexsus_resilience::dlq::DeadLetterQueue::open(
        config.dlq_path.clone(),
        nexsus_resilience::dlq::DEFAULT_MAX_DLQ_SIZE,
    )?;
    let stats = dlq.stats();
    println!("{} {} entries", "dlq:".bold(), stats.total);
    for entry in dlq.get() {
        println!(
            "    {} {} #{} [{}] x{}: {}",
            entry.failed_at.to_rfc3339(),
            entry.model_name,
            entry.record_id,
            entry.failure_stage.as_str(),
            entry.retry_count,
            entry.error_message,
        );
    }
    Ok(())
}

pub fn dlq_clear(config: &NexsusConfig, model: Option<&str>) -> Result<()> {
    let dlq = nexsus_resilience::dlq::DeadLetterQueue::open(
        config.dlq_path.clone(),
        nexsus_resilience::dlq::DEFAULT_MAX_DLQ_SIZE,
    )?;
    let removed = dlq.clear(model)?;
    println!("{} {removed} entries removed", "dlq:".bold());
    Ok(())
}

fn print_sync_report(report: &SyncReport) {
    let headline = format!(
        "synced {} records across {} models in {}ms",
        report.records_synced, report.models_processed, report.duration_ms
    );
    if report.records_failed == 0 && report.model_errors.is_empty() {
        println!("{} {}", "ok:".green().bold(), headline);
    } else {
        println!("{} {}", "partial:".yellow().bold(), headline);
    }
    println!(
        "    fetched {} | failed {} | skipped {} | cycles {} | queue added {} merged {}",
        report.records_fetched,
        report.records_failed,
        report.records_skipped,
        report.cycles_detected,
        report.items_enqueued,
        report.items_merged,
    );
    if report.breaker_trips > 0 || report.dlq_size > 0 {
        println!(
            "    {} breaker trips, {} entries in DLQ",
            report.breaker_trips, report.dlq_size
        );
    }
    if report.cancelled {
        println!("    {}", "run was cancelled".yellow());
    }
    for (model, error) in &report.model_errors {
        println!("    {} {model}: {error}", "failed".red());
    }
}

fn print_repair(report: &nexsus_sync::repair::RepairReport) {
    println!(
        "{} found {} | synced {} | failed {} | skipped {}",
        "repair:".bold(),
        report.found,
        report.synced,
        report.failed,
        report.skipped
    );
    for (model, entry) in &report.by_model {
        println!(
            "    {model}: found {} synced {} skipped {}",
            entry.found, entry.synced, entry.skipped
        );
    }
    for (bucket, count) in &report.unresolvable {
        println!("    {} {bucket}: {count}", "unresolvable".yellow());
    }
}
