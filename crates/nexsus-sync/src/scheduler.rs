//! The cascade scheduler.
//!
//! Single producer (the supervisor loop), multiple consumers (a bounded
//! worker pool). The supervisor owns the queue; workers share the
//! visited set and the DLQ. Cancellation lets in-flight batches finish
//! and stops dequeuing.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use nexsus_core::config::SyncConfig;
use nexsus_core::error::Result;
use nexsus_core::pattern::NarrativePattern;
use nexsus_core::schema::SchemaRegistry;
use nexsus_embed::gateway::EmbeddingGateway;
use nexsus_resilience::breaker::BreakerSet;
use nexsus_resilience::dlq::DeadLetterQueue;
use nexsus_store::unified::UnifiedStore;

use crate::queue::{SyncQueue, VisitedSet, WorkItem};
use crate::source::RecordSource;
use crate::step::run_step;

/// Everything a sync worker needs, shared across the run.
pub struct SyncContext {
    pub source: Arc<dyn RecordSource>,
    pub registry: Arc<SchemaRegistry>,
    pub store: Arc<UnifiedStore>,
    pub gateway: Arc<EmbeddingGateway>,
    pub dlq: Arc<DeadLetterQueue>,
    pub breakers: Arc<BreakerSet>,
    pub config: SyncConfig,
    /// Optional per-model narrative patterns.
    pub patterns: HashMap<String, NarrativePattern>,
}

/// Per-run summary surfaced to the CLI.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub models_processed: u64,
    pub records_fetched: u64,
    pub records_synced: u64,
    pub records_failed: u64,
    pub records_skipped: u64,
    pub cycles_detected: u64,
    pub items_enqueued: u64,
    pub items_merged: u64,
    pub depth_pruned: u64,
    pub dlq_size: usize,
    pub breaker_trips: u64,
    pub duration_ms: u64,
    pub cancelled: bool,
    /// `(model, error)` for items that failed outright.
    pub model_errors: Vec<(String, String)>,
}

pub struct CascadeScheduler {
    ctx: Arc<SyncContext>,
    cancel_tx: watch::Sender<bool>,
}

impl CascadeScheduler {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self { ctx, cancel_tx }
    }

    /// Signal cancellation: no new items are dequeued, in-flight items
    /// finish their current batch and release.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn cancel_handle(&self) -> watch::Sender<bool> {
        self.cancel_tx.clone()
    }

    /// Drive `roots` (and their cascades unless `no_cascade`) to
    /// completion.
    pub async fn run(&self, roots: Vec<WorkItem>, no_cascade: bool) -> Result<SyncReport> {
        let started = Instant::now();
        let mut queue = SyncQueue::new();
        for item in roots {
            queue.enqueue(item);
        }

        let visited = Arc::new(Mutex::new(VisitedSet::new()));
        let cancel_rx = self.cancel_tx.subscribe();
        let mut workers: JoinSet<(String, Result<crate::step::StepOutcome>)> = JoinSet::new();
        let mut report = SyncReport::default();
        let parallel = self.ctx.config.parallel_targets.max(1);

        loop {
            let cancelled = *cancel_rx.borrow();
            if !cancelled {
                while workers.len() < parallel {
                    let Some(item) = queue.dequeue() else {
                        break;
                    };
                    if item.depth > self.ctx.config.max_cascade_depth {
                        report.depth_pruned += 1;
                        continue;
                    }
                    let ctx = self.ctx.clone();
                    let visited = visited.clone();
                    let cancel = cancel_rx.clone();
                    info!(
                        model = %item.model_name,
                        depth = item.depth,
                        ids = item.record_ids.len(),
                        "dispatching sync step"
                    );
                    workers.spawn(async move {
                        let model = item.model_name.clone();
                        let outcome = run_step(&ctx, &item, &visited, &cancel).await;
                        (model, outcome)
                    });
                }
            }

            if workers.is_empty() {
                if cancelled || queue.is_empty() {
                    break;
                }
                continue;
            }

            match workers.join_next().await {
                Some(Ok((_, Ok(outcome)))) => {
                    report.models_processed += 1;
                    report.records_fetched += outcome.fetched;
                    report.records_synced += outcome.synced;
                    report.records_failed += outcome.failed;
                    report.records_skipped += outcome.skipped;
                    if outcome.aborted {
                        report.cancelled = report.cancelled || *cancel_rx.borrow();
                    }
                    if !no_cascade {
                        for cascade in outcome.cascade_items {
                            queue.enqueue(cascade);
                        }
                    }
                }
                Some(Ok((model, Err(err)))) => {
                    warn!(model = %model, error = %err, "sync step failed");
                    report.model_errors.push((model, err.to_string()));
                }
                Some(Err(join_err)) => {
                    error!(error = %join_err, "sync worker panicked");
                    report
                        .model_errors
                        .push(("<worker>".into(), join_err.to_string()));
                }
                None => break,
            }
        }

        let (added, merged) = queue.stats();
        report.items_enqueued = added;
        report.items_merged = merged;
        report.cycles_detected = visited.lock().cycles_detected();
        report.dlq_size = self.ctx.dlq.len();
        report.breaker_trips = self.ctx.breakers.total_trips();
        report.duration_ms = started.elapsed().as_millis() as u64;
        report.cancelled = report.cancelled || *cancel_rx.borrow();

        info!(
            models = report.models_processed,
            synced = report.records_synced,
            failed = report.records_failed,
            cycles = report.cycles_detected,
            dlq = report.dlq_size,
            duration_ms = report.duration_ms,
            "cascade run finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::WorkItem;
    use crate::testing::{fixture, fixture_with_provider, DownProvider};
    use nexsus_core::identity::data_uuid;
    use nexsus_resilience::breaker::BreakerState;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn minimal_sync_writes_one_point_per_record() {
        let fx = fixture();
        fx.source.add_records(
            "m_parent",
            vec![json!({"id": 1, "name": "A"}), json!({"id": 2, "name": "B"})],
        );

        let scheduler = CascadeScheduler::new(fx.ctx.clone());
        let report = scheduler
            .run(vec![WorkItem::root("m_parent")], false)
            .await
            .unwrap();

        assert_eq!(report.records_synced, 2);
        assert_eq!(report.records_failed, 0);
        assert_eq!(
            fx.ctx.store.count_data("m_parent").await.unwrap(),
            2
        );

        let point = fx
            .memory
            .get(data_uuid(10, 1).unwrap().as_str())
            .expect("point for record 1");
        assert_eq!(point.payload["point_type"], json!("data"));
        assert_eq!(point.payload["model_name"], json!("m_parent"));
        assert_eq!(point.payload["record_id"], json!(1));
        assert_eq!(point.payload["name"], json!("A"));
    }

    #[tokio::test]
    async fn cascade_follows_fk_and_writes_graph_edge() {
        let fx = fixture();
        fx.source
            .add_records("m_parent", vec![json!({"id": 10, "partner_id": [7, "P"]})]);
        fx.source
            .add_records("m_partner", vec![json!({"id": 7, "name": "P"})]);

        let scheduler = CascadeScheduler::new(fx.ctx.clone());
        let report = scheduler
            .run(vec![WorkItem::root("m_parent")], false)
            .await
            .unwrap();

        // Parent + cascaded partner.
        assert_eq!(report.records_synced, 2);
        assert_eq!(report.models_processed, 2);

        let parent = fx
            .memory
            .get(data_uuid(10, 10).unwrap().as_str())
            .expect("parent point");
        assert_eq!(parent.payload["partner_id"], json!("P"));
        assert_eq!(parent.payload["partner_id_id"], json!(7));
        let partner_uuid = data_uuid(20, 7).unwrap();
        assert_eq!(
            parent.payload["partner_id_qdrant"],
            json!(partner_uuid.as_str())
        );
        // The cross-reference resolves to the partner point.
        assert!(fx.memory.get(partner_uuid.as_str()).is_some());

        let edges = fx.ctx.store.edges_from("m_parent").await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_model, "m_partner");
        assert_eq!(edges[0].edge_count, 1);
        assert_eq!(edges[0].unique_targets, 1);
        assert!(edges[0].cascade_sources.contains("m_parent"));
    }

    #[tokio::test]
    async fn mutual_references_terminate_with_cycles_counted() {
        let fx = fixture();
        fx.source
            .add_records("m_parent", vec![json!({"id": 1, "partner_id": [7, "A"]})]);
        fx.source.add_records(
            "m_partner",
            vec![
                json!({"id": 7, "name": "A", "parent_id": [8, "B"]}),
                json!({"id": 8, "name": "B", "parent_id": [7, "A"]}),
            ],
        );

        let scheduler = CascadeScheduler::new(fx.ctx.clone());
        let report = scheduler
            .run(vec![WorkItem::root("m_parent")], false)
            .await
            .unwrap();

        // 1 parent + partners 7 and 8, each exactly once.
        assert_eq!(report.records_synced, 3);
        assert!(report.cycles_detected >= 1);
        assert_eq!(fx.ctx.store.count_data("m_partner").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn embedding_outage_dead_letters_and_trips_breaker() {
        let fx = fixture_with_provider(Arc::new(DownProvider));
        fx.source
            .add_records("m_parent", vec![json!({"id": 1, "name": "A"})]);

        let scheduler = CascadeScheduler::new(fx.ctx.clone());
        // Three failed runs exhaust the failure threshold.
        for _ in 0..3 {
            let report = scheduler
                .run(vec![WorkItem::root("m_parent")], false)
                .await
                .unwrap();
            assert_eq!(report.records_synced, 0);
            assert_eq!(report.records_failed, 1);
        }
        assert_eq!(fx.ctx.breakers.embedding.state(), BreakerState::Open);

        let stats = fx.ctx.dlq.stats();
        assert_eq!(stats.by_stage.get("embedding"), Some(&1));
        let entries = fx.ctx.dlq.get();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].retry_count >= 3);

        // With the breaker open the next run fails fast, still via DLQ.
        let report = scheduler
            .run(vec![WorkItem::root("m_parent")], false)
            .await
            .unwrap();
        assert_eq!(report.records_synced, 0);
        assert!(report.breaker_trips >= 1);
    }

    #[tokio::test]
    async fn cancelled_run_processes_nothing() {
        let fx = fixture();
        fx.source
            .add_records("m_parent", vec![json!({"id": 1, "name": "A"})]);
        let scheduler = CascadeScheduler::new(fx.ctx.clone());
        scheduler.cancel();
        let report = scheduler
            .run(vec![WorkItem::root("m_parent")], false)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.models_processed, 0);
    }

    #[tokio::test]
    async fn unknown_model_goes_to_dlq_as_config_failure() {
        let fx = fixture();
        let scheduler = CascadeScheduler::new(fx.ctx.clone());
        let report = scheduler
            .run(vec![WorkItem::root("m_missing")], false)
            .await
            .unwrap();
        assert_eq!(report.model_errors.len(), 1);
        let stats = fx.ctx.dlq.stats();
        assert_eq!(stats.by_stage.get("config"), Some(&1));
    }
}
