//! Integration tests for the complete Nexsus pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - schema sync → registry → cascade sync → store
//! - FK cross-references, graph edges, orphan repair
//! - query compilation (dotted paths) → execution → aggregation
//!
//! Run with: cargo test --test integration_tests

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nexsus_core::config::{BreakerConfig, EmbeddingConfig, SyncConfig};
use nexsus_core::error::Result;
use nexsus_core::identity::data_uuid;
use nexsus_core::schema::SchemaRegistry;
use nexsus_embed::gateway::EmbeddingGateway;
use nexsus_embed::provider::{EmbeddingProvider, InputType};
use nexsus_query::{QueryCompiler, QueryCondition, QueryExecutor, QueryOp, QueryRequest};
use nexsus_resilience::breaker::BreakerSet;
use nexsus_resilience::dlq::DeadLetterQueue;
use nexsus_resilience::retry::RetryPolicy;
use nexsus_store::memory::MemoryStore;
use nexsus_store::unified::UnifiedStore;
use nexsus_sync::cleanup::cleanup_model;
use nexsus_sync::knowledge::{KnowledgeCatalog, KnowledgeSync, ModelKnowledgeItem};
use nexsus_sync::queue::WorkItem;
use nexsus_sync::repair::OrphanRepair;
use nexsus_sync::scheduler::{CascadeScheduler, SyncContext};
use nexsus_sync::schema_sync::{Catalog, SchemaSync};
use nexsus_sync::source::{SourceField, SourceModel, StaticSource};
use nexsus_sync::IntegrityValidator;

const DIM: usize = 8;

struct HashProvider;

#[async_trait]
impl EmbeddingProvider for HashProvider {
    async fn embed(&self, texts: &[String], _input_type: InputType) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; DIM];
                for (i, b) in t.bytes().enumerate() {
                    v[i % DIM] += b as f32 / 255.0;
                }
                v
            })
            .collect())
    }
}

struct World {
    source: Arc<StaticSource>,
    memory: Arc<MemoryStore>,
    ctx: Arc<SyncContext>,
    _dir: tempfile::TempDir,
}

fn source_field(
    field_id: u64,
    name: &str,
    label: &str,
    ttype: &str,
    relation: Option<&str>,
) -> SourceField {
    SourceField {
        field_id,
        name: name.into(),
        label: label.into(),
        ttype: ttype.into(),
        stored: true,
        relation: relation.map(str::to_string),
    }
}

/// Two models on the wire: `m_parent` (orders) pointing at `m_partner`.
async fn world() -> World {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(StaticSource::new());
    source.add_model(
        SourceModel {
            name: "m_parent".into(),
            model_id: 10,
        },
        vec![
            source_field(100, "id", "ID", "integer", None),
            source_field(101, "name", "Name", "char", None),
            source_field(102, "amount_total", "Total", "monetary", None),
            source_field(103, "date_order", "Order Date", "date", None),
            source_field(104, "partner_id", "Partner", "many2one", Some("m_partner")),
        ],
    );
    source.add_model(
        SourceModel {
            name: "m_partner".into(),
            model_id: 20,
        },
        vec![
            source_field(200, "id", "ID", "integer", None),
            source_field(201, "name", "Name", "char", None),
        ],
    );

    let memory = Arc::new(MemoryStore::new(DIM));
    let retry = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    };
    let breakers = Arc::new(BreakerSet::new(
        BreakerConfig::default(),
        BreakerConfig::default(),
        BreakerConfig::default(),
        BreakerConfig::default(),
    ));
    let store = Arc::new(UnifiedStore::new(memory.clone(), None, retry, DIM));
    let registry = Arc::new(SchemaRegistry::new());
    store.bootstrap(&registry).await.expect("bootstrap");

    let gateway = Arc::new(EmbeddingGateway::new(
        Arc::new(HashProvider),
        breakers.embedding.clone(),
        retry,
        EmbeddingConfig::default(),
        DIM,
    ));
    let dlq = Arc::new(DeadLetterQueue::open(dir.path().join("dlq.json"), 1000).expect("dlq"));

    let ctx = Arc::new(SyncContext {
        source: source.clone(),
        registry,
        store,
        gateway,
        dlq,
        breakers,
        config: SyncConfig {
            parallel_targets: 2,
            fetch_batch_size: 100,
            upsert_batch_size: 100,
            ..Default::default()
        },
        patterns: HashMap::new(),
    });

    // Schema sync populates the registry from schema points.
    SchemaSync::new(&ctx, Catalog::default())
        .run(false)
        .await
        .expect("schema sync");

    World {
        source,
        memory,
        ctx,
        _dir: dir,
    }
}

async fn sync_all(world: &World) {
    let scheduler = CascadeScheduler::new(world.ctx.clone());
    scheduler
        .run(vec![WorkItem::root("m_parent")], false)
        .await
        .expect("sync run");
}

// ============================================================================
// Schema sync → registry
// ============================================================================

#[tokio::test]
async fn schema_sync_feeds_the_registry() {
    let w = world().await;
    assert!(w.ctx.registry.model_exists("m_parent"));
    assert!(w.ctx.registry.model_exists("m_partner"));

    let partner_fk = w
        .ctx
        .registry
        .field_by_name("m_parent", "partner_id")
        .unwrap();
    assert_eq!(partner_fk.fk_model.as_deref(), Some("m_partner"));
    assert_eq!(partner_fk.fk_model_id, Some(20));

    // Schema points live in the shared collection under their namespace.
    let schema_count = w
        .ctx
        .store
        .count(&UnifiedStore::kind_filter(
            nexsus_core::identity::PointKind::Schema,
        ))
        .await
        .unwrap();
    assert_eq!(schema_count, 7);
}

// ============================================================================
// Cascade sync end-to-end
// ============================================================================

#[tokio::test]
async fn full_sync_builds_cross_referenced_points() {
    let w = world().await;
    w.source.add_records(
        "m_parent",
        vec![
            json!({"id": 1, "name": "SO-1", "amount_total": 100.0, "date_order": "2024-01-10", "partner_id": [7, "Ben Ross"]}),
            json!({"id": 2, "name": "SO-2", "amount_total": 250.0, "date_order": "2024-02-20", "partner_id": [7, "Ben Ross"]}),
            json!({"id": 3, "name": "SO-3", "amount_total": 50.0, "date_order": "2024-03-05", "partner_id": [8, "Ada"]}),
        ],
    );
    w.source.add_records(
        "m_partner",
        vec![
            json!({"id": 7, "name": "Ben Ross"}),
            json!({"id": 8, "name": "Ada"}),
        ],
    );
    sync_all(&w).await;

    assert_eq!(w.ctx.store.count_data("m_parent").await.unwrap(), 3);
    assert_eq!(w.ctx.store.count_data("m_partner").await.unwrap(), 2);

    // FK cross-reference contract.
    let parent = w.memory.get(data_uuid(10, 1).unwrap().as_str()).unwrap();
    assert_eq!(parent.payload["partner_id"], json!("Ben Ross"));
    assert_eq!(parent.payload["partner_id_id"], json!(7));
    let partner_uuid = data_uuid(20, 7).unwrap();
    assert_eq!(parent.payload["partner_id_qdrant"], json!(partner_uuid.as_str()));
    assert!(w.memory.get(partner_uuid.as_str()).is_some());

    // Graph edge accumulated over the run.
    let edges = w.ctx.store.edges_from("m_parent").await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].edge_count, 3);
    assert_eq!(edges[0].unique_targets, 2);
}

#[tokio::test]
async fn repeated_syncs_accumulate_graph_edges_monotonically() {
    let w = world().await;
    w.source.add_records(
        "m_parent",
        vec![json!({"id": 1, "partner_id": [7, "P"]})],
    );
    w.source
        .add_records("m_partner", vec![json!({"id": 7, "name": "P"})]);

    sync_all(&w).await;
    sync_all(&w).await;

    let edges = w.ctx.store.edges_from("m_parent").await.unwrap();
    assert_eq!(edges[0].edge_count, 2); // 1 + 1 across runs
    assert_eq!(edges[0].unique_targets, 1); // max-tracked
    assert!(edges[0].cascade_sources.contains("m_parent"));
}

// ============================================================================
// Orphans: detect, repair, idempotence
// ============================================================================

#[tokio::test]
async fn orphan_detect_repair_and_second_run_is_a_noop() {
    let w = world().await;
    w.source.add_records(
        "m_parent",
        vec![json!({"id": 1, "partner_id": [99, "Ghost"]})],
    );
    w.source
        .add_records("m_partner", vec![json!({"id": 99, "name": "Ghost"})]);

    // Sync the parent only; the partner reference dangles.
    let scheduler = CascadeScheduler::new(w.ctx.clone());
    scheduler
        .run(vec![WorkItem::root("m_parent")], true)
        .await
        .unwrap();

    let validator = IntegrityValidator::new(&w.ctx, false, false);
    let report = validator.validate_model("m_parent").await.unwrap();
    assert_eq!(report.missing_references, 1);
    assert_eq!(report.missing_by_target.get("m_partner"), Some(&1));

    let repair = OrphanRepair::new(w.ctx.clone(), 5000);
    let first = repair.repair_model("m_parent").await.unwrap();
    assert_eq!(first.found, 1);
    assert_eq!(first.synced, 1);

    // The integrity report is clean now and a re-run writes nothing.
    let report = validator.validate_model("m_parent").await.unwrap();
    assert_eq!(report.missing_references, 0);
    let writes = w.memory.upsert_count();
    let second = repair.repair_model("m_parent").await.unwrap();
    assert_eq!(second.found, 0);
    assert_eq!(w.memory.upsert_count(), writes);
}

// ============================================================================
// Query layer: dotted filters and aggregations
// ============================================================================

#[tokio::test]
async fn dotted_contains_filter_matches_manual_two_step_path() {
    let w = world().await;
    w.source.add_records(
        "m_parent",
        vec![
            json!({"id": 1, "name": "SO-1", "amount_total": 100.0, "partner_id": [7, "Ben Ross"]}),
            json!({"id": 2, "name": "SO-2", "amount_total": 250.0, "partner_id": [7, "Ben Ross"]}),
            json!({"id": 3, "name": "SO-3", "amount_total": 50.0, "partner_id": [8, "Ada"]}),
        ],
    );
    w.source.add_records(
        "m_partner",
        vec![
            json!({"id": 7, "name": "Ben Ross"}),
            json!({"id": 8, "name": "Ada"}),
        ],
    );
    sync_all(&w).await;

    let compiler = QueryCompiler::new(&w.ctx.registry, &w.ctx.store, 10_000);
    let compiled = compiler
        .compile(&QueryRequest {
            model: "m_parent".into(),
            filters: vec![QueryCondition {
                field: "partner_id.name".into(),
                op: QueryOp::Contains,
                value: json!("ben"),
            }],
            aggregations: vec![],
            group_by: None,
        })
        .await
        .unwrap();

    let executor = QueryExecutor::new(&w.ctx.store, 100);
    let result = executor.execute(&compiled, 100).await.unwrap();
    let mut via_compiler: Vec<u64> = result
        .records
        .iter()
        .filter_map(|p| p.get("record_id").and_then(|v| v.as_u64()))
        .collect();
    via_compiler.sort_unstable();

    // Manual two-step path: scroll partners by name, then parents by id.
    let mut partner_ids: Vec<u64> = Vec::new();
    w.ctx
        .store
        .scroll_each(&UnifiedStore::data_filter("m_partner"), 100, |points| {
            for p in points {
                let name = p.str_field("name").unwrap_or_default().to_lowercase();
                if name.contains("ben") {
                    partner_ids.push(p.u64_field("record_id").unwrap());
                }
            }
        })
        .await
        .unwrap();
    let mut manual: Vec<u64> = Vec::new();
    w.ctx
        .store
        .scroll_each(&UnifiedStore::data_filter("m_parent"), 100, |points| {
            for p in points {
                if let Some(pid) = p.u64_field("partner_id_id") {
                    if partner_ids.contains(&pid) {
                        manual.push(p.u64_field("record_id").unwrap());
                    }
                }
            }
        })
        .await
        .unwrap();
    manual.sort_unstable();

    assert_eq!(via_compiler, vec![1, 2]);
    assert_eq!(via_compiler, manual);
}

#[tokio::test]
async fn dotted_filter_with_no_matches_is_trivially_empty() {
    let w = world().await;
    w.source.add_records(
        "m_parent",
        vec![json!({"id": 1, "partner_id": [7, "Ben"]})],
    );
    w.source
        .add_records("m_partner", vec![json!({"id": 7, "name": "Ben"})]);
    sync_all(&w).await;

    let compiler = QueryCompiler::new(&w.ctx.registry, &w.ctx.store, 10_000);
    let compiled = compiler
        .compile(&QueryRequest {
            model: "m_parent".into(),
            filters: vec![QueryCondition {
                field: "partner_id.name".into(),
                op: QueryOp::Eq,
                value: json!("Nobody"),
            }],
            aggregations: vec![],
            group_by: None,
        })
        .await
        .unwrap();
    assert!(compiled.trivially_empty);

    let executor = QueryExecutor::new(&w.ctx.store, 100);
    let result = executor.execute(&compiled, 100).await.unwrap();
    assert!(result.records.is_empty());
}

#[tokio::test]
async fn grouped_aggregation_folds_sum_and_avg() {
    let w = world().await;
    w.source.add_records(
        "m_parent",
        vec![
            json!({"id": 1, "amount_total": 100.0, "partner_id": [7, "Ben"]}),
            json!({"id": 2, "amount_total": 250.0, "partner_id": [7, "Ben"]}),
            json!({"id": 3, "amount_total": 50.0, "partner_id": [8, "Ada"]}),
        ],
    );
    w.source.add_records(
        "m_partner",
        vec![json!({"id": 7, "name": "Ben"}), json!({"id": 8, "name": "Ada"})],
    );
    sync_all(&w).await;

    let compiler = QueryCompiler::new(&w.ctx.registry, &w.ctx.store, 10_000);
    let compiled = compiler
        .compile(&QueryRequest {
            model: "m_parent".into(),
            filters: vec![],
            aggregations: vec![
                nexsus_query::execute::AggregationSpec {
                    field: "amount_total".into(),
                    op: nexsus_core::schema::AggregateOp::Sum,
                },
                nexsus_query::execute::AggregationSpec {
                    field: "amount_total".into(),
                    op: nexsus_core::schema::AggregateOp::Avg,
                },
            ],
            group_by: Some("partner_id_id".into()),
        })
        .await
        .unwrap();

    let executor = QueryExecutor::new(&w.ctx.store, 100);
    let result = executor.execute(&compiled, 100).await.unwrap();
    let aggregations = result.aggregations.unwrap();
    assert_eq!(aggregations.groups.len(), 2);

    let ben = aggregations
        .groups
        .iter()
        .find(|g| g.key == Some(json!(7)))
        .unwrap();
    assert_eq!(ben.count, 2);
    assert_eq!(ben.values["sum_amount_total"], json!(350.0));
    assert_eq!(ben.values["avg_amount_total"], json!(175.0));

    let ada = aggregations
        .groups
        .iter()
        .find(|g| g.key == Some(json!(8)))
        .unwrap();
    assert_eq!(ada.values["sum_amount_total"], json!(50.0));
}

#[tokio::test]
async fn invalid_aggregation_is_rejected_at_compile_time() {
    let w = world().await;
    let compiler = QueryCompiler::new(&w.ctx.registry, &w.ctx.store, 10_000);
    let err = compiler
        .compile(&QueryRequest {
            model: "m_parent".into(),
            filters: vec![],
            aggregations: vec![nexsus_query::execute::AggregationSpec {
                field: "date_order".into(),
                op: nexsus_core::schema::AggregateOp::Sum,
            }],
            group_by: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not valid"));
}

// ============================================================================
// Semantic search over synced narratives
// ============================================================================

#[tokio::test]
async fn synced_points_are_searchable_by_vector() {
    let w = world().await;
    w.source.add_records(
        "m_parent",
        vec![json!({"id": 1, "name": "Quarterly steel order", "amount_total": 10.0})],
    );
    sync_all(&w).await;

    let query_vector = w.ctx.gateway.embed_query("steel order").await.unwrap();
    let hits = w
        .ctx
        .store
        .raw()
        .search(
            &query_vector,
            Some(&UnifiedStore::data_filter("m_parent")),
            5,
            None,
        )
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].point.payload["record_id"], json!(1));
}

// ============================================================================
// Knowledge sync
// ============================================================================

#[tokio::test]
async fn knowledge_sync_indexes_and_warns_on_unknown_models() {
    let w = world().await;
    let catalog = KnowledgeCatalog {
        instance: vec![],
        models: vec![
            ModelKnowledgeItem {
                model: "m_parent".into(),
                business_name: "Orders".into(),
                purpose: "Customer orders".into(),
                use_cases: vec!["revenue reporting".into()],
            },
            ModelKnowledgeItem {
                model: "m_ghost".into(),
                business_name: "Ghost".into(),
                purpose: String::new(),
                use_cases: vec![],
            },
        ],
        fields: vec![],
    };
    let report = KnowledgeSync::new(&w.ctx)
        .run(&catalog, false)
        .await
        .unwrap();
    assert_eq!(report.indexed, 2);
    assert_eq!(report.warnings.len(), 1);

    let count = w
        .ctx
        .store
        .count(&UnifiedStore::kind_filter(
            nexsus_core::identity::PointKind::Knowledge,
        ))
        .await
        .unwrap();
    assert_eq!(count, 2);
}

// ============================================================================
// Cleanup
// ============================================================================

#[tokio::test]
async fn cleanup_removes_records_the_source_dropped() {
    let w = world().await;
    w.source.add_records(
        "m_parent",
        vec![json!({"id": 1, "name": "keep"}), json!({"id": 2, "name": "drop"})],
    );
    sync_all(&w).await;
    assert_eq!(w.ctx.store.count_data("m_parent").await.unwrap(), 2);

    w.source.remove_record("m_parent", 2);

    let dry = cleanup_model(&w.ctx, "m_parent", true).await.unwrap();
    assert_eq!(dry.stale, 1);
    assert_eq!(dry.deleted, 0);
    assert_eq!(w.ctx.store.count_data("m_parent").await.unwrap(), 2);

    let real = cleanup_model(&w.ctx, "m_parent", false).await.unwrap();
    assert_eq!(real.deleted, 1);
    assert_eq!(w.ctx.store.count_data("m_parent").await.unwrap(), 1);
    assert!(w.memory.get(data_uuid(10, 1).unwrap().as_str()).is_some());
    assert!(w.memory.get(data_uuid(10, 2).unwrap().as_str()).is_none());
}
