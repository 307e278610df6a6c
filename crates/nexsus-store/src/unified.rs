//! Typed facade over the single physical collection.
//!
//! Adds the `point_type` discriminator to every filter, bootstraps the
//! universal payload indexes, registers per-model dynamic indexes after a
//! data sync, and owns graph-edge accumulation (read-modify-write under a
//! per-edge lock, since the store only overwrites whole points). Store
//! calls run under the vector-store breaker and retry policy.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use chrono::{DateTime, Utc};

use nexsus_core::error::Result;
use nexsus_core::identity::{data_uuid, PointKind};
use nexsus_core::point::Point;
use nexsus_core::schema::{FieldDef, ModelSchema, SchemaRegistry};
use nexsus_resilience::breaker::CircuitBreaker;
use nexsus_resilience::retry::{retry_with, RetryPolicy};

use crate::filter::{Condition, Filter};
use crate::store::{scroll_all, CollectionInfo, DeleteSelector, IndexType, ScrollPage, VectorStore};
use crate::graph::GraphEdge;

/// Universal payload indexes created at collection bootstrap.
const UNIVERSAL_INDEXES: &[(&str, IndexType)] = &[
    ("point_type", IndexType::Keyword),
    ("point_id", IndexType::Keyword),
    ("model_name", IndexType::Keyword),
    ("model_id", IndexType::Integer),
    ("record_id", IndexType::Integer),
    ("field_id", IndexType::Integer),
    ("field_name", IndexType::Keyword),
    ("source_model", IndexType::Keyword),
    ("target_model", IndexType::Keyword),
    ("knowledge_level", IndexType::Keyword),
];

pub struct UnifiedStore {
    store: Arc<dyn VectorStore>,
    breaker: Option<Arc<CircuitBreaker>>,
    retry: RetryPolicy,
    /// Collection vector dimension; vectorless points (graph edges) are
    /// padded to this with zeros, which similarity recall excludes.
    vector_size: usize,
    /// Serializes read-modify-write per edge point.
    edge_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl UnifiedStore {
    pub fn new(
        store: Arc<dyn VectorStore>,
        breaker: Option<Arc<CircuitBreaker>>,
        retry: RetryPolicy,
        vector_size: usize,
    ) -> Self {
        Self {
            store,
            breaker,
            retry,
            vector_size,
            edge_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn vector_size(&self) -> usize {
        self.vector_size
    }

    pub fn raw(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    async fn guarded<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match &self.breaker {
            Some(breaker) => {
                breaker
                    .call(|| retry_with(self.retry, operation, &mut f))
                    .await
            }
            None => retry_with(self.retry, operation, &mut f).await,
        }
    }

    /// Filter pinned to one point type.
    pub fn kind_filter(kind: PointKind) -> Filter {
        Filter::default().with(Condition::eq("point_type", kind.as_str()))
    }

    /// Filter for one model's data points.
    pub fn data_filter(model_name: &str) -> Filter {
        Self::kind_filter(PointKind::Data).with(Condition::eq("model_name", model_name))
    }

    // ========================================================================
    // Bootstrap
    // ========================================================================

    /// Ensure the collection exists and the universal indexes are present.
    pub async fn bootstrap(&self, registry: &SchemaRegistry) -> Result<()> {
        self.guarded("ensure_collection", || self.store.ensure_collection())
            .await?;
        for (field, index_type) in UNIVERSAL_INDEXES {
            self.guarded("create_index", || {
                self.store.create_payload_index(field, *index_type)
            })
            .await?;
        }
        registry.register_indexed_fields(UNIVERSAL_INDEXES.iter().map(|(f, _)| *f));
        Ok(())
    }

    /// After a data sync, index every payload field of the just-synced
    /// model so filter compilation never scans for them.
    pub async fn register_model_indexes(
        &self,
        schema: &ModelSchema,
        registry: &SchemaRegistry,
    ) -> Result<()> {
        let mut created: Vec<String> = Vec::new();
        for field in &schema.fields {
            for (name, index_type) in index_plan(field) {
                self.guarded("create_index", || {
                    self.store.create_payload_index(&name, index_type)
                })
                .await?;
                created.push(name.clone());
            }
        }
        registry.register_indexed_fields(created.iter().cloned());
        debug!(model = %schema.model_name, indexes = created.len(), "model payload indexes ensured");
        Ok(())
    }

    // ========================================================================
    // Generic typed operations
    // ========================================================================

    pub async fn upsert(&self, mut points: Vec<Point>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        for point in &mut points {
            if point.vector.is_empty() {
                point.vector = vec![0.0; self.vector_size];
            }
        }
        self.guarded("upsert", || self.store.upsert(points.clone()))
            .await
    }

    pub async fn retrieve(
        &self,
        ids: &[String],
        with_payload: bool,
        with_vector: bool,
    ) -> Result<Vec<Point>> {
        self.guarded("retrieve", || {
            self.store.retrieve(ids, with_payload, with_vector)
        })
        .await
    }

    pub async fn scroll(
        &self,
        filter: &Filter,
        limit: usize,
        offset: Option<&str>,
    ) -> Result<ScrollPage> {
        self.guarded("scroll", || self.store.scroll(Some(filter), limit, offset))
            .await
    }

    pub async fn count(&self, filter: &Filter) -> Result<u64> {
        self.guarded("count", || self.store.count(Some(filter), true))
            .await
    }

    pub async fn delete(&self, selector: DeleteSelector) -> Result<()> {
        self.guarded("delete", || self.store.delete(selector.clone()))
            .await
    }

    pub async fn collection_info(&self) -> Result<CollectionInfo> {
        self.guarded("collection_info", || self.store.collection_info())
            .await
    }

    /// Visit every point matching `filter`, page by page.
    pub async fn scroll_each(
        &self,
        filter: &Filter,
        page_size: usize,
        visit: impl FnMut(&[Point]),
    ) -> Result<u64> {
        // Paging drives repeated store calls; each page is retried via the
        // inner scroll, so no outer guard here.
        scroll_all(self.store.as_ref(), Some(filter), page_size, visit).await
    }

    // ========================================================================
    // Data points
    // ========================================================================

    pub async fn count_data(&self, model_name: &str) -> Result<u64> {
        self.count(&Self::data_filter(model_name)).await
    }

    /// Which of `record_ids` already have data points for `model_id`.
    pub async fn existing_record_ids(&self, model_id: u32, record_ids: &[u64]) -> Result<Vec<u64>> {
        let mut present = Vec::new();
        for chunk in record_ids.chunks(256) {
            let ids: Vec<String> = chunk
                .iter()
                .filter_map(|rid| data_uuid(model_id, *rid).ok())
                .map(|id| id.into_string())
                .collect();
            let found = self.retrieve(&ids, false, false).await?;
            for point in &found {
                if let Ok((_, rid)) = nexsus_core::identity::parse_data(&point.id) {
                    present.push(rid);
                }
            }
        }
        Ok(present)
    }

    /// Delete all data points of one model.
    pub async fn delete_model_data(&self, model_name: &str) -> Result<()> {
        info!(model = model_name, "deleting data points");
        self.delete(DeleteSelector::Filter(Self::data_filter(model_name)))
            .await
    }

    // ========================================================================
    // Schema points
    // ========================================================================

    /// Load every schema point back into the registry cache.
    pub async fn load_schema_registry(&self, registry: &SchemaRegistry) -> Result<usize> {
        let filter = Self::kind_filter(PointKind::Schema);
        let mut by_model: HashMap<String, (u32, Vec<FieldDef>)> = HashMap::new();
        self.scroll_each(&filter, 1000, |points| {
            for point in points {
                let Some(def) = FieldDef::from_schema_payload(&point.payload) else {
                    continue;
                };
                let Some(model_name) = point.str_field("model_name") else {
                    continue;
                };
                let model_id = point.u64_field("model_id").unwrap_or(0) as u32;
                by_model
                    .entry(model_name.to_string())
                    .or_insert_with(|| (model_id, Vec::new()))
                    .1
                    .push(def);
            }
        })
        .await?;

        let model_count = by_model.len();
        for (model_name, (model_id, mut fields)) in by_model {
            fields.sort_by_key(|f| f.field_id);
            let primary_key_field_id = fields
                .iter()
                .find(|f| f.field_name == "id")
                .map(|f| f.field_id)
                .unwrap_or_default();
            registry.insert_model(ModelSchema {
                model_name,
                model_id,
                primary_key_field_id,
                fields,
            });
        }
        info!(models = model_count, "schema registry loaded from store");
        Ok(model_count)
    }

    /// Drop all schema points (force-recreate flow).
    pub async fn delete_schema_points(&self) -> Result<()> {
        self.delete(DeleteSelector::Filter(Self::kind_filter(PointKind::Schema)))
            .await
    }

    // ========================================================================
    // Graph edges
    // ========================================================================

    fn edge_lock(&self, edge_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.edge_locks
            .lock()
            .entry(edge_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Merge `delta` into the stored edge (sum/max/union semantics).
    pub async fn merge_graph_edge(&self, delta: &GraphEdge, now: DateTime<Utc>) -> Result<()> {
        let edge_id = delta.point_id()?.into_string();
        let lock = self.edge_lock(&edge_id);
        let _guard = lock.lock().await;

        let existing = self
            .retrieve(std::slice::from_ref(&edge_id), true, false)
            .await?;
        let merged = match existing.first().and_then(GraphEdge::from_point) {
            Some(mut stored) => {
                stored.accumulate(delta);
                stored
            }
            None => delta.clone(),
        };
        self.upsert(vec![merged.to_point(now)?]).await
    }

    pub async fn get_graph_edge(&self, edge_id: &str) -> Result<Option<GraphEdge>> {
        let points = self
            .retrieve(std::slice::from_ref(&edge_id.to_string()), true, false)
            .await?;
        Ok(points.first().and_then(GraphEdge::from_point))
    }

    /// Read-modify-write a validation result onto one edge.
    pub async fn record_edge_validation(
        &self,
        edge_id: &str,
        validated_at: DateTime<Utc>,
        orphans: u64,
        total_references: u64,
        track_history: bool,
    ) -> Result<bool> {
        let lock = self.edge_lock(edge_id);
        let _guard = lock.lock().await;

        let Some(mut edge) = self.get_graph_edge(edge_id).await? else {
            return Ok(false);
        };
        edge.record_validation(validated_at, orphans, total_references, track_history);
        self.upsert(vec![edge.to_point(validated_at)?]).await?;
        Ok(true)
    }

    /// All graph edges originating at `source_model`.
    pub async fn edges_from(&self, source_model: &str) -> Result<Vec<GraphEdge>> {
        let filter = Self::kind_filter(PointKind::Graph)
            .with(Condition::eq("source_model", source_model));
        let mut edges = Vec::new();
        self.scroll_each(&filter, 500, |points| {
            edges.extend(points.iter().filter_map(GraphEdge::from_point));
        })
        .await?;
        Ok(edges)
    }

    // ========================================================================
    // Knowledge points
    // ========================================================================

    pub async fn delete_knowledge_points(&self) -> Result<()> {
        self.delete(DeleteSelector::Filter(Self::kind_filter(
            PointKind::Knowledge,
        )))
        .await
    }
}

/// Index types for one field's payload keys: the raw field plus its FK
/// companions (`<f>_id`, `<f>_qdrant`).
fn index_plan(field: &FieldDef) -> Vec<(String, IndexType)> {
    use nexsus_core::schema::FieldType;

    let mut plan = Vec::new();
    let base = field.field_name.clone();
    match field.field_type {
        FieldType::Many2One | FieldType::Reference => {
            plan.push((base.clone(), IndexType::Keyword));
            plan.push((format!("{base}_id"), IndexType::Integer));
            plan.push((format!("{base}_qdrant"), IndexType::Keyword));
        }
        FieldType::One2Many | FieldType::Many2Many => {
            plan.push((base.clone(), IndexType::Integer));
            plan.push((format!("{base}_qdrant"), IndexType::Keyword));
        }
        FieldType::Json => {
            if field.json_fk_target.is_some() {
                plan.push((format!("{base}_qdrant"), IndexType::Keyword));
            }
        }
        FieldType::Integer => plan.push((base, IndexType::Integer)),
        FieldType::Float | FieldType::Monetary => plan.push((base, IndexType::Float)),
        FieldType::Boolean => plan.push((base, IndexType::Bool)),
        // Dates are stored as ISO strings; keyword matches exact filters.
        _ => plan.push((base, IndexType::Keyword)),
    }
    plan
}
