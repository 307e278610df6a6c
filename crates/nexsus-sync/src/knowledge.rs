//! Knowledge sync.
//!
//! Indexes auxiliary documents into the shared collection under the
//! knowledge namespace: per-instance configuration, per-model business
//! metadata, and per-field usage guidance. Cross-level consistency is
//! checked pre-upsert and surfaced as warnings, never errors.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use nexsus_core::error::{NexsusError, Result};
use nexsus_core::identity::{knowledge_uuid, KnowledgeLevel, PointKind};
use nexsus_core::pattern::truncate_chars;
use nexsus_core::point::{stamp_common, Payload, Point};

use crate::scheduler::SyncContext;

const MAX_SEMANTIC_CHARS: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfigItem {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelKnowledgeItem {
    pub model: String,
    pub business_name: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub use_cases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldKnowledgeItem {
    pub model: String,
    pub field: String,
    #[serde(default)]
    pub meaning: String,
    #[serde(default)]
    pub valid_values: Vec<String>,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub usage_notes: String,
}

/// The three knowledge streams, usually loaded from one JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeCatalog {
    #[serde(default)]
    pub instance: Vec<InstanceConfigItem>,
    #[serde(default)]
    pub models: Vec<ModelKnowledgeItem>,
    #[serde(default)]
    pub fields: Vec<FieldKnowledgeItem>,
}

impl KnowledgeCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| NexsusError::Config(format!("knowledge catalog {}: {e}", path.display())))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeReport {
    pub indexed: u64,
    pub warnings: Vec<String>,
}

pub struct KnowledgeSync<'a> {
    ctx: &'a SyncContext,
}

impl<'a> KnowledgeSync<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, catalog: &KnowledgeCatalog, force: bool) -> Result<KnowledgeReport> {
        let mut report = KnowledgeReport::default();
        self.check_consistency(catalog, &mut report.warnings);

        if force {
            info!("force knowledge sync: dropping existing knowledge points");
            self.ctx.store.delete_knowledge_points().await?;
        }

        let now = Utc::now();
        let mut texts: Vec<String> = Vec::new();
        let mut pending: Vec<(nexsus_core::identity::PointId, Payload)> = Vec::new();

        for (index, item) in catalog.instance.iter().enumerate() {
            let id = knowledge_uuid(KnowledgeLevel::Instance, 0, index as u64)?;
            let mut payload = Payload::new();
            payload.insert("knowledge_level".into(), Value::String("instance".into()));
            payload.insert("config_key".into(), Value::String(item.key.clone()));
            payload.insert("config_value".into(), Value::String(item.value.clone()));
            payload.insert("category".into(), Value::String(item.category.clone()));
            stamp_common(&mut payload, PointKind::Knowledge, &id, now);
            texts.push(truncate_chars(
                format!(
                    "Instance configuration {}: {} = {}",
                    item.category, item.key, item.value
                ),
                MAX_SEMANTIC_CHARS,
            ));
            pending.push((id, payload));
        }

        for (index, item) in catalog.models.iter().enumerate() {
            let model_id = self
                .ctx
                .registry
                .model(&item.model)
                .map(|m| m.model_id)
                .unwrap_or(0);
            let id = knowledge_uuid(KnowledgeLevel::Model, model_id, index as u64)?;
            let mut payload = Payload::new();
            payload.insert("knowledge_level".into(), Value::String("model".into()));
            payload.insert("model_name".into(), Value::String(item.model.clone()));
            payload.insert("model_id".into(), Value::from(model_id));
            payload.insert(
                "business_name".into(),
                Value::String(item.business_name.clone()),
            );
            payload.insert("purpose".into(), Value::String(item.purpose.clone()));
            payload.insert(
                "use_cases".into(),
                Value::Array(item.use_cases.iter().map(|u| Value::String(u.clone())).collect()),
            );
            stamp_common(&mut payload, PointKind::Knowledge, &id, now);
            texts.push(truncate_chars(
                format!(
                    "Model {} ({}): {}. Use cases: {}",
                    item.business_name,
                    item.model,
                    item.purpose,
                    item.use_cases.join("; ")
                ),
                MAX_SEMANTIC_CHARS,
            ));
            pending.push((id, payload));
        }

        for (index, item) in catalog.fields.iter().enumerate() {
            let (model_id, field_id) = match self.ctx.registry.field_by_name(&item.model, &item.field)
            {
                Ok(def) => (
                    self.ctx
                        .registry
                        .model(&item.model)
                        .map(|m| m.model_id)
                        .unwrap_or(0),
                    def.field_id,
                ),
                Err(_) => (0, index as u64),
            };
            let id = knowledge_uuid(KnowledgeLevel::Field, model_id, field_id)?;
            let mut payload = Payload::new();
            payload.insert("knowledge_level".into(), Value::String("field".into()));
            payload.insert("model_name".into(), Value::String(item.model.clone()));
            payload.insert("field_name".into(), Value::String(item.field.clone()));
            payload.insert("meaning".into(), Value::String(item.meaning.clone()));
            payload.insert(
                "valid_values".into(),
                Value::Array(
                    item.valid_values
                        .iter()
                        .map(|v| Value::String(v.clone()))
                        .collect(),
                ),
            );
            payload.insert("format".into(), Value::String(item.format.clone()));
            payload.insert("usage_notes".into(), Value::String(item.usage_notes.clone()));
            stamp_common(&mut payload, PointKind::Knowledge, &id, now);
            texts.push(truncate_chars(
                format!(
                    "Field {} on {}: {}. Valid values: {}. Format: {}. {}",
                    item.field,
                    item.model,
                    item.meaning,
                    item.valid_values.join(", "),
                    item.format,
                    item.usage_notes
                ),
                MAX_SEMANTIC_CHARS,
            ));
            pending.push((id, payload));
        }

        if pending.is_empty() {
            return Ok(report);
        }

        let vectors = self.ctx.gateway.embed_documents(&texts).await?;
        let points: Vec<Point> = pending
            .into_iter()
            .zip(vectors)
            .map(|((id, payload), vector)| Point::new(id, vector, payload))
            .collect();
        report.indexed = points.len() as u64;
        self.ctx.store.upsert(points).await?;

        info!(
            indexed = report.indexed,
            warnings = report.warnings.len(),
            "knowledge sync finished"
        );
        Ok(report)
    }

    /// Cross-level checks: instance config referencing models, models in
    /// metadata, field knowledge against the schema registry.
    fn check_consistency(&self, catalog: &KnowledgeCatalog, warnings: &mut Vec<String>) {
        for item in &catalog.models {
            if !self.ctx.registry.model_exists(&item.model) {
                warnings.push(format!(
                    "model knowledge references unknown model {}",
                    item.model
                ));
            }
        }
        for item in &catalog.fields {
            if self
                .ctx
                .registry
                .field_by_name(&item.model, &item.field)
                .is_err()
            {
                warnings.push(format!(
                    "field knowledge references unknown field {}.{}",
                    item.model, item.field
                ));
            }
        }
        for warning in warnings.iter() {
            warn!(%warning, "knowledge consistency");
        }
    }
}
