//! Schema sync: the only writer of schema points.
//!
//! Pulls field metadata from the record source (or a JSON catalog),
//! resolves FK target model ids, embeds a per-field description, and
//! upserts one schema point per field. After any schema change the
//! registry cache is cleared and reloaded from the store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use nexsus_core::error::{NexsusError, Result};
use nexsus_core::identity::{schema_uuid, PointKind};
use nexsus_core::pattern::truncate_chars;
use nexsus_core::point::{stamp_common, Point};
use nexsus_core::schema::{FieldDef, FieldType};
use serde_json::Value;

use crate::scheduler::SyncContext;
use crate::source::SourceField;

/// Optional JSON catalog: which models to mirror, payload allowlists,
/// JSON-FK mappings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    /// Models to sync; empty means every model the source lists.
    #[serde(default)]
    pub models: Vec<String>,
    /// Per-model payload-eligible field names; a missing entry means all
    /// stored fields are payload-eligible.
    #[serde(default)]
    pub payload_fields: BTreeMap<String, Vec<String>>,
    /// Per-model JSON-FK mappings: field name → target model.
    #[serde(default)]
    pub json_fk: BTreeMap<String, BTreeMap<String, String>>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| NexsusError::Config(format!("catalog {}: {e}", path.display())))?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn in_payload(&self, model: &str, field: &str) -> bool {
        match self.payload_fields.get(model) {
            Some(allowed) => allowed.iter().any(|f| f == field),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaSyncReport {
    pub models: u64,
    pub fields: u64,
    pub skipped_fields: u64,
}

pub struct SchemaSync<'a> {
    ctx: &'a SyncContext,
    catalog: Catalog,
}

impl<'a> SchemaSync<'a> {
    pub fn new(ctx: &'a SyncContext, catalog: Catalog) -> Self {
        Self { ctx, catalog }
    }

    /// Mirror schema metadata into the store. `force` drops all existing
    /// schema points first.
    pub async fn run(&self, force: bool) -> Result<SchemaSyncReport> {
        if force {
            info!("force schema sync: dropping existing schema points");
            self.ctx.store.delete_schema_points().await?;
        }

        let listed = self.ctx.source.list_models().await?;
        let model_ids: BTreeMap<String, u32> =
            listed.iter().map(|m| (m.name.clone(), m.model_id)).collect();

        let wanted: Vec<String> = if self.catalog.models.is_empty() {
            listed.iter().map(|m| m.name.clone()).collect()
        } else {
            self.catalog.models.clone()
        };

        // First pass: collect every model's fields so FK primary-key
        // references can be resolved across models.
        let mut per_model: BTreeMap<String, Vec<(FieldDef, String)>> = BTreeMap::new();
        let mut report = SchemaSyncReport::default();
        for model in &wanted {
            if !model_ids.contains_key(model) {
                warn!(model, "source does not list model, skipping");
                continue;
            }
            let source_fields = self.ctx.source.schema(model).await?;
            let mut defs = Vec::new();
            for sf in source_fields {
                match self.to_field_def(model, &sf, &model_ids) {
                    Some(def) => {
                        let text = field_semantic_text(model, &def);
                        defs.push((def, text));
                    }
                    None => report.skipped_fields += 1,
                }
            }
            per_model.insert(model.clone(), defs);
        }

        // Second pass: primary-key point ids for FK targets.
        let pk_by_model: BTreeMap<String, u64> = per_model
            .iter()
            .filter_map(|(model, defs)| {
                defs.iter()
                    .find(|(d, _)| d.field_name == "id")
                    .map(|(d, _)| (model.clone(), d.field_id))
            })
            .collect();

        let now = Utc::now();
        for (model, defs) in &per_model {
            let model_id = model_ids[model];
            let texts: Vec<String> = defs.iter().map(|(_, text)| text.clone()).collect();
            let vectors = self.ctx.gateway.embed_documents(&texts).await?;

            let mut points = Vec::with_capacity(defs.len());
            for ((def, text), vector) in defs.iter().zip(vectors) {
                let id = schema_uuid(def.field_id)?;
                let mut payload = def.to_schema_payload(model, model_id, text);
                if let Some(fk_model) = &def.fk_model {
                    if let Some(pk_field_id) = pk_by_model.get(fk_model) {
                        payload.insert(
                            "fk_qdrant_id".into(),
                            Value::String(schema_uuid(*pk_field_id)?.into_string()),
                        );
                    }
                }
                stamp_common(&mut payload, PointKind::Schema, &id, now);
                points.push(Point::new(id, vector, payload));
            }
            report.fields += points.len() as u64;
            report.models += 1;
            self.ctx.store.upsert(points).await?;
        }

        // Schema changed: rebuild the registry cache from the store.
        self.ctx.registry.clear_cache();
        self.ctx.store.load_schema_registry(&self.ctx.registry).await?;

        info!(
            models = report.models,
            fields = report.fields,
            skipped = report.skipped_fields,
            "schema sync finished"
        );
        Ok(report)
    }

    fn to_field_def(
        &self,
        model: &str,
        sf: &SourceField,
        model_ids: &BTreeMap<String, u32>,
    ) -> Option<FieldDef> {
        let field_type = match FieldType::parse(&sf.ttype) {
            Some(t) => t,
            None => {
                warn!(model, field = %sf.name, ttype = %sf.ttype, "unsupported field type, skipping");
                return None;
            }
        };
        let json_fk_target = self
            .catalog
            .json_fk
            .get(model)
            .and_then(|m| m.get(&sf.name))
            .cloned();
        let fk_model = sf.relation.clone().or_else(|| json_fk_target.clone());
        let fk_model_id = fk_model.as_deref().and_then(|m| model_ids.get(m)).copied();
        Some(FieldDef {
            field_id: sf.field_id,
            field_name: sf.name.clone(),
            field_label: if sf.label.is_empty() {
                sf.name.clone()
            } else {
                sf.label.clone()
            },
            field_type,
            stored: sf.stored,
            in_payload: self.catalog.in_payload(model, &sf.name),
            fk_model: sf.relation.clone(),
            fk_model_id,
            json_fk_target,
        })
    }
}

/// The embedding source text of one schema point.
fn field_semantic_text(model: &str, def: &FieldDef) -> String {
    let mut text = format!(
        "Field {} ({}) of type {} on model {}",
        def.field_label, def.field_name, def.field_type, model
    );
    if let Some(fk_model) = &def.fk_model {
        text.push_str(&format!(", references {fk_model}"));
    }
    if !def.stored {
        text.push_str(", computed");
    }
    truncate_chars(text, 500)
}
