//! Model/field metadata and the cached schema registry.
//!
//! Schema Sync writes schema points into the store; the registry reads
//! them back and keeps an in-memory cache per model. The registry never
//! writes. `clear_cache` must be called after any schema change.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;

use crate::error::{NexsusError, Result};
use crate::identity::{schema_uuid, RelationshipCode};
use crate::point::Payload;

/// ERP field types, as delivered by the schema source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Many2One,
    One2Many,
    Many2Many,
    Reference,
    Monetary,
    Integer,
    Float,
    Date,
    Datetime,
    Selection,
    Json,
    Char,
    Text,
    Boolean,
}

impl FieldType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "many2one" => Some(Self::Many2One),
            "one2many" => Some(Self::One2Many),
            "many2many" => Some(Self::Many2Many),
            "reference" => Some(Self::Reference),
            "monetary" => Some(Self::Monetary),
            "integer" => Some(Self::Integer),
            "float" => Some(Self::Float),
            "date" => Some(Self::Date),
            "datetime" => Some(Self::Datetime),
            "selection" => Some(Self::Selection),
            "json" => Some(Self::Json),
            "char" => Some(Self::Char),
            "text" | "html" => Some(Self::Text),
            "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Many2One => "many2one",
            Self::One2Many => "one2many",
            Self::Many2Many => "many2many",
            Self::Reference => "reference",
            Self::Monetary => "monetary",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Selection => "selection",
            Self::Json => "json",
            Self::Char => "char",
            Self::Text => "text",
            Self::Boolean => "boolean",
        }
    }

    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            Self::Many2One | Self::One2Many | Self::Many2Many | Self::Reference
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Monetary | Self::Integer | Self::Float)
    }

    pub fn is_date(&self) -> bool {
        matches!(self, Self::Date | Self::Datetime)
    }

    /// Relationship code used in the graph-edge namespace.
    pub fn relationship_code(&self) -> Option<RelationshipCode> {
        match self {
            Self::Many2One | Self::Reference => Some(RelationshipCode::ManyToOne),
            Self::One2Many => Some(RelationshipCode::OneToMany),
            Self::Many2Many => Some(RelationshipCode::ManyToMany),
            // JSON-FK mappings behave like one-to-one links per key.
            Self::Json => Some(RelationshipCode::OneToOne),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregation operators the query layer validates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Sum,
    Count,
    Avg,
    Min,
    Max,
}

impl AggregateOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sum" => Some(Self::Sum),
            "count" => Some(Self::Count),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// One field of a model, as known to the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub field_id: u64,
    pub field_name: String,
    pub field_label: String,
    pub field_type: FieldType,
    pub stored: bool,
    /// Whether the raw value is copied into data-point payloads.
    pub in_payload: bool,
    /// FK target model name, when this field is a relation.
    pub fk_model: Option<String>,
    /// FK target model id, when the target is known to the registry.
    pub fk_model_id: Option<u32>,
    /// For JSON fields carrying FK ids in their keys: the target model name.
    pub json_fk_target: Option<String>,
}

impl FieldDef {
    /// Whether aggregation `op` is meaningful over this field.
    ///
    /// Numeric types support everything; date types only min/max/count;
    /// anything else only count.
    pub fn supports_aggregate(&self, op: AggregateOp) -> bool {
        if self.field_type.is_numeric() {
            return true;
        }
        if self.field_type.is_date() {
            return matches!(op, AggregateOp::Min | AggregateOp::Max | AggregateOp::Count);
        }
        matches!(op, AggregateOp::Count)
    }

    /// Payload of this field's schema point.
    pub fn to_schema_payload(&self, model_name: &str, model_id: u32, semantic_text: &str) -> Payload {
        let mut payload = Payload::new();
        payload.insert("field_id".into(), Value::from(self.field_id));
        payload.insert("model_id".into(), Value::from(model_id));
        payload.insert("model_name".into(), Value::String(model_name.into()));
        payload.insert("field_name".into(), Value::String(self.field_name.clone()));
        payload.insert("field_label".into(), Value::String(self.field_label.clone()));
        payload.insert(
            "field_type".into(),
            Value::String(self.field_type.as_str().into()),
        );
        payload.insert("stored".into(), Value::Bool(self.stored));
        payload.insert("in_payload".into(), Value::Bool(self.in_payload));
        payload.insert("semantic_text".into(), Value::String(semantic_text.into()));
        if let Some(fk_model) = &self.fk_model {
            payload.insert("fk_location_model".into(), Value::String(fk_model.clone()));
        }
        if let Some(fk_model_id) = self.fk_model_id {
            payload.insert("fk_location_model_id".into(), Value::from(fk_model_id));
        }
        if let Some(target) = &self.json_fk_target {
            payload.insert("json_fk_target".into(), Value::String(target.clone()));
        }
        payload
    }

    /// Rebuild a field definition from a schema-point payload.
    pub fn from_schema_payload(payload: &Payload) -> Option<FieldDef> {
        Some(FieldDef {
            field_id: payload.get("field_id")?.as_u64()?,
            field_name: payload.get("field_name")?.as_str()?.to_string(),
            field_label: payload
                .get("field_label")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            field_type: FieldType::parse(payload.get("field_type")?.as_str()?)?,
            stored: payload
                .get("stored")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            in_payload: payload
                .get("in_payload")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            fk_model: payload
                .get("fk_location_model")
                .and_then(Value::as_str)
                .map(str::to_string),
            fk_model_id: payload
                .get("fk_location_model_id")
                .and_then(Value::as_u64)
                .map(|v| v as u32),
            json_fk_target: payload
                .get("json_fk_target")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Everything the registry knows about one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSchema {
    pub model_name: String,
    pub model_id: u32,
    pub primary_key_field_id: u64,
    pub fields: Vec<FieldDef>,
}

impl ModelSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.field_name == name)
    }

    pub fn payload_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.in_payload)
    }

    pub fn fk_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields
            .iter()
            .filter(|f| f.field_type.is_relational() || f.json_fk_target.is_some())
    }

    /// Whether this model has no outgoing FK fields with known targets.
    pub fn is_leaf(&self) -> bool {
        !self.fk_fields().any(|f| f.fk_model_id.is_some())
    }

    /// Deterministic UUID of this model's primary-key schema point.
    pub fn primary_key_point(&self) -> Result<crate::identity::PointId> {
        Ok(schema_uuid(self.primary_key_field_id)?)
    }
}

#[derive(Default)]
struct RegistryInner {
    models: AHashMap<String, Arc<ModelSchema>>,
    by_id: AHashMap<u32, String>,
    indexed_fields: BTreeSet<String>,
}

/// Cached lookup of model/field metadata.
///
/// Populated from schema points by the sync layer; consumers only read.
#[derive(Default)]
pub struct SchemaRegistry {
    inner: RwLock<RegistryInner>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) a model's schema in the cache.
    ///
    /// This is the feed point for the schema loader; it is not a write to
    /// the store.
    pub fn insert_model(&self, schema: ModelSchema) {
        let mut inner = self.inner.write();
        inner.by_id.insert(schema.model_id, schema.model_name.clone());
        inner
            .models
            .insert(schema.model_name.clone(), Arc::new(schema));
    }

    pub fn model_exists(&self, name: &str) -> bool {
        self.inner.read().models.contains_key(name)
    }

    pub fn model(&self, name: &str) -> Result<Arc<ModelSchema>> {
        self.inner
            .read()
            .models
            .get(name)
            .cloned()
            .ok_or_else(|| NexsusError::ModelNotFound(name.to_string()))
    }

    pub fn model_name_by_id(&self, model_id: u32) -> Option<String> {
        self.inner.read().by_id.get(&model_id).cloned()
    }

    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().models.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn fields(&self, model: &str) -> Result<Vec<FieldDef>> {
        Ok(self.model(model)?.fields.clone())
    }

    pub fn payload_fields(&self, model: &str) -> Result<Vec<FieldDef>> {
        Ok(self.model(model)?.payload_fields().cloned().collect())
    }

    pub fn field_by_name(&self, model: &str, field: &str) -> Result<FieldDef> {
        let schema = self.model(model)?;
        schema
            .field(field)
            .cloned()
            .ok_or_else(|| NexsusError::FieldNotFound {
                model: model.to_string(),
                field: field.to_string(),
            })
    }

    pub fn is_aggregation_safe(&self, model: &str, field: &str, op: AggregateOp) -> Result<bool> {
        Ok(self.field_by_name(model, field)?.supports_aggregate(op))
    }

    /// Record payload fields that have a store index, so the query compiler
    /// can route conditions natively instead of scanning.
    pub fn register_indexed_fields<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.write();
        for name in names {
            inner.indexed_fields.insert(name.into());
        }
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        self.inner.read().indexed_fields.contains(field)
    }

    pub fn indexed_fields(&self) -> BTreeSet<String> {
        self.inner.read().indexed_fields.clone()
    }

    /// Drop all cached schemas. Call after any schema change.
    pub fn clear_cache(&self) {
        let mut inner = self.inner.write();
        inner.models.clear();
        inner.by_id.clear();
    }
}

/// Constructors for hand-built schemas, used by tests across the
/// workspace.
pub mod testing {
    use super::*;

    pub fn field(
        field_id: u64,
        name: &str,
        label: &str,
        ftype: FieldType,
        in_payload: bool,
    ) -> FieldDef {
        FieldDef {
            field_id,
            field_name: name.into(),
            field_label: label.into(),
            field_type: ftype,
            stored: true,
            in_payload,
            fk_model: None,
            fk_model_id: None,
            json_fk_target: None,
        }
    }

    pub fn fk_field(
        field_id: u64,
        name: &str,
        label: &str,
        ftype: FieldType,
        fk_model: &str,
        fk_model_id: u32,
    ) -> FieldDef {
        FieldDef {
            fk_model: Some(fk_model.into()),
            fk_model_id: Some(fk_model_id),
            ..field(field_id, name, label, ftype, true)
        }
    }
}
