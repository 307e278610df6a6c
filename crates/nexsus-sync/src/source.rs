//! The record-source contract.
//!
//! Adapters (Odoo JSON-RPC, spreadsheet exports, test fixtures) supply
//! raw record iterators and schema metadata. The core assumes
//! at-least-once delivery and relies on idempotent upserts.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use nexsus_core::error::{NexsusError, Result};

/// One leaf of an Odoo-style search domain: `(field, operator, value)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainLeaf {
    pub field: String,
    pub op: String,
    pub value: Value,
}

impl DomainLeaf {
    pub fn new(field: impl Into<String>, op: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: op.into(),
            value,
        }
    }

    pub fn to_wire(&self) -> Value {
        Value::Array(vec![
            Value::String(self.field.clone()),
            Value::String(self.op.clone()),
            self.value.clone(),
        ])
    }
}

/// Implicitly AND'd domain.
pub type Domain = Vec<DomainLeaf>;

/// Domain selecting specific record ids.
pub fn ids_domain(ids: &[u64]) -> Domain {
    vec![DomainLeaf::new(
        "id",
        "in",
        Value::Array(ids.iter().map(|id| Value::from(*id)).collect()),
    )]
}

/// A model as listed by the source, with its ERP-side numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceModel {
    pub name: String,
    pub model_id: u32,
}

/// Field metadata as delivered by the source's schema endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceField {
    pub field_id: u64,
    pub name: String,
    pub label: String,
    /// ERP type string (`many2one`, `monetary`, …).
    pub ttype: String,
    pub stored: bool,
    /// Target model name for relational fields.
    pub relation: Option<String>,
}

/// A raw record: ERP field name → raw JSON value.
pub type RawRecord = Map<String, Value>;

#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch(
        &self,
        model: &str,
        domain: &Domain,
        fields: &[String],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RawRecord>>;

    async fn count(&self, model: &str, domain: &Domain) -> Result<u64>;

    async fn list_models(&self) -> Result<Vec<SourceModel>>;

    async fn schema(&self, model: &str) -> Result<Vec<SourceField>>;
}

// ============================================================================
// Static in-memory source (tests, fixtures)
// ============================================================================

#[derive(Default)]
struct StaticInner {
    models: BTreeMap<String, SourceModel>,
    schemas: BTreeMap<String, Vec<SourceField>>,
    records: BTreeMap<String, Vec<RawRecord>>,
}

/// A fixed record source backed by in-memory maps.
#[derive(Default)]
pub struct StaticSource {
    inner: RwLock<StaticInner>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(&self, model: SourceModel, schema: Vec<SourceField>) {
        let mut inner = self.inner.write();
        inner.schemas.insert(model.name.clone(), schema);
        inner.models.insert(model.name.clone(), model);
    }

    pub fn add_records(&self, model: &str, records: Vec<Value>) {
        let mut inner = self.inner.write();
        let slot = inner.records.entry(model.to_string()).or_default();
        for record in records {
            if let Value::Object(map) = record {
                slot.push(map);
            }
        }
    }

    pub fn remove_record(&self, model: &str, record_id: u64) {
        let mut inner = self.inner.write();
        if let Some(records) = inner.records.get_mut(model) {
            records.retain(|r| r.get("id").and_then(Value::as_u64) != Some(record_id));
        }
    }

    fn leaf_matches(record: &RawRecord, leaf: &DomainLeaf) -> bool {
        let actual = record.get(&leaf.field);
        match leaf.op.as_str() {
            "=" => actual == Some(&leaf.value),
            "!=" => actual != Some(&leaf.value),
            "in" => leaf
                .value
                .as_array()
                .is_some_and(|vs| actual.is_some_and(|a| vs.contains(a))),
            ">=" => cmp_values(actual, &leaf.value).is_some_and(|o| o.is_ge()),
            "<=" => cmp_values(actual, &leaf.value).is_some_and(|o| o.is_le()),
            ">" => cmp_values(actual, &leaf.value).is_some_and(|o| o.is_gt()),
            "<" => cmp_values(actual, &leaf.value).is_some_and(|o| o.is_lt()),
            _ => true,
        }
    }
}

fn cmp_values(actual: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    let actual = actual?;
    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (actual.as_str(), expected.as_str()) {
        return Some(a.cmp(b));
    }
    None
}

#[async_trait]
impl RecordSource for StaticSource {
    async fn fetch(
        &self,
        model: &str,
        domain: &Domain,
        fields: &[String],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RawRecord>> {
        let inner = self.inner.read();
        let Some(records) = inner.records.get(model) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .filter(|r| domain.iter().all(|leaf| Self::leaf_matches(r, leaf)))
            .skip(offset)
            .take(limit)
            .map(|r| {
                if fields.is_empty() {
                    r.clone()
                } else {
                    r.iter()
                        .filter(|(k, _)| fields.iter().any(|f| f == *k) || *k == "id")
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                }
            })
            .collect())
    }

    async fn count(&self, model: &str, domain: &Domain) -> Result<u64> {
        let inner = self.inner.read();
        Ok(inner
            .records
            .get(model)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| domain.iter().all(|leaf| Self::leaf_matches(r, leaf)))
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn list_models(&self) -> Result<Vec<SourceModel>> {
        Ok(self.inner.read().models.values().cloned().collect())
    }

    async fn schema(&self, model: &str) -> Result<Vec<SourceField>> {
        self.inner
            .read()
            .schemas
            .get(model)
            .cloned()
            .ok_or_else(|| NexsusError::ModelNotFound(model.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> StaticSource {
        let s = StaticSource::new();
        s.add_model(
            SourceModel {
                name: "m1".into(),
                model_id: 10,
            },
            vec![SourceField {
                field_id: 100,
                name: "id".into(),
                label: "ID".into(),
                ttype: "integer".into(),
                stored: true,
                relation: None,
            }],
        );
        s.add_records(
            "m1",
            vec![
                json!({"id": 1, "name": "A"}),
                json!({"id": 2, "name": "B"}),
                json!({"id": 3, "name": "C"}),
            ],
        );
        s
    }

    #[tokio::test]
    async fn fetch_with_ids_domain() {
        let s = source();
        let records = s
            .fetch("m1", &ids_domain(&[1, 3]), &[], 0, 100)
            .await
            .unwrap();
        let ids: Vec<u64> = records
            .iter()
            .map(|r| r["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn fetch_projects_fields_but_keeps_id() {
        let s = source();
        let records = s
            .fetch("m1", &Domain::new(), &["name".to_string()], 0, 100)
            .await
            .unwrap();
        assert!(records[0].contains_key("id"));
        assert!(records[0].contains_key("name"));
    }

    #[tokio::test]
    async fn count_and_pagination() {
        let s = source();
        assert_eq!(s.count("m1", &Domain::new()).await.unwrap(), 3);
        let page = s.fetch("m1", &Domain::new(), &[], 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["id"], json!(2));
    }

    #[tokio::test]
    async fn unknown_schema_is_model_not_found() {
        let s = source();
        assert!(matches!(
            s.schema("nope").await.unwrap_err(),
            NexsusError::ModelNotFound(_)
        ));
    }
}

// ============================================================================
// JSON export source (spreadsheet-export adapter boundary)
// ============================================================================

/// A record source backed by one exported JSON file, the shape a
/// spreadsheet export lands in:
///
/// ```json
/// {"models": [{"name": "...", "model_id": 1,
///              "fields": [{"field_id": 1, "name": "id", "ttype": "integer"}],
///              "records": [{"id": 1}]}]}
/// ```
pub struct JsonExportSource {
    inner: StaticSource,
}

impl JsonExportSource {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| NexsusError::Config(format!("export file {}: {e}", path.display())))?;
        let parsed: Value = serde_json::from_str(&raw)
            .map_err(|e| NexsusError::Config(format!("export file {}: {e}", path.display())))?;
        let inner = StaticSource::new();

        let models = parsed
            .get("models")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                NexsusError::Config(format!("export file {} has no models array", path.display()))
            })?;
        for model in models {
            let name = model
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| NexsusError::Config("export model without a name".into()))?;
            let model_id = model.get("model_id").and_then(Value::as_u64).unwrap_or(0) as u32;
            let fields = model
                .get("fields")
                .and_then(Value::as_array)
                .map(|fields| {
                    fields
                        .iter()
                        .filter_map(|f| {
                            Some(SourceField {
                                field_id: f.get("field_id")?.as_u64()?,
                                name: f.get("name")?.as_str()?.to_string(),
                                label: f
                                    .get("label")
                                    .and_then(Value::as_str)
                                    .unwrap_or_default()
                                    .to_string(),
                                ttype: f.get("ttype")?.as_str()?.to_string(),
                                stored: f.get("stored").and_then(Value::as_bool).unwrap_or(true),
                                relation: f
                                    .get("relation")
                                    .and_then(Value::as_str)
                                    .filter(|r| !r.is_empty())
                                    .map(str::to_string),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            inner.add_model(
                SourceModel {
                    name: name.to_string(),
                    model_id,
                },
                fields,
            );
            if let Some(records) = model.get("records").and_then(Value::as_array) {
                inner.add_records(name, records.to_vec());
            }
        }
        Ok(Self { inner })
    }
}

#[async_trait]
impl RecordSource for JsonExportSource {
    async fn fetch(
        &self,
        model: &str,
        domain: &Domain,
        fields: &[String],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RawRecord>> {
        self.inner.fetch(model, domain, fields, offset, limit).await
    }

    async fn count(&self, model: &str, domain: &Domain) -> Result<u64> {
        self.inner.count(model, domain).await
    }

    async fn list_models(&self) -> Result<Vec<SourceModel>> {
        self.inner.list_models().await
    }

    async fn schema(&self, model: &str) -> Result<Vec<SourceField>> {
        self.inner.schema(model).await
    }
}
