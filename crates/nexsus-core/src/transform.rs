//! Record → (narrative, payload) transformation.
//!
//! The narrative is the only text the embedding provider ever sees; the
//! payload is what filtered retrieval and graph traversal run on. The FK
//! cross-reference contract lives here: for every FK value whose target
//! model id is known, the payload gains a `<field>_qdrant` companion
//! holding the deterministic data-UUID(s) of the target point(s), even
//! when the field itself is not payload-eligible.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::identity::{data_uuid, PointId, PointKind};
use crate::pattern::{truncate_chars, Formatter, NarrativePattern};
use crate::point::{stamp_common, Payload};
use crate::schema::{FieldDef, FieldType, ModelSchema};
use crate::value::{Record, RecordValue};

/// Default ceiling for the generated narrative when no pattern overrides it.
pub const DEFAULT_MAX_NARRATIVE_CHARS: usize = 4000;

/// An FK observation made while transforming one record: which field, and
/// which target records it points at. The sync step folds these into graph
/// edges and cascade work items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FkRef {
    pub field_id: u64,
    pub field_name: String,
    pub field_label: String,
    pub field_type: FieldType,
    pub target_model: String,
    pub target_model_id: u32,
    pub target_ids: Vec<u64>,
}

/// The transformer's output for one record.
#[derive(Debug, Clone)]
pub struct TransformedRecord {
    pub point_id: PointId,
    pub record_id: u64,
    pub narrative: String,
    pub payload: Payload,
    pub fk_refs: Vec<FkRef>,
}

/// Converts raw ERP records of one model into embeddable points.
pub struct RecordTransformer<'a> {
    schema: &'a ModelSchema,
    pattern: Option<&'a NarrativePattern>,
}

impl<'a> RecordTransformer<'a> {
    pub fn new(schema: &'a ModelSchema, pattern: Option<&'a NarrativePattern>) -> Self {
        Self { schema, pattern }
    }

    /// Transform one decoded record. Fails only when the record has no
    /// usable primary key; per-field problems degrade (logged, slot empty).
    pub fn transform(&self, record: &Record, now: DateTime<Utc>) -> Result<TransformedRecord> {
        let record_id = record
            .get("id")
            .and_then(RecordValue::as_i64)
            .filter(|id| *id >= 0)
            .ok_or_else(|| {
                crate::error::NexsusError::Integrity(format!(
                    "record on {} has no usable id",
                    self.schema.model_name
                ))
            })? as u64;

        let point_id = data_uuid(self.schema.model_id, record_id)?;
        let fk_refs = self.extract_fk_refs(record);
        let payload = self.build_payload(record, record_id, &point_id, now);
        let narrative = self.build_narrative(record);

        Ok(TransformedRecord {
            point_id,
            record_id,
            narrative,
            payload,
            fk_refs,
        })
    }

    // ========================================================================
    // FK extraction
    // ========================================================================

    /// Pull the FK value for `field` out of a record, accepting three input
    /// shapes: an `[id, name]` tuple, a bare scalar under the field name, or
    /// legacy expanded `<f>_id` / `<f>_name` columns. First parse wins.
    fn fk_scalar(&self, record: &Record, field: &FieldDef) -> Option<(u64, Option<String>)> {
        match record.get(&field.field_name) {
            Some(RecordValue::IdName { id, name }) if *id >= 0 => {
                return Some((*id as u64, Some(name.clone())));
            }
            Some(v) if !v.is_empty() => {
                if let Some(id) = v.as_i64().filter(|id| *id >= 0) {
                    // A bare scalar may ride with a legacy display column.
                    let name = record
                        .get(&format!("{}_name", field.field_name))
                        .and_then(|n| n.display_name().map(str::to_string));
                    return Some((id as u64, name));
                }
                warn!(
                    model = %self.schema.model_name,
                    field = %field.field_name,
                    value = ?v,
                    "unparseable many2one value, leaving FK slot empty"
                );
                return None;
            }
            _ => {}
        }
        // Legacy expanded columns.
        let id = record
            .get(&format!("{}_id", field.field_name))
            .and_then(RecordValue::as_i64)
            .filter(|id| *id >= 0)?;
        let name = record
            .get(&format!("{}_name", field.field_name))
            .and_then(|n| n.display_name().map(str::to_string));
        Some((id as u64, name))
    }

    fn fk_id_list(&self, record: &Record, field: &FieldDef) -> Vec<u64> {
        match record.get(&field.field_name) {
            Some(RecordValue::IdList(ids)) => {
                ids.iter().filter(|id| **id >= 0).map(|id| *id as u64).collect()
            }
            Some(RecordValue::IdName { id, .. }) if *id >= 0 => vec![*id as u64],
            Some(RecordValue::Int(id)) if *id >= 0 => vec![*id as u64],
            _ => Vec::new(),
        }
    }

    fn json_fk_ids(&self, record: &Record, field: &FieldDef) -> Vec<u64> {
        match record.get(&field.field_name) {
            Some(RecordValue::Json(map)) => {
                let mut ids: Vec<u64> = map.keys().filter_map(|k| k.parse::<u64>().ok()).collect();
                ids.sort_unstable();
                ids.dedup();
                ids
            }
            _ => Vec::new(),
        }
    }

    /// All FK observations for this record, one entry per field with a
    /// known target model id and a non-empty value.
    fn extract_fk_refs(&self, record: &Record) -> Vec<FkRef> {
        let mut refs = Vec::new();
        for field in self.schema.fk_fields() {
            let Some(target_model_id) = field.fk_model_id else {
                continue;
            };
            let target_model = field
                .fk_model
                .clone()
                .or_else(|| field.json_fk_target.clone())
                .unwrap_or_default();

            let target_ids: Vec<u64> = match field.field_type {
                FieldType::Many2One | FieldType::Reference => self
                    .fk_scalar(record, field)
                    .map(|(id, _)| vec![id])
                    .unwrap_or_default(),
                FieldType::One2Many | FieldType::Many2Many => self.fk_id_list(record, field),
                FieldType::Json => self.json_fk_ids(record, field),
                _ => Vec::new(),
            };
            if target_ids.is_empty() {
                continue;
            }
            refs.push(FkRef {
                field_id: field.field_id,
                field_name: field.field_name.clone(),
                field_label: field.field_label.clone(),
                field_type: field.field_type,
                target_model,
                target_model_id,
                target_ids,
            });
        }
        refs
    }

    // ========================================================================
    // Payload
    // ========================================================================

    fn build_payload(
        &self,
        record: &Record,
        record_id: u64,
        point_id: &PointId,
        now: DateTime<Utc>,
    ) -> Payload {
        let mut payload = Payload::new();

        // Payload-eligible original fields, empties skipped.
        for field in self.schema.payload_fields() {
            if field.field_type.is_relational() {
                continue; // FK companions are written below.
            }
            let Some(value) = record.get(&field.field_name) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            payload.insert(field.field_name.clone(), record_value_to_json(value));
        }

        // FK companions, irrespective of payload eligibility.
        for field in self.schema.fk_fields() {
            let Some(target_model_id) = field.fk_model_id else {
                continue;
            };
            match field.field_type {
                FieldType::Many2One | FieldType::Reference => {
                    let Some((id, name)) = self.fk_scalar(record, field) else {
                        continue;
                    };
                    payload.insert(format!("{}_id", field.field_name), Value::from(id));
                    if let Some(name) = name {
                        payload.insert(field.field_name.clone(), Value::String(name));
                    }
                    if let Ok(uuid) = data_uuid(target_model_id, id) {
                        payload.insert(
                            format!("{}_qdrant", field.field_name),
                            Value::String(uuid.into_string()),
                        );
                    }
                }
                FieldType::One2Many | FieldType::Many2Many => {
                    let ids = self.fk_id_list(record, field);
                    if ids.is_empty() {
                        continue;
                    }
                    payload.insert(
                        field.field_name.clone(),
                        Value::Array(ids.iter().map(|id| Value::from(*id)).collect()),
                    );
                    let uuids: Vec<Value> = ids
                        .iter()
                        .filter_map(|id| data_uuid(target_model_id, *id).ok())
                        .map(|u| Value::String(u.into_string()))
                        .collect();
                    if !uuids.is_empty() {
                        payload.insert(format!("{}_qdrant", field.field_name), Value::Array(uuids));
                    }
                }
                FieldType::Json => {
                    let ids = self.json_fk_ids(record, field);
                    let uuids: Vec<Value> = ids
                        .iter()
                        .filter_map(|id| data_uuid(target_model_id, *id).ok())
                        .map(|u| Value::String(u.into_string()))
                        .collect();
                    if !uuids.is_empty() {
                        payload.insert(format!("{}_qdrant", field.field_name), Value::Array(uuids));
                    }
                }
                _ => {}
            }
        }

        payload.insert("model_id".into(), Value::from(self.schema.model_id));
        payload.insert(
            "model_name".into(),
            Value::String(self.schema.model_name.clone()),
        );
        payload.insert("record_id".into(), Value::from(record_id));
        stamp_common(&mut payload, PointKind::Data, point_id, now);
        payload
    }

    // ========================================================================
    // Narrative
    // ========================================================================

    fn build_narrative(&self, record: &Record) -> String {
        match self.pattern {
            Some(pattern) => self.patterned_narrative(record, pattern),
            None => {
                let narrative = self.default_narrative(record);
                truncate_chars(narrative, DEFAULT_MAX_NARRATIVE_CHARS)
            }
        }
    }

    /// `"In model <model_name>, <label> - <value>, …"` over non-empty fields.
    fn default_narrative(&self, record: &Record) -> String {
        let mut parts = Vec::new();
        for field in &self.schema.fields {
            if field.field_name == "id" {
                continue;
            }
            let Some(value) = record.get(&field.field_name) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let rendered = humanize(value, field.field_type, None);
            if rendered.is_empty() {
                continue;
            }
            parts.push(format!("{} - {}", field.field_label, rendered));
        }
        format!("In model {}, {}", self.schema.model_name, parts.join(", "))
    }

    fn patterned_narrative(&self, record: &Record, pattern: &NarrativePattern) -> String {
        let mut body = pattern.render(|field_name, formatter| {
            let Some(def) = self.schema.field(field_name) else {
                return String::new();
            };
            record
                .get(field_name)
                .filter(|v| !v.is_empty())
                .map(|v| humanize(v, def.field_type, formatter))
                .unwrap_or_default()
        });

        if pattern.include_remaining {
            let covered = pattern.covered_fields();
            let mut appendix = Vec::new();
            for field in &self.schema.fields {
                if field.field_name == "id" || covered.contains(&field.field_name) {
                    continue;
                }
                let Some(value) = record.get(&field.field_name) else {
                    continue;
                };
                if value.is_empty() {
                    continue;
                }
                let rendered = humanize(value, field.field_type, None);
                if rendered.is_empty() {
                    continue;
                }
                appendix.push(format!("{} - {}", field.field_label, rendered));
            }
            if !appendix.is_empty() {
                body.push_str(". ");
                body.push_str(&appendix.join(", "));
            }
        }
        pattern.truncate(body)
    }
}

/// Render a value the way a human would read it.
pub fn humanize(value: &RecordValue, field_type: FieldType, formatter: Option<Formatter>) -> String {
    if let Some(f) = formatter {
        return apply_formatter(value, field_type, f);
    }
    match value {
        RecordValue::Null => String::new(),
        RecordValue::Bool(b) => if *b { "Yes" } else { "No" }.to_string(),
        RecordValue::Int(i) => {
            if field_type.is_numeric() {
                group_thousands_int(*i)
            } else {
                i.to_string()
            }
        }
        RecordValue::Float(f) => group_thousands_float(*f, 2),
        RecordValue::Str(s) => match field_type {
            FieldType::Date => long_date(s).unwrap_or_else(|| s.clone()),
            FieldType::Datetime => long_datetime(s).unwrap_or_else(|| s.clone()),
            _ => s.clone(),
        },
        RecordValue::IdName { name, .. } => name.clone(),
        RecordValue::IdList(ids) => format!("{} items", ids.len()),
        RecordValue::Json(map) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}: {s}"),
                other => format!("{k}: {other}"),
            })
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn apply_formatter(value: &RecordValue, field_type: FieldType, formatter: Formatter) -> String {
    match formatter {
        Formatter::Raw => match value {
            RecordValue::Str(s) => s.clone(),
            RecordValue::Int(i) => i.to_string(),
            RecordValue::Float(f) => f.to_string(),
            other => humanize(other, field_type, None),
        },
        Formatter::Upper => humanize(value, field_type, None).to_uppercase(),
        Formatter::Currency => match value {
            RecordValue::Int(i) => group_thousands_float(*i as f64, 2),
            RecordValue::Float(f) => group_thousands_float(*f, 2),
            other => humanize(other, field_type, None),
        },
        Formatter::Date => match value {
            RecordValue::Str(s) => long_date(s)
                .or_else(|| long_datetime(s))
                .unwrap_or_else(|| s.clone()),
            other => humanize(other, field_type, None),
        },
        Formatter::Count => match value {
            RecordValue::IdList(ids) => {
                let shown: Vec<String> = ids.iter().take(3).map(|id| id.to_string()).collect();
                if ids.len() > shown.len() {
                    format!("{} items ({}, …)", ids.len(), shown.join(", "))
                } else {
                    format!("{} items ({})", ids.len(), shown.join(", "))
                }
            }
            other => humanize(other, field_type, None),
        },
    }
}

fn group_thousands_int(n: i64) -> String {
    let negative = n < 0;
    let digits = n.unsigned_abs().to_string();
    let grouped = group_digits(&digits);
    if negative {
        format!("-{grouped}")
    } else {
        grouped
    }
}

fn group_thousands_float(f: f64, decimals: usize) -> String {
    let negative = f < 0.0;
    let formatted = format!("{:.*}", decimals, f.abs());
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), ""));
    let grouped = group_digits(int_part);
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(frac_part);
    }
    out
}

fn group_digits(digits: &str) -> String {
    let bytes = digits.as_bytes();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 && (bytes.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(*b as char);
    }
    out
}

fn long_date(s: &str) -> Option<String> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(date.format("%B %-d, %Y").to_string())
}

fn long_datetime(s: &str) -> Option<String> {
    let dt = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    Some(dt.format("%B %-d, %Y at %H:%M").to_string())
}

fn record_value_to_json(value: &RecordValue) -> Value {
    match value {
        RecordValue::Null => Value::Null,
        RecordValue::Bool(b) => Value::Bool(*b),
        RecordValue::Int(i) => Value::from(*i),
        RecordValue::Float(f) => {
            serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null)
        }
        RecordValue::Str(s) => Value::String(s.clone()),
        RecordValue::IdName { name, .. } => Value::String(name.clone()),
        RecordValue::IdList(ids) => Value::Array(ids.iter().map(|id| Value::from(*id)).collect()),
        RecordValue::Json(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        }
    }
}
