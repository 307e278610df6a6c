//! Tagged value model for heterogeneous ERP records.
//!
//! Source records arrive as JSON maps with ERP-specific conventions:
//! `[id, name]` tuples for many2one, `false` as the empty sentinel for
//! relational fields, numeric strings from spreadsheet exports. The
//! transformer branches on the schema's field type and the value's
//! variant, so the decode here is deliberately lenient.
//!
//! Zero is a valid number. `false` is empty only for relational and text
//! fields; for booleans it is a value.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::schema::FieldType;

/// A decoded record value.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// many2one `[id, "display name"]`
    IdName { id: i64, name: String },
    /// one2many / many2many id arrays
    IdList(Vec<i64>),
    Json(BTreeMap<String, Value>),
}

impl RecordValue {
    /// Decode a raw JSON value in the context of an ERP field type.
    pub fn decode(raw: &Value, field_type: FieldType) -> RecordValue {
        match raw {
            Value::Null => RecordValue::Null,
            Value::Bool(b) => {
                // Odoo renders empty relational/text fields as `false`.
                if !*b && field_type != FieldType::Boolean {
                    RecordValue::Null
                } else {
                    RecordValue::Bool(*b)
                }
            }
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    RecordValue::Int(i)
                } else {
                    RecordValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return RecordValue::Null;
                }
                // Spreadsheet exports deliver numbers as strings.
                if field_type.is_numeric() || field_type == FieldType::Many2One {
                    if let Ok(i) = trimmed.parse::<i64>() {
                        return RecordValue::Int(i);
                    }
                    if let Ok(f) = trimmed.parse::<f64>() {
                        return RecordValue::Float(f);
                    }
                }
                RecordValue::Str(trimmed.to_string())
            }
            Value::Array(items) => Self::decode_array(items, field_type),
            Value::Object(map) => {
                RecordValue::Json(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
        }
    }

    fn decode_array(items: &[Value], field_type: FieldType) -> RecordValue {
        if items.is_empty() {
            return RecordValue::Null;
        }
        // Two-element [id, name] tuple for many2one.
        if items.len() == 2 {
            if let (Some(id), Some(name)) = (items[0].as_i64(), items[1].as_str()) {
                if field_type == FieldType::Many2One || field_type == FieldType::Reference {
                    return RecordValue::IdName {
                        id,
                        name: name.to_string(),
                    };
                }
            }
        }
        let ids: Vec<i64> = items.iter().filter_map(Value::as_i64).collect();
        if ids.len() == items.len() {
            return RecordValue::IdList(ids);
        }
        // Mixed array: keep a string rendering rather than dropping data.
        RecordValue::Str(
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
        )
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RecordValue::Null => true,
            RecordValue::Str(s) => s.trim().is_empty(),
            RecordValue::IdList(ids) => ids.is_empty(),
            RecordValue::Json(map) => map.is_empty(),
            // Bool(false) and zero-valued numbers are values, not gaps.
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RecordValue::Int(i) => Some(*i),
            RecordValue::IdName { id, .. } => Some(*id),
            RecordValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match self {
            RecordValue::IdName { name, .. } => Some(name),
            RecordValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A decoded record: ERP field name → tagged value.
pub type Record = BTreeMap<String, RecordValue>;

/// Decode a raw JSON record using the model's field types.
///
/// Unknown keys decode as `Text` so legacy expanded columns (`x_id`,
/// `x_name`) survive for the FK extraction pass.
pub fn decode_record(
    raw: &serde_json::Map<String, Value>,
    field_type_of: impl Fn(&str) -> Option<FieldType>,
) -> Record {
    raw.iter()
        .map(|(key, value)| {
            let ftype = field_type_of(key).unwrap_or(FieldType::Text);
            (key.clone(), RecordValue::decode(value, ftype))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn false_is_empty_for_relational_but_not_boolean() {
        assert_eq!(
            RecordValue::decode(&json!(false), FieldType::Many2One),
            RecordValue::Null
        );
        assert_eq!(
            RecordValue::decode(&json!(false), FieldType::Boolean),
            RecordValue::Bool(false)
        );
    }

    #[test]
    fn zero_is_a_value() {
        let v = RecordValue::decode(&json!(0), FieldType::Integer);
        assert_eq!(v, RecordValue::Int(0));
        assert!(!v.is_empty());
    }

    #[test]
    fn id_name_tuple_decodes_for_many2one() {
        let v = RecordValue::decode(&json!([7, "Partner"]), FieldType::Many2One);
        assert_eq!(
            v,
            RecordValue::IdName {
                id: 7,
                name: "Partner".into()
            }
        );
        assert_eq!(v.as_i64(), Some(7));
        assert_eq!(v.display_name(), Some("Partner"));
    }

    #[test]
    fn id_arrays_decode_for_x2many() {
        let v = RecordValue::decode(&json!([1, 2, 3]), FieldType::Many2Many);
        assert_eq!(v, RecordValue::IdList(vec![1, 2, 3]));
        assert!(RecordValue::decode(&json!([]), FieldType::One2Many).is_empty());
    }

    #[test]
    fn numeric_strings_parse_for_numeric_fields() {
        assert_eq!(
            RecordValue::decode(&json!("42"), FieldType::Integer),
            RecordValue::Int(42)
        );
        assert_eq!(
            RecordValue::decode(&json!(" 19.5 "), FieldType::Float),
            RecordValue::Float(19.5)
        );
        // Plain text fields keep the string.
        assert_eq!(
            RecordValue::decode(&json!("42"), FieldType::Text),
            RecordValue::Str("42".into())
        );
    }

    #[test]
    fn strings_are_trimmed_and_blank_is_empty() {
        assert_eq!(
            RecordValue::decode(&json!("  hi  "), FieldType::Char),
            RecordValue::Str("hi".into())
        );
        assert!(RecordValue::decode(&json!("   "), FieldType::Char).is_empty());
    }

    #[test]
    fn json_objects_keep_their_keys() {
        let v = RecordValue::decode(&json!({"a": 1, "b": "x"}), FieldType::Json);
        match v {
            RecordValue::Json(map) => {
                assert_eq!(map.len(), 2);
                assert_eq!(map["a"], json!(1));
            }
            other => panic!("expected Json, got {other:?}"),
        }
    }
}
