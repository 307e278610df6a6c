//! Store-native payload filters.
//!
//! A conjunction of conditions over payload keys. This is what the query
//! compiler lowers predicates into, what the Qdrant adapter serializes to
//! the wire, and what the memory store evaluates in-process.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use nexsus_core::point::Payload;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Exact match on a keyword/integer/bool payload value.
    Match { key: String, value: Value },
    /// Match any of the listed values (`IN`).
    MatchAny { key: String, values: Vec<Value> },
    /// Numeric range; unset bounds are open.
    Range {
        key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        gt: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        gte: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lt: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lte: Option<f64>,
    },
    /// Key absent or null.
    IsNull { key: String },
}

impl Condition {
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Match {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn any(key: impl Into<String>, values: Vec<Value>) -> Self {
        Self::MatchAny {
            key: key.into(),
            values,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Match { key, .. }
            | Self::MatchAny { key, .. }
            | Self::Range { key, .. }
            | Self::IsNull { key } => key,
        }
    }

    /// Evaluate against one payload. Array payload values match when any
    /// element matches (Qdrant semantics).
    pub fn matches(&self, payload: &Payload) -> bool {
        match self {
            Self::Match { key, value } => match payload.get(key) {
                Some(Value::Array(items)) => items.iter().any(|i| values_equal(i, value)),
                Some(actual) => values_equal(actual, value),
                None => false,
            },
            Self::MatchAny { key, values } => match payload.get(key) {
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|i| values.iter().any(|v| values_equal(i, v))),
                Some(actual) => values.iter().any(|v| values_equal(actual, v)),
                None => false,
            },
            Self::Range { key, gt, gte, lt, lte } => {
                let Some(n) = payload.get(key).and_then(Value::as_f64) else {
                    return false;
                };
                if let Some(b) = gt {
                    if n <= *b {
                        return false;
                    }
                }
                if let Some(b) = gte {
                    if n < *b {
                        return false;
                    }
                }
                if let Some(b) = lt {
                    if n >= *b {
                        return false;
                    }
                }
                if let Some(b) = lte {
                    if n > *b {
                        return false;
                    }
                }
                true
            }
            Self::IsNull { key } => matches!(payload.get(key), None | Some(Value::Null)),
        }
    }

    /// Qdrant wire form.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Match { key, value } => serde_json::json!({
                "key": key, "match": {"value": value}
            }),
            Self::MatchAny { key, values } => serde_json::json!({
                "key": key, "match": {"any": values}
            }),
            Self::Range { key, gt, gte, lt, lte } => {
                let mut range = serde_json::Map::new();
                if let Some(v) = gt {
                    range.insert("gt".into(), Value::from(*v));
                }
                if let Some(v) = gte {
                    range.insert("gte".into(), Value::from(*v));
                }
                if let Some(v) = lt {
                    range.insert("lt".into(), Value::from(*v));
                }
                if let Some(v) = lte {
                    range.insert("lte".into(), Value::from(*v));
                }
                serde_json::json!({"key": key, "range": range})
            }
            Self::IsNull { key } => serde_json::json!({"is_null": {"key": key}}),
        }
    }
}

/// Integer/float unification: `7 == 7.0`. Everything else is strict.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// An implicitly AND'd condition list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub must: Vec<Condition>,
}

impl Filter {
    pub fn new(must: Vec<Condition>) -> Self {
        Self { must }
    }

    pub fn with(mut self, condition: Condition) -> Self {
        self.must.push(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        self.must.iter().all(|c| c.matches(payload))
    }

    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "must": self.must.iter().map(Condition::to_wire).collect::<Vec<_>>()
        })
    }
}
