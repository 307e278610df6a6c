//! The unified point model.
//!
//! Every persisted entry is `{id, vector, payload}`; the payload always
//! carries `point_type`, `point_id`, and `sync_timestamp`. Readers may rely
//! on `point_type` alone to route a point to the right interpreter.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::{PointId, PointKind};

/// String-keyed typed payload attached to a point.
pub type Payload = serde_json::Map<String, Value>;

/// One addressable entry in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

impl Point {
    pub fn new(id: PointId, vector: Vec<f32>, payload: Payload) -> Self {
        Self {
            id: id.into_string(),
            vector,
            payload,
        }
    }

    pub fn kind(&self) -> Option<PointKind> {
        self.payload
            .get("point_type")
            .and_then(Value::as_str)
            .and_then(|s| match s {
                "schema" => Some(PointKind::Schema),
                "data" => Some(PointKind::Data),
                "graph" => Some(PointKind::Graph),
                "knowledge" => Some(PointKind::Knowledge),
                _ => None,
            })
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn u64_field(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(Value::as_u64)
    }
}

/// ISO-8601 UTC timestamp used for `sync_timestamp` and watermarks.
pub fn sync_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Stamp the three universal payload keys onto `payload`.
pub fn stamp_common(payload: &mut Payload, kind: PointKind, id: &PointId, now: DateTime<Utc>) {
    payload.insert("point_type".into(), Value::String(kind.as_str().into()));
    payload.insert("point_id".into(), Value::String(id.as_str().into()));
    payload.insert("sync_timestamp".into(), Value::String(sync_timestamp(now)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::data_uuid;

    #[test]
    fn stamped_point_routes_by_type() {
        let id = data_uuid(1, 2).unwrap();
        let mut payload = Payload::new();
        stamp_common(&mut payload, PointKind::Data, &id, Utc::now());
        let point = Point::new(id, vec![0.0; 4], payload);
        assert_eq!(point.kind(), Some(PointKind::Data));
        assert_eq!(point.str_field("point_id"), Some(point.id.as_str()));
        assert!(point.str_field("sync_timestamp").unwrap().ends_with('Z'));
    }
}
