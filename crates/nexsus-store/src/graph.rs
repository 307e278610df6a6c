//! Graph-edge points.
//!
//! One edge point summarizes one FK relationship `(source_model,
//! field_name, target_model)`. Successive upserts accumulate rather than
//! overwrite: counts sum, unique-target highs persist, cascade sources
//! union. Every accumulation commutes, so edge writes tolerate the
//! scheduler's cross-model reordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use nexsus_core::error::{NexsusError, Result};
use nexsus_core::identity::{graph_uuid, PointId, PointKind};
use nexsus_core::point::{stamp_common, Payload, Point};
use nexsus_core::schema::FieldType;

/// Bound on the per-edge validation history ring.
pub const MAX_INTEGRITY_HISTORY: usize = 8;

/// Latest validation result written back onto an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeIntegrity {
    pub last_validated: DateTime<Utc>,
    pub last_validated_orphans: u64,
    /// `1 - missing/total`; 1.0 when every reference resolves.
    pub integrity_score: f64,
}

/// One entry of the bounded validation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegritySnapshot {
    pub validated_at: DateTime<Utc>,
    pub orphans: u64,
    pub total_references: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source_model: String,
    pub source_model_id: u32,
    pub target_model: String,
    pub target_model_id: u32,
    pub field_name: String,
    pub field_label: String,
    pub field_type: FieldType,
    pub field_id: u64,
    /// Target model has no outgoing FKs of its own.
    pub is_leaf: bool,
    pub edge_count: u64,
    pub unique_targets: u64,
    pub cascade_sources: BTreeSet<String>,
    pub last_cascade: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<EdgeIntegrity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<IntegritySnapshot>,
}

impl GraphEdge {
    pub fn point_id(&self) -> Result<PointId> {
        let rel = self
            .field_type
            .relationship_code()
            .ok_or_else(|| {
                NexsusError::Integrity(format!(
                    "field {} of type {} has no relationship code",
                    self.field_name, self.field_type
                ))
            })?;
        Ok(graph_uuid(
            self.source_model_id,
            self.target_model_id,
            rel,
            self.field_id,
        )?)
    }

    /// Fold `other` into `self`: sum `edge_count`, max `unique_targets`,
    /// union `cascade_sources`, keep the newest cascade timestamp and
    /// integrity annotations.
    pub fn accumulate(&mut self, other: &GraphEdge) {
        self.edge_count += other.edge_count;
        self.unique_targets = self.unique_targets.max(other.unique_targets);
        self.cascade_sources
            .extend(other.cascade_sources.iter().cloned());
        if other.last_cascade > self.last_cascade {
            self.last_cascade = other.last_cascade;
        }
        self.is_leaf = other.is_leaf;
        if let Some(incoming) = &other.integrity {
            match &self.integrity {
                Some(current) if current.last_validated >= incoming.last_validated => {}
                _ => self.integrity = Some(incoming.clone()),
            }
        }
        self.history.extend(other.history.iter().cloned());
        if self.history.len() > MAX_INTEGRITY_HISTORY {
            let excess = self.history.len() - MAX_INTEGRITY_HISTORY;
            self.history.drain(..excess);
        }
    }

    /// Record a validation pass onto the edge.
    pub fn record_validation(
        &mut self,
        validated_at: DateTime<Utc>,
        orphans: u64,
        total_references: u64,
        track_history: bool,
    ) {
        let score = if total_references == 0 {
            1.0
        } else {
            1.0 - orphans as f64 / total_references as f64
        };
        self.integrity = Some(EdgeIntegrity {
            last_validated: validated_at,
            last_validated_orphans: orphans,
            integrity_score: score,
        });
        if track_history {
            self.history.push(IntegritySnapshot {
                validated_at,
                orphans,
                total_references,
            });
            if self.history.len() > MAX_INTEGRITY_HISTORY {
                let excess = self.history.len() - MAX_INTEGRITY_HISTORY;
                self.history.drain(..excess);
            }
        }
    }

    pub fn to_point(&self, now: DateTime<Utc>) -> Result<Point> {
        let id = self.point_id()?;
        let mut payload = Payload::new();
        payload.insert("source_model".into(), Value::String(self.source_model.clone()));
        payload.insert("source_model_id".into(), Value::from(self.source_model_id));
        payload.insert("target_model".into(), Value::String(self.target_model.clone()));
        payload.insert("target_model_id".into(), Value::from(self.target_model_id));
        payload.insert("field_name".into(), Value::String(self.field_name.clone()));
        payload.insert("field_label".into(), Value::String(self.field_label.clone()));
        payload.insert(
            "field_type".into(),
            Value::String(self.field_type.as_str().into()),
        );
        payload.insert("field_id".into(), Value::from(self.field_id));
        payload.insert("is_leaf".into(), Value::Bool(self.is_leaf));
        payload.insert("edge_count".into(), Value::from(self.edge_count));
        payload.insert("unique_targets".into(), Value::from(self.unique_targets));
        payload.insert(
            "cascade_sources".into(),
            Value::Array(
                self.cascade_sources
                    .iter()
                    .map(|s| Value::String(s.clone()))
                    .collect(),
            ),
        );
        payload.insert(
            "last_cascade".into(),
            Value::String(self.last_cascade.to_rfc3339()),
        );
        if let Some(integrity) = &self.integrity {
            payload.insert(
                "last_validated".into(),
                Value::String(integrity.last_validated.to_rfc3339()),
            );
            payload.insert(
                "last_validated_orphans".into(),
                Value::from(integrity.last_validated_orphans),
            );
            payload.insert(
                "integrity_score".into(),
                Value::from(integrity.integrity_score),
            );
        }
        if !self.history.is_empty() {
            payload.insert("integrity_history".into(), serde_json::to_value(&self.history)?);
        }
        stamp_common(&mut payload, PointKind::Graph, &id, now);
        // Edges are reached by filters, never by similarity.
        Ok(Point::new(id, Vec::new(), payload))
    }

    pub fn from_point(point: &Point) -> Option<GraphEdge> {
        let payload = &point.payload;
        Some(GraphEdge {
            source_model: payload.get("source_model")?.as_str()?.to_string(),
            source_model_id: payload.get("source_model_id")?.as_u64()? as u32,
            target_model: payload.get("target_model")?.as_str()?.to_string(),
            target_model_id: payload.get("target_model_id")?.as_u64()? as u32,
            field_name: payload.get("field_name")?.as_str()?.to_string(),
            field_label: payload
                .get("field_label")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            field_type: FieldType::parse(payload.get("field_type")?.as_str()?)?,
            field_id: payload.get("field_id")?.as_u64()?,
            is_leaf: payload.get("is_leaf").and_then(Value::as_bool).unwrap_or(false),
            edge_count: payload.get("edge_count").and_then(Value::as_u64).unwrap_or(0),
            unique_targets: payload
                .get("unique_targets")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            cascade_sources: payload
                .get("cascade_sources")
                .and_then(Value::as_array)
                .map(|vs| {
                    vs.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            last_cascade: payload
                .get("last_cascade")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
            integrity: parse_integrity(payload),
            history: payload
                .get("integrity_history")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
        })
    }
}

fn parse_integrity(payload: &Payload) -> Option<EdgeIntegrity> {
    Some(EdgeIntegrity {
        last_validated: payload
            .get("last_validated")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))?,
        last_validated_orphans: payload.get("last_validated_orphans")?.as_u64()?,
        integrity_score: payload.get("integrity_score")?.as_f64()?,
    })
}
