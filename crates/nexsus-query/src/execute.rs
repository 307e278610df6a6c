//! Query execution: native scroll + app-side residue + aggregation fold.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use nexsus_core::error::Result;
use nexsus_core::point::Payload;
use nexsus_core::schema::AggregateOp;
use nexsus_store::unified::UnifiedStore;

use crate::compile::CompiledQuery;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub field: String,
    pub op: AggregateOp,
}

/// How the plan executes. The store exposes no grouped aggregation, so
/// the fold path is the only live strategy today; keeping it explicit
/// lets a native path slot in without changing callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    NativeGroup,
    ScrollAndFold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationPlan {
    pub specs: Vec<AggregationSpec>,
    pub group_by: Option<String>,
    pub strategy: PlanStrategy,
}

/// One group of the aggregation result; `key` is `None` for the
/// ungrouped total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationGroup {
    pub key: Option<Value>,
    pub count: u64,
    /// `"<op>_<field>"` → folded value.
    pub values: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregationResult {
    pub groups: Vec<AggregationGroup>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub records: Vec<Payload>,
    pub aggregations: Option<AggregationResult>,
    pub warnings: Vec<String>,
}

/// Streaming fold state for one (group, spec) cell.
#[derive(Debug, Clone, Default)]
struct FoldCell {
    count: u64,
    sum: f64,
    min_num: Option<f64>,
    max_num: Option<f64>,
    min_str: Option<String>,
    max_str: Option<String>,
}

impl FoldCell {
    fn observe(&mut self, value: &Value) {
        self.count += 1;
        if let Some(n) = value.as_f64() {
            self.sum += n;
            self.min_num = Some(self.min_num.map_or(n, |m| m.min(n)));
            self.max_num = Some(self.max_num.map_or(n, |m| m.max(n)));
        } else if let Some(s) = value.as_str() {
            // Dates are ISO strings; lexicographic min/max is correct.
            match &self.min_str {
                Some(m) if m.as_str() <= s => {}
                _ => self.min_str = Some(s.to_string()),
            }
            match &self.max_str {
                Some(m) if m.as_str() >= s => {}
                _ => self.max_str = Some(s.to_string()),
            }
        }
    }

    fn finish(&self, op: AggregateOp) -> Value {
        match op {
            AggregateOp::Count => Value::from(self.count),
            AggregateOp::Sum => Value::from(self.sum),
            AggregateOp::Avg => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::from(self.sum / self.count as f64)
                }
            }
            AggregateOp::Min => self
                .min_num
                .map(Value::from)
                .or_else(|| self.min_str.clone().map(Value::String))
                .unwrap_or(Value::Null),
            AggregateOp::Max => self
                .max_num
                .map(Value::from)
                .or_else(|| self.max_str.clone().map(Value::String))
                .unwrap_or(Value::Null),
        }
    }
}

pub struct QueryExecutor<'a> {
    store: &'a UnifiedStore,
    scan_batch_size: usize,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(store: &'a UnifiedStore, scan_batch_size: usize) -> Self {
        Self {
            store,
            scan_batch_size,
        }
    }

    /// Run a compiled query. `limit` bounds returned records; the
    /// aggregation fold always sees the full match set.
    pub async fn execute(&self, compiled: &CompiledQuery, limit: usize) -> Result<QueryResult> {
        if compiled.trivially_empty {
            return Ok(QueryResult {
                warnings: compiled.warnings.clone(),
                aggregations: compiled.aggregation_plan.as_ref().map(|_| AggregationResult::default()),
                ..Default::default()
            });
        }

        let mut records: Vec<Payload> = Vec::new();
        let mut folds: BTreeMap<Option<String>, (Option<Value>, Vec<FoldCell>)> = BTreeMap::new();
        let plan = compiled.aggregation_plan.clone();

        self.store
            .scroll_each(&compiled.native_filter, self.scan_batch_size, |points| {
                for point in points {
                    if !compiled.app_filters.iter().all(|f| f.matches(&point.payload)) {
                        continue;
                    }
                    if records.len() < limit {
                        records.push(point.payload.clone());
                    }
                    if let Some(plan) = &plan {
                        let group_value = plan
                            .group_by
                            .as_ref()
                            .and_then(|key| point.payload.get(key).cloned());
                        let group_key = group_value.as_ref().map(|v| v.to_string());
                        let entry = folds.entry(group_key).or_insert_with(|| {
                            (group_value.clone(), vec![FoldCell::default(); plan.specs.len()])
                        });
                        for (cell, spec) in entry.1.iter_mut().zip(&plan.specs) {
                            if let Some(value) = point.payload.get(&spec.field) {
                                cell.observe(value);
                            }
                        }
                    }
                }
            })
            .await?;

        let aggregations = plan.map(|plan| AggregationResult {
            groups: folds
                .into_values()
                .map(|(key, cells)| AggregationGroup {
                    key,
                    count: cells.first().map(|c| c.count).unwrap_or(0),
                    values: cells
                        .iter()
                        .zip(&plan.specs)
                        .map(|(cell, spec)| {
                            (
                                format!("{}_{}", spec.op.as_str(), spec.field),
                                cell.finish(spec.op),
                            )
                        })
                        .collect(),
                })
                .collect(),
        });

        Ok(QueryResult {
            records,
            aggregations,
            warnings: compiled.warnings.clone(),
        })
    }
}
