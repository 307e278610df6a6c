//! Predicate compilation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use nexsus_core::error::{NexsusError, Result};
use nexsus_core::point::Payload;
use nexsus_core::schema::{FieldType, SchemaRegistry};
use nexsus_store::filter::{Condition, Filter};
use nexsus_store::unified::UnifiedStore;

use crate::execute::{AggregationPlan, AggregationSpec, PlanStrategy};

/// Operators of the logical predicate language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOp {
    Eq,
    Ne,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Between,
}

impl QueryOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "in" => Some(Self::In),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "contains" => Some(Self::Contains),
            "between" => Some(Self::Between),
            _ => None,
        }
    }
}

/// One condition of the implicitly AND'd filter list. `field` may be
/// dotted (`partner_id.name`): leftmost segment an FK field on the source
/// model, rightmost a scalar on the target model, depth exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCondition {
    pub field: String,
    pub op: QueryOp,
    pub value: Value,
}

/// A logical query over one model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub model: String,
    #[serde(default)]
    pub filters: Vec<QueryCondition>,
    #[serde(default)]
    pub aggregations: Vec<AggregationSpec>,
    #[serde(default)]
    pub group_by: Option<String>,
}

/// Residual predicates evaluated app-side after the native scroll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppFilter {
    /// Case-insensitive substring match (no text index on the field).
    ContainsCi { field: String, needle: String },
    /// Lexicographic range over ISO-8601 date/datetime strings.
    DateRange {
        field: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        from_inclusive: bool,
        to_inclusive: bool,
    },
    /// Negation; the store filter language is conjunctive-positive only.
    Ne { field: String, value: Value },
}

impl AppFilter {
    pub fn matches(&self, payload: &Payload) -> bool {
        match self {
            Self::ContainsCi { field, needle } => payload
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|s| s.to_lowercase().contains(&needle.to_lowercase())),
            Self::DateRange {
                field,
                from,
                to,
                from_inclusive,
                to_inclusive,
            } => {
                let Some(actual) = payload.get(field).and_then(Value::as_str) else {
                    return false;
                };
                if let Some(from) = from {
                    let ok = if *from_inclusive {
                        actual >= from.as_str()
                    } else {
                        actual > from.as_str()
                    };
                    if !ok {
                        return false;
                    }
                }
                if let Some(to) = to {
                    let ok = if *to_inclusive {
                        actual <= to.as_str()
                    } else {
                        actual < to.as_str()
                    };
                    if !ok {
                        return false;
                    }
                }
                true
            }
            Self::Ne { field, value } => payload.get(field) != Some(value),
        }
    }
}

/// Compilation output.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub model: String,
    pub native_filter: Filter,
    pub app_filters: Vec<AppFilter>,
    pub aggregation_plan: Option<AggregationPlan>,
    pub warnings: Vec<String>,
    /// A dotted sub-query matched nothing; the whole query is empty.
    pub trivially_empty: bool,
}

/// Compiles logical predicates into store operations.
pub struct QueryCompiler<'a> {
    registry: &'a SchemaRegistry,
    store: &'a UnifiedStore,
    /// Warn when a dotted sub-query returns more ids than this.
    subquery_warn_limit: usize,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(registry: &'a SchemaRegistry, store: &'a UnifiedStore, subquery_warn_limit: usize) -> Self {
        Self {
            registry,
            store,
            subquery_warn_limit,
        }
    }

    pub async fn compile(&self, request: &QueryRequest) -> Result<CompiledQuery> {
        self.registry.model(&request.model)?;
        let mut native = UnifiedStore::data_filter(&request.model);
        let mut app_filters = Vec::new();
        let mut warnings = Vec::new();
        let mut trivially_empty = false;

        for condition in &request.filters {
            if let Some((fk, scalar)) = split_dotted(&condition.field)? {
                let ids = self
                    .resolve_dotted(&request.model, fk, scalar, condition, &mut warnings)
                    .await?;
                if ids.is_empty() {
                    trivially_empty = true;
                    continue;
                }
                native
                    .must
                    .push(Condition::any(format!("{fk}_id"), ids.into_iter().map(Value::from).collect()));
            } else {
                self.lower_condition(
                    &request.model,
                    condition,
                    &mut native,
                    &mut app_filters,
                    &mut warnings,
                )?;
            }
        }

        let aggregation_plan = if request.aggregations.is_empty() {
            None
        } else {
            Some(self.plan_aggregations(&request.model, request, &mut warnings)?)
        };

        Ok(CompiledQuery {
            model: request.model.clone(),
            native_filter: native,
            app_filters,
            aggregation_plan,
            warnings,
            trivially_empty,
        })
    }

    /// Lower one non-dotted condition into native or app form.
    fn lower_condition(
        &self,
        model: &str,
        condition: &QueryCondition,
        native: &mut Filter,
        app_filters: &mut Vec<AppFilter>,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        let def = self.registry.field_by_name(model, &condition.field)?;
        // A plain equality on a many2one compiles against the scalar
        // companion key when the value is numeric.
        let key = if def.field_type == FieldType::Many2One && condition.value.is_number() {
            format!("{}_id", condition.field)
        } else {
            condition.field.clone()
        };

        match condition.op {
            QueryOp::Eq => native.must.push(Condition::eq(key, condition.value.clone())),
            QueryOp::In => {
                let values = condition
                    .value
                    .as_array()
                    .cloned()
                    .unwrap_or_else(|| vec![condition.value.clone()]);
                native.must.push(Condition::any(key, values));
            }
            QueryOp::Ne => app_filters.push(AppFilter::Ne {
                field: key,
                value: condition.value.clone(),
            }),
            QueryOp::Gt | QueryOp::Gte | QueryOp::Lt | QueryOp::Lte | QueryOp::Between => {
                if def.field_type.is_date() {
                    app_filters.push(date_range_filter(&key, condition));
                } else if def.field_type.is_numeric() {
                    native.must.push(numeric_range_condition(&key, condition)?);
                } else {
                    return Err(NexsusError::Rejected {
                        service: "query".into(),
                        message: format!(
                            "range operator on non-orderable field {model}.{}",
                            condition.field
                        ),
                    });
                }
            }
            QueryOp::Contains => {
                let needle = condition
                    .value
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| condition.value.to_string());
                // Keyword indexes only support exact matches; substring
                // search runs app-side unless a text index exists.
                if !self.registry.is_indexed(&key) {
                    warnings.push(format!("contains on unindexed field {key} will scan"));
                }
                app_filters.push(AppFilter::ContainsCi { field: key, needle });
            }
        }
        Ok(())
    }

    /// Resolve `fk.scalar` by querying the target model for matching
    /// record ids.
    async fn resolve_dotted(
        &self,
        model: &str,
        fk: &str,
        scalar: &str,
        condition: &QueryCondition,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<u64>> {
        let fk_def = self.registry.field_by_name(model, fk)?;
        if !fk_def.field_type.is_relational() {
            return Err(NexsusError::Rejected {
                service: "query".into(),
                message: format!("{model}.{fk} is not a relation, cannot use dotted path"),
            });
        }
        let target_model = fk_def.fk_model.as_deref().ok_or_else(|| {
            NexsusError::Rejected {
                service: "query".into(),
                message: format!("{model}.{fk} has no known target model"),
            }
        })?;

        // Compile the scalar condition against the target model.
        let sub_request = QueryRequest {
            model: target_model.to_string(),
            filters: vec![QueryCondition {
                field: scalar.to_string(),
                op: condition.op,
                value: condition.value.clone(),
            }],
            aggregations: Vec::new(),
            group_by: None,
        };
        let sub = Box::pin(self.compile(&sub_request)).await?;
        if sub.trivially_empty {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        self.store
            .scroll_each(&sub.native_filter, 1000, |points| {
                for point in points {
                    if !sub.app_filters.iter().all(|f| f.matches(&point.payload)) {
                        continue;
                    }
                    if let Some(id) = point.u64_field("record_id") {
                        ids.push(id);
                    }
                }
            })
            .await?;
        ids.sort_unstable();
        ids.dedup();

        if ids.len() > self.subquery_warn_limit {
            warnings.push(format!(
                "dotted filter {fk}.{scalar} expanded to {} ids (limit {})",
                ids.len(),
                self.subquery_warn_limit
            ));
        }
        debug!(model, fk, scalar, matches = ids.len(), "dotted sub-query resolved");
        Ok(ids)
    }

    fn plan_aggregations(
        &self,
        model: &str,
        request: &QueryRequest,
        warnings: &mut Vec<String>,
    ) -> Result<AggregationPlan> {
        for spec in &request.aggregations {
            if !self.registry.is_aggregation_safe(model, &spec.field, spec.op)? {
                return Err(NexsusError::Rejected {
                    service: "query".into(),
                    message: format!(
                        "aggregation {} is not valid over {model}.{}",
                        spec.op.as_str(),
                        spec.field
                    ),
                });
            }
        }
        if let Some(group_by) = &request.group_by {
            self.registry.field_by_name(model, group_by)?;
            if !self.registry.is_indexed(group_by) {
                warnings.push(format!("group-by key {group_by} is not payload-indexed"));
            }
        }
        // The store exposes no grouped aggregation, so both paths land on
        // scroll-and-fold; the plan keeps the choice explicit.
        Ok(AggregationPlan {
            specs: request.aggregations.clone(),
            group_by: request.group_by.clone(),
            strategy: PlanStrategy::ScrollAndFold,
        })
    }
}

/// `a.b` → `(a, b)`; deeper nesting is rejected.
fn split_dotted(field: &str) -> Result<Option<(&str, &str)>> {
    let mut parts = field.split('.');
    let first = parts.next().unwrap_or_default();
    let Some(second) = parts.next() else {
        return Ok(None);
    };
    if parts.next().is_some() {
        return Err(NexsusError::Rejected {
            service: "query".into(),
            message: format!("dotted path {field} exceeds depth one"),
        });
    }
    Ok(Some((first, second)))
}

fn numeric_range_condition(key: &str, condition: &QueryCondition) -> Result<Condition> {
    let bound = |v: &Value| v.as_f64();
    let (gt, gte, lt, lte) = match condition.op {
        QueryOp::Gt => (bound(&condition.value), None, None, None),
        QueryOp::Gte => (None, bound(&condition.value), None, None),
        QueryOp::Lt => (None, None, bound(&condition.value), None),
        QueryOp::Lte => (None, None, None, bound(&condition.value)),
        QueryOp::Between => {
            let bounds = condition.value.as_array().ok_or_else(|| {
                NexsusError::Rejected {
                    service: "query".into(),
                    message: "between expects a two-element array".into(),
                }
            })?;
            if bounds.len() != 2 {
                return Err(NexsusError::Rejected {
                    service: "query".into(),
                    message: "between expects exactly two bounds".into(),
                });
            }
            (None, bound(&bounds[0]), None, bound(&bounds[1]))
        }
        _ => unreachable!("only range ops reach here"),
    };
    Ok(Condition::Range {
        key: key.to_string(),
        gt,
        gte,
        lt,
        lte,
    })
}

fn date_range_filter(key: &str, condition: &QueryCondition) -> AppFilter {
    let as_string = |v: &Value| match v {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()).filter(|s| s != "null"),
    };
    let (from, to, from_inclusive, to_inclusive) = match condition.op {
        QueryOp::Gt => (as_string(&condition.value), None, false, true),
        QueryOp::Gte => (as_string(&condition.value), None, true, true),
        QueryOp::Lt => (None, as_string(&condition.value), true, false),
        QueryOp::Lte => (None, as_string(&condition.value), true, true),
        QueryOp::Between => {
            let bounds = condition.value.as_array().cloned().unwrap_or_default();
            (
                bounds.first().and_then(as_string),
                bounds.get(1).and_then(as_string),
                true,
                true,
            )
        }
        _ => (None, None, true, true),
    };
    if from.is_none() && to.is_none() {
        warn!(field = key, "date range condition carried no usable bounds");
    }
    AppFilter::DateRange {
        field: key.to_string(),
        from,
        to,
        from_inclusive,
        to_inclusive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_dotted_depth() {
        assert_eq!(split_dotted("name").unwrap(), None);
        assert_eq!(split_dotted("partner_id.name").unwrap(), Some(("partner_id", "name")));
        assert!(split_dotted("a.b.c").is_err());
    }

    #[test]
    fn contains_ci_matches() {
        let payload = json!({"name": "Ben Ross"}).as_object().unwrap().clone();
        let f = AppFilter::ContainsCi {
            field: "name".into(),
            needle: "ben".into(),
        };
        assert!(f.matches(&payload));
        let f = AppFilter::ContainsCi {
            field: "name".into(),
            needle: "xyz".into(),
        };
        assert!(!f.matches(&payload));
    }

    #[test]
    fn date_range_lexicographic() {
        let payload = json!({"date_order": "2024-03-05"}).as_object().unwrap().clone();
        let f = AppFilter::DateRange {
            field: "date_order".into(),
            from: Some("2024-01-01".into()),
            to: Some("2024-12-31".into()),
            from_inclusive: true,
            to_inclusive: true,
        };
        assert!(f.matches(&payload));
        let f = AppFilter::DateRange {
            field: "date_order".into(),
            from: Some("2024-03-05".into()),
            to: None,
            from_inclusive: false,
            to_inclusive: true,
        };
        assert!(!f.matches(&payload)); // exclusive bound
    }

    #[test]
    fn ne_filter() {
        let payload = json!({"state": "done"}).as_object().unwrap().clone();
        assert!(!AppFilter::Ne {
            field: "state".into(),
            value: json!("done")
        }
        .matches(&payload));
        assert!(AppFilter::Ne {
            field: "state".into(),
            value: json!("draft")
        }
        .matches(&payload));
    }

    #[test]
    fn between_requires_two_bounds() {
        let bad = QueryCondition {
            field: "amount".into(),
            op: QueryOp::Between,
            value: json!([1]),
        };
        assert!(numeric_range_condition("amount", &bad).is_err());
        let good = QueryCondition {
            field: "amount".into(),
            op: QueryOp::Between,
            value: json!([1, 10]),
        };
        let cond = numeric_range_condition("amount", &good).unwrap();
        match cond {
            Condition::Range { gte, lte, .. } => {
                assert_eq!(gte, Some(1.0));
                assert_eq!(lte, Some(10.0));
            }
            other => panic!("expected range, got {other:?}"),
        }
    }
}
