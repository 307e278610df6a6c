//! Query compilation and execution.
//!
//! Translates the logical predicate language (dotted-path conditions,
//! `eq|ne|in|gt|gte|lt|lte|contains|between`, aggregations) into:
//!
//! - a store-native [`nexsus_store::Filter`] for index-compatible
//!   conditions,
//! - residual app-level predicates (date ranges over ISO strings,
//!   case-insensitive `contains`, negations),
//! - an aggregation plan validated against the schema registry.
//!
//! Dotted conditions (`partner_id.name`) resolve through a sub-query
//! against the FK target model, substituting `<fk>_id IN (…)` in the
//! parent filter. An empty sub-query result short-circuits the whole
//! query to empty.

pub mod compile;
pub mod execute;

pub use compile::{
    AppFilter, CompiledQuery, QueryCompiler, QueryCondition, QueryOp, QueryRequest,
};
pub use execute::{AggregationGroup, AggregationResult, QueryExecutor, QueryResult};
