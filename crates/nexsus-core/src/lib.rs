//! Nexsus core: identity, schema, and record transformation.
//!
//! Everything Nexsus persists lives in a single vector collection of
//! *points* discriminated by `point_type`. This crate owns the pieces that
//! decide what a point **is**:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         NEXSUS CORE                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  raw ERP record ──► RecordValue map ──► Transformer ──► Point    │
//! │                          ▲                  │                    │
//! │                          │                  ├── narrative text   │
//! │                   SchemaRegistry            └── typed payload    │
//! │                          ▲                       + FK UUIDs      │
//! │                          │                                       │
//! │                   schema points  ◄── identity (deterministic     │
//! │                                        UUID namespaces)          │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`identity`]: deterministic UUID derivation per point namespace,
//!   with parsers and a classifier. Pure, no I/O, stable across processes.
//! - [`value`]: the tagged value model for heterogeneous ERP records
//!   (`[id, name]` tuples, `false`-as-empty, numeric strings).
//! - [`schema`]: model/field metadata and the cached registry the rest
//!   of the pipeline resolves models through.
//! - [`transform`]: record → (narrative, payload) conversion, including
//!   the `<field>_qdrant` cross-reference contract that makes FK-graph
//!   traversal possible.
//! - [`pattern`]: optional per-model narrative templates.
//! - [`config`]: environment-first runtime configuration.
//! - [`error`]: the shared error taxonomy.

pub mod config;
pub mod error;
pub mod identity;
pub mod pattern;
pub mod point;
pub mod schema;
pub mod transform;
pub mod value;

pub use config::NexsusConfig;
pub use error::{NexsusError, Result};
pub use identity::{PointId, PointKind};
pub use point::{Payload, Point};
pub use schema::{FieldDef, FieldType, ModelSchema, SchemaRegistry};
pub use transform::{RecordTransformer, TransformedRecord};
pub use value::RecordValue;
