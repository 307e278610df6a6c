//! The sync pipeline.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                        CASCADE SYNC PIPELINE                       │
//! ├────────────────────────────────────────────────────────────────────┤
//! │                                                                    │
//! │  CLI ──► CascadeScheduler ──► worker pool (parallel_targets)       │
//! │               │                     │                              │
//! │           SyncQueue            per-model step:                     │
//! │           VisitedSet             fetch ► transform ► embed ►       │
//! │               ▲                  upsert ► graph edges              │
//! │               │                     │                              │
//! │               └──── enqueue FK targets (depth+1) ◄──┘              │
//! │                                                                    │
//! │  FK Resolver / Orphan Repair ──► targeted scheduler items          │
//! │  Integrity Validator ──► reports + graph-edge feedback             │
//! │  Knowledge Sync ──► knowledge points (namespace 00000005)          │
//! │                                                                    │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cascade graph over `(model, record_id)` nodes is never
//! materialized: the queue is the only stack, the visited set the only
//! cycle guard.

#[cfg(test)]
pub(crate) mod testing;

pub mod cleanup;
pub mod integrity;
pub mod knowledge;
pub mod odoo;
pub mod queue;
pub mod repair;
pub mod scheduler;
pub mod schema_sync;
pub mod source;
pub mod step;
pub mod watermark;

pub use queue::{SyncQueue, VisitedSet, WorkItem};
pub use repair::{OrphanRepair, RepairReport};
pub use integrity::{IntegrityReport, IntegrityValidator, ModelIntegrityReport};
pub use scheduler::{CascadeScheduler, SyncContext, SyncReport};
pub use source::{RecordSource, SourceField, SourceModel, StaticSource};
