//! Unified store adapter.
//!
//! One physical collection holds every point type, discriminated by
//! `point_type`. This crate provides:
//!
//! - [`filter`]: the store-native payload filter language (the compile
//!   target of the query layer) plus in-process evaluation.
//! - [`store`]: the [`VectorStore`] trait the external vector database
//!   is abstracted behind.
//! - [`qdrant`]: a REST adapter for a Qdrant-compatible server, writes
//!   with `wait=true` so same-run reads are consistent.
//! - [`memory`]: a complete in-process implementation used by tests.
//! - [`graph`]: the graph-edge entity and its commutative merge.
//! - [`unified`]: the typed facade: namespace-aware accessors, payload
//!   index bootstrap, graph-edge accumulation, breaker/retry wrapping.

pub mod filter;
pub mod graph;
pub mod memory;
pub mod qdrant;
pub mod store;
pub mod unified;

pub use filter::{Condition, Filter};
pub use graph::{EdgeIntegrity, GraphEdge, IntegritySnapshot};
pub use memory::MemoryStore;
pub use qdrant::QdrantHttpStore;
pub use store::{CollectionInfo, DeleteSelector, IndexType, ScrollPage, SearchHit, VectorStore};
pub use unified::UnifiedStore;
