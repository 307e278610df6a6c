//! The vector-store contract.
//!
//! The concrete store must support fixed-dimension cosine vectors, typed
//! payload indexes, payload-filtered search and scroll, exact filtered
//! counts, retrieval by id, deletion by filter or id, and collection
//! metadata. Everything above this trait is store-agnostic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use nexsus_core::error::Result;
use nexsus_core::point::Point;

use crate::filter::Filter;

/// Payload index types supported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    Keyword,
    Integer,
    Float,
    Bool,
    Text,
    Geo,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Text => "text",
            Self::Geo => "geo",
        }
    }
}

/// One page of a scroll; `next_offset` feeds the next call.
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub points: Vec<Point>,
    pub next_offset: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub point: Point,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub points_count: u64,
    pub vector_size: usize,
    pub indexed_fields: Vec<String>,
    pub status: String,
}

/// Deletion target: explicit ids or a payload filter.
#[derive(Debug, Clone)]
pub enum DeleteSelector {
    Ids(Vec<String>),
    Filter(Filter),
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection and its base configuration if absent.
    /// Idempotent.
    async fn ensure_collection(&self) -> Result<()>;

    /// Insert or overwrite points. Writes wait for durability so
    /// subsequent reads in the same sync run are consistent.
    async fn upsert(&self, points: Vec<Point>) -> Result<()>;

    /// Fetch points by id; unknown ids are silently absent from the
    /// result (the FK existence probe depends on this).
    async fn retrieve(
        &self,
        ids: &[String],
        with_payload: bool,
        with_vector: bool,
    ) -> Result<Vec<Point>>;

    async fn scroll(
        &self,
        filter: Option<&Filter>,
        limit: usize,
        offset: Option<&str>,
    ) -> Result<ScrollPage>;

    async fn search(
        &self,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>>;

    async fn count(&self, filter: Option<&Filter>, exact: bool) -> Result<u64>;

    async fn delete(&self, selector: DeleteSelector) -> Result<()>;

    /// Idempotent: re-creating an existing index is not an error.
    async fn create_payload_index(&self, field: &str, index_type: IndexType) -> Result<()>;

    async fn collection_info(&self) -> Result<CollectionInfo>;
}

/// Scroll an entire filter match, invoking `visit` per page. Returns the
/// number of points visited.
pub async fn scroll_all<S, F>(
    store: &S,
    filter: Option<&Filter>,
    page_size: usize,
    mut visit: F,
) -> Result<u64>
where
    S: VectorStore + ?Sized,
    F: FnMut(&[Point]),
{
    let mut offset: Option<String> = None;
    let mut total = 0u64;
    loop {
        let page = store.scroll(filter, page_size, offset.as_deref()).await?;
        if page.points.is_empty() {
            return Ok(total);
        }
        total += page.points.len() as u64;
        visit(&page.points);
        match page.next_offset {
            Some(next) => offset = Some(next),
            None => return Ok(total),
        }
    }
}
