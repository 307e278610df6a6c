//! In-process vector store.
//!
//! A complete [`VectorStore`] used by unit and integration tests: real
//! filter evaluation, cosine scoring, id-ordered scroll with offset
//! cursors. Zero vectors are excluded from similarity recall, matching
//! how the production store treats the gateway's poison value.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

use nexsus_core::error::Result;
use nexsus_core::point::Point;

use crate::filter::Filter;
use crate::store::{
    CollectionInfo, DeleteSelector, IndexType, ScrollPage, SearchHit, VectorStore,
};

#[derive(Default)]
struct MemoryInner {
    points: BTreeMap<String, Point>,
    indexed_fields: BTreeSet<String>,
    upserts: u64,
    deletes: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    vector_size: usize,
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new(vector_size: usize) -> Self {
        Self {
            vector_size,
            inner: RwLock::new(MemoryInner::default()),
        }
    }

    /// Total upsert calls' point count; lets tests assert idempotence
    /// (e.g. a second repair run performing zero writes).
    pub fn upsert_count(&self) -> u64 {
        self.inner.read().upserts
    }

    pub fn delete_count(&self) -> u64 {
        self.inner.read().deletes
    }

    pub fn len(&self) -> usize {
        self.inner.read().points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<Point> {
        self.inner.read().points.get(id).cloned()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, points: Vec<Point>) -> Result<()> {
        let mut inner = self.inner.write();
        inner.upserts += points.len() as u64;
        for point in points {
            inner.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn retrieve(
        &self,
        ids: &[String],
        with_payload: bool,
        with_vector: bool,
    ) -> Result<Vec<Point>> {
        let inner = self.inner.read();
        Ok(ids
            .iter()
            .filter_map(|id| inner.points.get(id))
            .map(|p| Point {
                id: p.id.clone(),
                vector: if with_vector { p.vector.clone() } else { Vec::new() },
                payload: if with_payload {
                    p.payload.clone()
                } else {
                    Default::default()
                },
            })
            .collect())
    }

    async fn scroll(
        &self,
        filter: Option<&Filter>,
        limit: usize,
        offset: Option<&str>,
    ) -> Result<ScrollPage> {
        let inner = self.inner.read();
        let mut matched = inner
            .points
            .values()
            .filter(|p| filter.map_or(true, |f| f.matches(&p.payload)))
            .skip_while(|p| offset.is_some_and(|o| p.id.as_str() < o))
            .peekable();

        let mut points = Vec::new();
        while points.len() < limit {
            match matched.next() {
                Some(p) => points.push(p.clone()),
                None => break,
            }
        }
        let next_offset = matched.peek().map(|p| p.id.clone());
        Ok(ScrollPage { points, next_offset })
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let inner = self.inner.read();
        let mut hits: Vec<SearchHit> = inner
            .points
            .values()
            .filter(|p| filter.map_or(true, |f| f.matches(&p.payload)))
            .filter(|p| p.vector.iter().any(|v| *v != 0.0))
            .map(|p| SearchHit {
                score: cosine(vector, &p.vector),
                point: p.clone(),
            })
            .filter(|h| score_threshold.map_or(true, |t| h.score >= t))
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self, filter: Option<&Filter>, _exact: bool) -> Result<u64> {
        let inner = self.inner.read();
        Ok(inner
            .points
            .values()
            .filter(|p| filter.map_or(true, |f| f.matches(&p.payload)))
            .count() as u64)
    }

    async fn delete(&self, selector: DeleteSelector) -> Result<()> {
        let mut inner = self.inner.write();
        let before = inner.points.len();
        match selector {
            DeleteSelector::Ids(ids) => {
                for id in ids {
                    inner.points.remove(&id);
                }
            }
            DeleteSelector::Filter(filter) => {
                inner.points.retain(|_, p| !filter.matches(&p.payload));
            }
        }
        inner.deletes += (before - inner.points.len()) as u64;
        Ok(())
    }

    async fn create_payload_index(&self, field: &str, _index_type: IndexType) -> Result<()> {
        self.inner.write().indexed_fields.insert(field.to_string());
        Ok(())
    }

    async fn collection_info(&self) -> Result<CollectionInfo> {
        let inner = self.inner.read();
        Ok(CollectionInfo {
            points_count: inner.points.len() as u64,
            vector_size: self.vector_size,
            indexed_fields: inner.indexed_fields.iter().cloned().collect(),
            status: "green".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Condition;
    use serde_json::json;

    fn point(id: &str, vector: Vec<f32>, payload: serde_json::Value) -> Point {
        Point {
            id: id.into(),
            vector,
            payload: payload.as_object().unwrap().clone(),
        }
    }

    #[tokio::test]
    async fn upsert_retrieve_and_missing_ids() {
        let store = MemoryStore::new(2);
        store
            .upsert(vec![point("a", vec![1.0, 0.0], json!({"k": 1}))])
            .await
            .unwrap();
        let got = store
            .retrieve(&["a".into(), "missing".into()], true, false)
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert!(got[0].vector.is_empty());
        assert_eq!(got[0].payload["k"], json!(1));
    }

    #[tokio::test]
    async fn scroll_pages_through_with_cursor() {
        let store = MemoryStore::new(2);
        for i in 0..5 {
            store
                .upsert(vec![point(&format!("id-{i}"), vec![1.0, 0.0], json!({"n": i}))])
                .await
                .unwrap();
        }
        let first = store.scroll(None, 2, None).await.unwrap();
        assert_eq!(first.points.len(), 2);
        let second = store
            .scroll(None, 2, first.next_offset.as_deref())
            .await
            .unwrap();
        assert_eq!(second.points.len(), 2);
        let third = store
            .scroll(None, 2, second.next_offset.as_deref())
            .await
            .unwrap();
        assert_eq!(third.points.len(), 1);
        assert!(third.next_offset.is_none());

        let all: Vec<String> = [first.points, second.points, third.points]
            .concat()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(all, vec!["id-0", "id-1", "id-2", "id-3", "id-4"]);
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_and_skips_zero_vectors() {
        let store = MemoryStore::new(2);
        store
            .upsert(vec![
                point("close", vec![1.0, 0.1], json!({"t": "d"})),
                point("far", vec![0.0, 1.0], json!({"t": "d"})),
                point("poison", vec![0.0, 0.0], json!({"t": "d"})),
            ])
            .await
            .unwrap();
        let hits = store.search(&[1.0, 0.0], None, 10, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.point.id.as_str()).collect();
        assert_eq!(ids, vec!["close", "far"]);
    }

    #[tokio::test]
    async fn filtered_count_and_delete() {
        let store = MemoryStore::new(2);
        store
            .upsert(vec![
                point("a", vec![1.0, 0.0], json!({"model_name": "m1"})),
                point("b", vec![1.0, 0.0], json!({"model_name": "m2"})),
            ])
            .await
            .unwrap();
        let f = Filter::default().with(Condition::eq("model_name", "m1"));
        assert_eq!(store.count(Some(&f), true).await.unwrap(), 1);
        store.delete(DeleteSelector::Filter(f.clone())).await.unwrap();
        assert_eq!(store.count(Some(&f), true).await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }
}
