//! Scheduler state: work queue and visited set.
//!
//! The cascade graph over `(model, record_id)` nodes stays implicit.
//! State is (a) a FIFO of work items keyed by model, (b) a visited set
//! for cycle detection, (c) merge-on-enqueue so a model never queues
//! twice. No node objects, no back-pointers.

use ahash::AHashSet;
use std::collections::VecDeque;

use crate::source::Domain;

/// One unit of cascade work: sync some records of one model.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub model_name: String,
    /// Specific record ids; empty means the whole model.
    pub record_ids: Vec<u64>,
    pub depth: usize,
    pub triggered_by_model: Option<String>,
    pub triggered_by_field: Option<String>,
    /// Extra source-domain leaves (date windows on root items).
    pub extra_domain: Domain,
    /// Per-item override of the global `skip_existing` knob; targeted
    /// orphan repair forces `false`.
    pub skip_existing: Option<bool>,
}

impl WorkItem {
    pub fn root(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            record_ids: Vec::new(),
            depth: 0,
            triggered_by_model: None,
            triggered_by_field: None,
            extra_domain: Domain::new(),
            skip_existing: None,
        }
    }

    pub fn cascade(
        model_name: impl Into<String>,
        record_ids: Vec<u64>,
        depth: usize,
        triggered_by_model: impl Into<String>,
        triggered_by_field: impl Into<String>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            record_ids,
            depth,
            triggered_by_model: Some(triggered_by_model.into()),
            triggered_by_field: Some(triggered_by_field.into()),
            extra_domain: Domain::new(),
            skip_existing: None,
        }
    }

    /// A targeted repair item: exactly these ids, never skip existing.
    pub fn targeted(model_name: impl Into<String>, record_ids: Vec<u64>) -> Self {
        Self {
            model_name: model_name.into(),
            record_ids,
            depth: 0,
            triggered_by_model: None,
            triggered_by_field: None,
            extra_domain: Domain::new(),
            skip_existing: Some(false),
        }
    }
}

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Added,
    /// Folded into an existing item for the same model.
    Merged,
}

/// FIFO with merge-on-enqueue.
#[derive(Debug, Default)]
pub struct SyncQueue {
    items: VecDeque<WorkItem>,
    added: u64,
    merged: u64,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue, merging with any queued item for the same model: union
    /// the record-id sets, keep the shallower depth.
    pub fn enqueue(&mut self, item: WorkItem) -> Enqueued {
        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|queued| queued.model_name == item.model_name)
        {
            // An empty id set means "whole model" and swallows any subset.
            if existing.record_ids.is_empty() || item.record_ids.is_empty() {
                existing.record_ids.clear();
            } else {
                existing.record_ids.extend(item.record_ids);
                existing.record_ids.sort_unstable();
                existing.record_ids.dedup();
            }
            existing.depth = existing.depth.min(item.depth);
            if item.skip_existing == Some(false) {
                existing.skip_existing = Some(false);
            }
            self.merged += 1;
            return Enqueued::Merged;
        }
        self.items.push_back(item);
        self.added += 1;
        Enqueued::Added
    }

    pub fn dequeue(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    /// Up to `n` items for parallel execution at the current depth level.
    pub fn dequeue_batch(&mut self, n: usize) -> Vec<WorkItem> {
        let mut batch = Vec::new();
        while batch.len() < n {
            match self.items.pop_front() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.added, self.merged)
    }
}

/// Run-scoped cycle detector over `(model, record_id)`.
#[derive(Debug, Default)]
pub struct VisitedSet {
    seen: AHashSet<(String, u64)>,
    cycles_detected: u64,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// True on first sight (and marks visited); false on re-entry, which
    /// bumps the cycle counter. Cycles never abort a sync.
    pub fn should_process(&mut self, model: &str, record_id: u64) -> bool {
        if self.seen.insert((model.to_string(), record_id)) {
            true
        } else {
            self.cycles_detected += 1;
            false
        }
    }

    /// Partition a batch, marking the returned subset as visited.
    pub fn filter_unvisited(&mut self, model: &str, record_ids: &[u64]) -> Vec<u64> {
        record_ids
            .iter()
            .copied()
            .filter(|id| self.should_process(model, *id))
            .collect()
    }

    pub fn cycles_detected(&self) -> u64 {
        self.cycles_detected
    }

    pub fn visited_count(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_merges_same_model() {
        let mut q = SyncQueue::new();
        assert_eq!(
            q.enqueue(WorkItem::cascade("m_partner", vec![1, 2], 2, "m_parent", "partner_id")),
            Enqueued::Added
        );
        assert_eq!(
            q.enqueue(WorkItem::cascade("m_partner", vec![2, 3], 1, "m_other", "owner_id")),
            Enqueued::Merged
        );
        assert_eq!(q.len(), 1);
        let item = q.dequeue().unwrap();
        assert_eq!(item.record_ids, vec![1, 2, 3]);
        assert_eq!(item.depth, 1); // shallower wins
    }

    #[test]
    fn whole_model_swallows_subsets() {
        let mut q = SyncQueue::new();
        q.enqueue(WorkItem::cascade("m1", vec![1, 2], 1, "m0", "f"));
        q.enqueue(WorkItem::root("m1"));
        let item = q.dequeue().unwrap();
        assert!(item.record_ids.is_empty());
    }

    #[test]
    fn fifo_order_and_batch_dequeue() {
        let mut q = SyncQueue::new();
        q.enqueue(WorkItem::root("a"));
        q.enqueue(WorkItem::root("b"));
        q.enqueue(WorkItem::root("c"));
        let batch = q.dequeue_batch(2);
        assert_eq!(
            batch.iter().map(|i| i.model_name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn targeted_merge_keeps_no_skip() {
        let mut q = SyncQueue::new();
        q.enqueue(WorkItem::cascade("m1", vec![1], 1, "m0", "f"));
        q.enqueue(WorkItem::targeted("m1", vec![2]));
        let item = q.dequeue().unwrap();
        assert_eq!(item.skip_existing, Some(false));
    }

    #[test]
    fn visited_detects_cycles_exactly_once_per_reentry() {
        let mut v = VisitedSet::new();
        assert!(v.should_process("m_partner", 7));
        assert!(v.should_process("m_partner", 8));
        assert!(!v.should_process("m_partner", 7));
        assert_eq!(v.cycles_detected(), 1);
    }

    #[test]
    fn filter_unvisited_partitions_and_marks() {
        let mut v = VisitedSet::new();
        assert_eq!(v.filter_unvisited("m1", &[1, 2, 3]), vec![1, 2, 3]);
        assert_eq!(v.filter_unvisited("m1", &[2, 3, 4]), vec![4]);
        assert_eq!(v.cycles_detected(), 2);
        // Same record id on a different model is a fresh node.
        assert_eq!(v.filter_unvisited("m2", &[1]), vec![1]);
    }
}
