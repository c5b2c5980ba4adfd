//! ObjectiveQueue: bounded priority FIFO with deduplication (spec.md §4.1).

use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::objective::{Objective, ObjectiveId, Origin};

/// Entry ordered for the max-heap: higher priority first, then earlier
/// enqueue time first (spec.md: "(priority desc, enqueue_time asc)").
struct Entry {
    objective: Objective,
    seq: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.objective.priority == other.objective.priority && self.seq == other.seq
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; we want higher priority and lower seq to
        // sort "greater" so they pop first.
        self.objective
            .priority
            .cmp(&other.objective.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    heap: BinaryHeap<Entry>,
    /// text -> id, for dedup of non-corrective pending objectives.
    pending_texts: HashMap<String, ObjectiveId>,
    next_seq: u64,
    capacity: usize,
    shutting_down: bool,
}

/// Bounded priority FIFO of pending objectives with deduplication.
pub struct ObjectiveQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl ObjectiveQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                pending_texts: HashMap::new(),
                next_seq: 0,
                capacity,
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueues an objective, returning its id. Fails with `QueueFull` if at
    /// capacity. If an identical `text` is already pending and this
    /// objective's origin is not `Corrective`, the existing id is returned
    /// instead and the new objective is dropped (spec.md §4.1).
    pub fn enqueue(&self, objective: Objective) -> Result<ObjectiveId, CoreError> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");

        if objective.origin != Origin::Corrective {
            if let Some(existing) = inner.pending_texts.get(&objective.text) {
                debug!(target: "hephaestus::queue", text = %objective.text, "deduplicated enqueue");
                return Ok(*existing);
            }
        }

        if inner.heap.len() >= inner.capacity {
            warn!(target: "hephaestus::queue", capacity = inner.capacity, "queue full");
            return Err(CoreError::QueueFull);
        }

        let id = objective.id;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        if objective.origin != Origin::Corrective {
            inner.pending_texts.insert(objective.text.clone(), id);
        }
        inner.heap.push(Entry { objective, seq });
        drop(inner);
        self.notify.notify_one();
        Ok(id)
    }

    /// Blocks up to `timeout` for an objective to become available, or
    /// returns `None` on timeout or after `shutdown()` is called.
    pub async fn dequeue(&self, timeout: Duration) -> Option<Objective> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(objective) = self.try_dequeue() {
                return Some(objective);
            }
            if self.inner.lock().expect("queue lock poisoned").shutting_down {
                return None;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(remaining) => return self.try_dequeue(),
            }
        }
    }

    fn try_dequeue(&self) -> Option<Objective> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let entry = inner.heap.pop()?;
        inner.pending_texts.remove(&entry.objective.text);
        Some(entry.objective)
    }

    /// Snapshot of all pending objectives, for diagnostics (`queue_snapshot`, spec.md §6).
    pub fn peek_all(&self) -> Vec<Objective> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        let mut snapshot: Vec<&Entry> = inner.heap.iter().collect();
        snapshot.sort_by(|a, b| b.cmp(a));
        snapshot.into_iter().map(|e| e.objective.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wakes every blocked `dequeue` call so the worker task can observe shutdown.
    pub fn shutdown(&self) {
        self.inner.lock().expect("queue lock poisoned").shutting_down = true;
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn dequeues_in_priority_order() {
        let queue = ObjectiveQueue::new(10);
        queue.enqueue(Objective::new("low", 1, Origin::User)).unwrap();
        queue.enqueue(Objective::new("high", 9, Origin::User)).unwrap();
        queue.enqueue(Objective::new("mid", 5, Origin::User)).unwrap();

        let first = queue.dequeue(Duration::from_millis(10)).await.unwrap();
        let second = queue.dequeue(Duration::from_millis(10)).await.unwrap();
        let third = queue.dequeue(Duration::from_millis(10)).await.unwrap();

        assert_eq!(first.text, "high");
        assert_eq!(second.text, "mid");
        assert_eq!(third.text, "low");
    }

    #[tokio::test]
    async fn ties_broken_by_enqueue_order() {
        let queue = ObjectiveQueue::new(10);
        queue.enqueue(Objective::new("a", 5, Origin::User)).unwrap();
        queue.enqueue(Objective::new("b", 5, Origin::User)).unwrap();

        let first = queue.dequeue(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.text, "a");
    }

    #[test]
    fn dedup_returns_existing_id_for_non_corrective() {
        let queue = ObjectiveQueue::new(10);
        let id1 = queue.enqueue(Objective::new("same text", 1, Origin::User)).unwrap();
        let id2 = queue.enqueue(Objective::new("same text", 9, Origin::User)).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn corrective_duplicates_are_not_deduped() {
        let queue = ObjectiveQueue::new(10);
        let root = Objective::new("same text", 1, Origin::User);
        queue.enqueue(root.clone()).unwrap();
        queue.enqueue(root.corrective("same text", 5)).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn queue_full_rejects_enqueue() {
        let queue = ObjectiveQueue::new(1);
        queue.enqueue(Objective::new("first", 1, Origin::User)).unwrap();
        let err = queue.enqueue(Objective::new("second", 1, Origin::User));
        assert!(matches!(err, Err(CoreError::QueueFull)));
    }

    #[tokio::test]
    async fn dequeue_times_out_on_empty_queue() {
        let queue = ObjectiveQueue::new(10);
        let result = queue.dequeue(Duration::from_millis(20)).await;
        assert!(result.is_none());
    }
}
