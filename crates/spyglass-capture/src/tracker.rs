// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity table mapping live networking tasks to store task ids.
//!
//! Entries hold the task weakly. A task leaves the table when it completes,
//! when its identity turns up again for a different task object after the
//! original was dropped, or when the table is full and it is the oldest
//! entry. Evicted entries are handed back so the caller can finish them.
//!
//! Tasks that completed or were evicted while alive are remembered in a
//! bounded list of tombstones, so a late callback for one of them is
//! ignored instead of registering the same task a second time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use spyglass_core::TaskId;
use spyglass_core::network::{NetworkRequest, NetworkResponse, TaskMetrics, TransactionMetrics};
use spyglass_core::traits::delegate::{NetworkTask, TaskIdentity};

/// Capture state accumulated for one task between creation and completion.
#[derive(Debug)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub task: Weak<NetworkTask>,
    pub created_at: DateTime<Utc>,
    pub data: Vec<u8>,
    /// The body outgrew the sink's limit and `data` was discarded.
    pub data_overflowed: bool,
    pub response: Option<NetworkResponse>,
    pub metrics: Option<TaskMetrics>,
    /// Request of the hop in flight, as last seen by a redirect.
    pub current_request: Option<NetworkRequest>,
    /// One transaction per completed redirect hop.
    pub hops: Vec<TransactionMetrics>,
    pub redirect_count: u32,
    /// The transport finished and completion waits on decoding.
    pub awaiting_decoding: bool,
    seq: u64,
}

impl TaskContext {
    fn new(task: &Arc<NetworkTask>, seq: u64) -> Self {
        Self {
            task_id: TaskId::new(),
            task: Arc::downgrade(task),
            created_at: Utc::now(),
            data: Vec::new(),
            data_overflowed: false,
            response: None,
            metrics: None,
            current_request: None,
            hops: Vec::new(),
            redirect_count: 0,
            awaiting_decoding: false,
            seq,
        }
    }

    fn is_for(&self, task: &Arc<NetworkTask>) -> bool {
        std::ptr::eq(self.task.as_ptr(), Arc::as_ptr(task))
            && self.task.strong_count() > 0
    }
}

/// Why an entry left the table without completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The table was full and this was the oldest entry.
    Capacity,
    /// The task object was dropped without a completion callback.
    Dropped,
}

#[derive(Debug)]
pub struct Evicted {
    pub context: TaskContext,
    pub reason: EvictionReason,
}

/// Outcome of [`TaskTracker::track`].
#[derive(Debug)]
pub struct Tracked {
    pub task_id: TaskId,
    pub is_new: bool,
    pub evicted: Vec<Evicted>,
}

/// Live tasks that already left the table, oldest first.
#[derive(Debug, Default)]
struct Tombstones(VecDeque<Weak<NetworkTask>>);

impl Tombstones {
    fn contains(&self, task: &Arc<NetworkTask>) -> bool {
        // The weak reference keeps the allocation, so the address cannot
        // be reused by another task while the tombstone exists.
        self.0
            .iter()
            .any(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(task)))
    }

    fn push(&mut self, task: Weak<NetworkTask>, limit: usize) {
        if task.strong_count() == 0 {
            return;
        }
        self.0.retain(|weak| weak.strong_count() > 0);
        self.0.push_back(task);
        while self.0.len() > limit {
            self.0.pop_front();
        }
    }
}

#[derive(Debug)]
pub struct TaskTracker {
    entries: DashMap<TaskIdentity, TaskContext>,
    /// Insertion order as `(seq, identity)`. Entries that already left the
    /// table are skipped lazily.
    order: Mutex<VecDeque<(u64, TaskIdentity)>>,
    /// Locked after `order` when both are held.
    retired: Mutex<Tombstones>,
    next_seq: AtomicU64,
    capacity: usize,
}

impl TaskTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            retired: Mutex::new(Tombstones::default()),
            next_seq: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store id of `task` if it is tracked.
    pub fn task_id(&self, task: &Arc<NetworkTask>) -> Option<TaskId> {
        self.entries
            .get(&task.identity())
            .filter(|ctx| ctx.is_for(task))
            .map(|ctx| ctx.task_id)
    }

    /// Whether `task` completed or was evicted while still alive.
    pub fn is_retired(&self, task: &Arc<NetworkTask>) -> bool {
        self.retired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(task)
    }

    /// Returns the store id of `task`, registering it when first seen.
    /// `None` when the task already completed or was evicted.
    ///
    /// `on_new` runs before the new entry becomes visible to other threads,
    /// so anything it enqueues precedes every later event for the task.
    pub fn track(&self, task: &Arc<NetworkTask>, on_new: impl FnOnce(TaskId)) -> Option<Tracked> {
        if let Some(task_id) = self.task_id(task) {
            return Some(Tracked {
                task_id,
                is_new: false,
                evicted: Vec::new(),
            });
        }

        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task_id) = self.task_id(task) {
            return Some(Tracked {
                task_id,
                is_new: false,
                evicted: Vec::new(),
            });
        }
        if retired.contains(task) {
            return None;
        }

        let identity = task.identity();
        let mut evicted = Vec::new();
        if let Some((_, stale)) = self.entries.remove(&identity) {
            evicted.push(Evicted {
                context: stale,
                reason: EvictionReason::Dropped,
            });
        }
        if self.entries.len() >= self.capacity {
            evicted.extend(self.remove_dropped());
        }
        while self.entries.len() >= self.capacity {
            let Some((seq, oldest)) = order.pop_front() else {
                break;
            };
            if let Some((_, context)) = self.entries.remove_if(&oldest, |_, ctx| ctx.seq == seq) {
                retired.push(context.task.clone(), self.capacity);
                evicted.push(Evicted {
                    context,
                    reason: EvictionReason::Capacity,
                });
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let context = TaskContext::new(task, seq);
        let task_id = context.task_id;
        on_new(task_id);
        self.entries.insert(identity, context);
        order.push_back((seq, identity));
        if order.len() > self.capacity.saturating_mul(2) {
            order.retain(|(seq, identity)| {
                self.entries
                    .get(identity)
                    .is_some_and(|ctx| ctx.seq == *seq)
            });
        }

        Some(Tracked {
            task_id,
            is_new: true,
            evicted,
        })
    }

    /// Runs `f` on the context of `task`, if tracked. `f` must not call
    /// back into the tracker.
    pub fn with<R>(&self, task: &Arc<NetworkTask>, f: impl FnOnce(&mut TaskContext) -> R) -> Option<R> {
        let mut ctx = self.entries.get_mut(&task.identity())?;
        if !ctx.is_for(task) {
            return None;
        }
        Some(f(ctx.value_mut()))
    }

    /// Takes `task` out of the table and remembers it as retired.
    pub fn remove(&self, task: &Arc<NetworkTask>) -> Option<TaskContext> {
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        let (_, ctx) = self
            .entries
            .remove_if(&task.identity(), |_, ctx| ctx.is_for(task))?;
        retired.push(ctx.task.clone(), self.capacity);
        Some(ctx)
    }

    /// Removes every entry whose task object is gone.
    pub fn remove_dropped(&self) -> Vec<Evicted> {
        let dropped: Vec<TaskIdentity> = self
            .entries
            .iter()
            .filter(|entry| entry.task.strong_count() == 0)
            .map(|entry| *entry.key())
            .collect();
        dropped
            .into_iter()
            .filter_map(|identity| {
                self.entries
                    .remove_if(&identity, |_, ctx| ctx.task.strong_count() == 0)
            })
            .map(|(_, context)| Evicted {
                context,
                reason: EvictionReason::Dropped,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use spyglass_core::TaskType;

    use super::*;

    fn task(identity: u64) -> Arc<NetworkTask> {
        Arc::new(NetworkTask::new(
            TaskIdentity(identity),
            TaskType::Data,
            Some(NetworkRequest::new(format!("https://example.com/{identity}"))),
        ))
    }

    #[test]
    fn tracking_is_stable_per_task() {
        let tracker = TaskTracker::new(8);
        let a = task(1);
        let mut created = 0;
        let first = tracker.track(&a, |_| created += 1).unwrap();
        let second = tracker.track(&a, |_| created += 1).unwrap();
        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(first.task_id, second.task_id);
        assert_eq!(created, 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn oldest_entry_is_evicted_at_capacity() {
        let tracker = TaskTracker::new(2);
        let tasks: Vec<_> = (1..=3).map(task).collect();
        let ids: Vec<TaskId> = tasks
            .iter()
            .map(|t| tracker.track(t, |_| {}).unwrap().task_id)
            .collect();
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.task_id(&tasks[0]), None);
        assert_eq!(tracker.task_id(&tasks[2]), Some(ids[2]));

        let fourth = task(4);
        let tracked = tracker.track(&fourth, |_| {}).unwrap();
        assert_eq!(tracked.evicted.len(), 1);
        assert_eq!(tracked.evicted[0].context.task_id, ids[1]);
        assert_eq!(tracked.evicted[0].reason, EvictionReason::Capacity);
    }

    #[test]
    fn completed_tasks_do_not_count_against_capacity() {
        let tracker = TaskTracker::new(2);
        for identity in 0..10 {
            let t = task(identity);
            let tracked = tracker.track(&t, |_| {}).unwrap();
            assert!(tracked.evicted.is_empty());
            assert!(tracker.remove(&t).is_some());
        }
        assert!(tracker.is_empty());
    }

    #[test]
    fn dropped_tasks_are_evicted_before_live_ones() {
        let tracker = TaskTracker::new(2);
        let live = task(1);
        tracker.track(&live, |_| {});
        let dropped_id = {
            let gone = task(2);
            tracker.track(&gone, |_| {}).unwrap().task_id
        };
        let next = task(3);
        let tracked = tracker.track(&next, |_| {}).unwrap();
        assert_eq!(tracked.evicted.len(), 1);
        assert_eq!(tracked.evicted[0].context.task_id, dropped_id);
        assert_eq!(tracked.evicted[0].reason, EvictionReason::Dropped);
        assert!(tracker.task_id(&live).is_some());
    }

    #[test]
    fn reused_identity_replaces_the_stale_entry() {
        let tracker = TaskTracker::new(8);
        let old_id = {
            let old = task(7);
            tracker.track(&old, |_| {}).unwrap().task_id
        };
        let reused = task(7);
        assert_eq!(tracker.task_id(&reused), None);
        let tracked = tracker.track(&reused, |_| {}).unwrap();
        assert!(tracked.is_new);
        assert_ne!(tracked.task_id, old_id);
        assert_eq!(tracked.evicted[0].context.task_id, old_id);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn finished_and_evicted_tasks_stay_retired() {
        let tracker = TaskTracker::new(1);
        let first = task(1);
        let second = task(2);
        tracker.track(&first, |_| {}).unwrap();
        let tracked = tracker.track(&second, |_| {}).unwrap();
        assert_eq!(tracked.evicted[0].reason, EvictionReason::Capacity);
        assert!(tracker.is_retired(&first));

        // A late callback for the evicted task neither registers it again
        // nor pushes out the live one.
        let mut created = 0;
        assert!(tracker.track(&first, |_| created += 1).is_none());
        assert_eq!(created, 0);
        assert!(tracker.task_id(&second).is_some());

        assert!(tracker.remove(&second).is_some());
        assert!(tracker.track(&second, |_| {}).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn tombstones_do_not_outlive_their_task() {
        let tracker = TaskTracker::new(4);
        {
            let gone = task(1);
            tracker.track(&gone, |_| {}).unwrap();
            tracker.remove(&gone).unwrap();
        }
        // Same identity, new task object: a fresh registration.
        let reused = task(1);
        assert!(!tracker.is_retired(&reused));
        assert!(tracker.track(&reused, |_| {}).unwrap().is_new);
    }

    #[test]
    fn context_is_mutable_through_with() {
        let tracker = TaskTracker::new(4);
        let t = task(1);
        tracker.track(&t, |_| {});
        tracker.with(&t, |ctx| ctx.data.extend_from_slice(b"abc"));
        tracker.with(&t, |ctx| ctx.data.extend_from_slice(b"def"));
        let ctx = tracker.remove(&t).unwrap();
        assert_eq!(ctx.data, b"abcdef");
        assert!(tracker.with(&t, |_| ()).is_none());
    }
}
