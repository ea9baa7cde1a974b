//! Priority queue of tasks, ordered by due time.

use cadence_clock::Timestamp;

use crate::task::{Handle, TaskRegistry};

/// A binary min-heap of `(due_time, handle)` slots, earliest first.
///
/// Alongside the usual push and pop-min, the queue supports removal at an
/// arbitrary position in O(log N): the slot's key is rewritten to
/// [`Timestamp::INFINITE_PAST`], sifted up to the root, and popped. Every
/// sift step rewrites the backlink (`Task::queue_pos`) of the tasks it
/// moves, which is what makes position-based removal possible in the first
/// place.
///
/// Slots with equal due times are ordered arbitrarily.
pub(crate) struct TaskQueue {
    slots: Vec<QueueSlot>,
}

#[derive(Debug, Clone, Copy)]
struct QueueSlot {
    due: Timestamp,
    handle: Handle,
}

impl TaskQueue {
    pub(crate) const fn new() -> Self {
        TaskQueue { slots: Vec::new() }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// The earliest-due slot, if any.
    pub(crate) fn peek(&self) -> Option<(Timestamp, Handle)> {
        self.slots.first().map(|slot| (slot.due, slot.handle))
    }

    /// Inserts the registry task identified by `handle`, keyed by its
    /// current due time.
    pub(crate) fn push(&mut self, registry: &mut TaskRegistry, handle: Handle) {
        let due = registry
            .get(handle)
            .expect("pushed task missing from registry")
            .due_time;
        self.slots.push(QueueSlot { due, handle });
        self.sift_up(registry, self.slots.len() - 1);
    }

    /// Removes and returns the earliest-due slot's handle, clearing the
    /// task's backlink.
    pub(crate) fn pop_min(&mut self, registry: &mut TaskRegistry) -> Option<Handle> {
        if self.slots.is_empty() {
            return None;
        }
        let last = self.slots.len() - 1;
        self.slots.swap(0, last);
        let popped = self.slots.pop().expect("heap emptied during pop");
        registry.set_queue_pos(popped.handle, None);
        if !self.slots.is_empty() {
            self.sift_down(registry, 0);
        }
        Some(popped.handle)
    }

    /// Removes the slot at `pos` by sifting it to the root with an
    /// infinitely-early key and popping it.
    pub(crate) fn remove(&mut self, registry: &mut TaskRegistry, pos: usize) -> Handle {
        self.slots[pos].due = Timestamp::INFINITE_PAST;
        let root = self.sift_up(registry, pos);
        debug_assert_eq!(root, 0, "infinitely-early slot failed to reach the root");
        self.pop_min(registry)
            .expect("non-empty heap produced no minimum")
    }

    /// Drops every slot without touching the registry. Only valid when the
    /// registry is being cleared wholesale as well.
    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }

    /// Restores the heap property upward from `pos`; returns the final
    /// position.
    fn sift_up(&mut self, registry: &mut TaskRegistry, mut pos: usize) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.slots[parent].due <= self.slots[pos].due {
                break;
            }
            self.slots.swap(parent, pos);
            registry.set_queue_pos(self.slots[pos].handle, Some(pos));
            pos = parent;
        }
        registry.set_queue_pos(self.slots[pos].handle, Some(pos));
        pos
    }

    /// Restores the heap property downward from `pos`.
    fn sift_down(&mut self, registry: &mut TaskRegistry, mut pos: usize) {
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut earliest = pos;
            if left < self.slots.len() && self.slots[left].due < self.slots[earliest].due {
                earliest = left;
            }
            if right < self.slots.len() && self.slots[right].due < self.slots[earliest].due {
                earliest = right;
            }
            if earliest == pos {
                break;
            }
            self.slots.swap(pos, earliest);
            registry.set_queue_pos(self.slots[pos].handle, Some(pos));
            pos = earliest;
        }
        registry.set_queue_pos(self.slots[pos].handle, Some(pos));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use cadence_clock::TimeDelta;

    fn insert(registry: &mut TaskRegistry, queue: &mut TaskQueue, raw: u64, due_secs: i64) -> Handle {
        let handle = Handle::from_raw(raw);
        let due = Timestamp::EPOCH + TimeDelta::from_secs(due_secs);
        registry.insert(handle, Task::new(Box::new(|| {}), due, None));
        queue.push(registry, handle);
        handle
    }

    /// Backlink consistency: every slot's task points back at that slot.
    fn assert_backlinks(registry: &TaskRegistry, queue: &TaskQueue) {
        for (pos, slot) in queue.slots.iter().enumerate() {
            let task = registry.get(slot.handle).expect("queued task not registered");
            assert_eq!(task.queue_pos, Some(pos), "stale backlink for {}", slot.handle);
        }
    }

    #[test]
    fn test_pops_in_due_order() {
        let mut registry = TaskRegistry::default();
        let mut queue = TaskQueue::new();
        for (raw, due) in [(1, 56), (2, 10), (3, 34), (4, 5), (5, 90)] {
            insert(&mut registry, &mut queue, raw, due);
            assert_backlinks(&registry, &queue);
        }
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.peek().map(|(_, h)| h.raw()), Some(4));

        let mut order = Vec::new();
        while let Some(handle) = queue.pop_min(&mut registry) {
            assert_backlinks(&registry, &queue);
            order.push(handle.raw());
            registry.remove(handle);
        }
        assert_eq!(order, vec![4, 2, 3, 1, 5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_mid_heap() {
        let mut registry = TaskRegistry::default();
        let mut queue = TaskQueue::new();
        for (raw, due) in [(1, 10), (2, 20), (3, 30), (4, 40), (5, 50), (6, 60)] {
            insert(&mut registry, &mut queue, raw, due);
        }

        let victim = Handle::from_raw(4);
        let pos = registry
            .get(victim)
            .and_then(|task| task.queue_pos)
            .expect("victim not queued");
        let removed = queue.remove(&mut registry, pos);
        assert_eq!(removed, victim);
        assert!(registry.get(victim).unwrap().queue_pos.is_none());
        registry.remove(victim);
        assert_backlinks(&registry, &queue);

        let mut order = Vec::new();
        while let Some(handle) = queue.pop_min(&mut registry) {
            order.push(handle.raw());
            registry.remove(handle);
        }
        assert_eq!(order, vec![1, 2, 3, 5, 6]);
    }

    #[test]
    fn test_remove_head_and_tail() {
        let mut registry = TaskRegistry::default();
        let mut queue = TaskQueue::new();
        for (raw, due) in [(1, 10), (2, 20), (3, 30)] {
            insert(&mut registry, &mut queue, raw, due);
        }
        assert_eq!(queue.remove(&mut registry, 0).raw(), 1);
        registry.remove(Handle::from_raw(1));
        assert_backlinks(&registry, &queue);

        let tail = queue.len() - 1;
        let tail_handle = queue.slots[tail].handle;
        assert_eq!(queue.remove(&mut registry, tail), tail_handle);
        registry.remove(tail_handle);
        assert_backlinks(&registry, &queue);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_equal_due_times_all_pop() {
        let mut registry = TaskRegistry::default();
        let mut queue = TaskQueue::new();
        for raw in 1..=4 {
            insert(&mut registry, &mut queue, raw, 34);
        }
        let mut popped = Vec::new();
        while let Some(handle) = queue.pop_min(&mut registry) {
            popped.push(handle.raw());
            registry.remove(handle);
        }
        popped.sort_unstable();
        assert_eq!(popped, vec![1, 2, 3, 4]);
    }
}
