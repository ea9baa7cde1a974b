//! Task values and the handle-keyed registry that owns them.

use std::fmt;

use cadence_clock::{TimeDelta, Timestamp};
use rustc_hash::FxHashMap;

/// Type of the callbacks that can be scheduled.
///
/// `FnMut` rather than `FnOnce` because a periodic task runs the same
/// callback once per period.
pub type Callback = Box<dyn FnMut() + Send>;

/// Unique identifier of a scheduled task within its scheduler.
///
/// Returned by the `schedule_*` methods and accepted by the cancellation
/// methods. Handles are never reused within a scheduler's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u64);

impl Handle {
    /// The reserved invalid handle. No scheduled task ever receives it.
    pub const INVALID: Handle = Handle(0);

    pub(crate) const fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    /// The raw numeric value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether this handle could identify a task (it is not
    /// [`Handle::INVALID`]).
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A scheduled task.
///
/// Not thread-safe on its own; the scheduler's monitor guards all access.
/// `queue_pos` is the backlink to the heap slot currently holding the task:
/// `Some` exactly while the task is queued, `None` while a worker runs it.
/// The queue's sift operations keep it up to date.
pub(crate) struct Task {
    /// `None` while the callback is out being executed by a worker.
    pub(crate) callback: Option<Callback>,
    pub(crate) due_time: Timestamp,
    pub(crate) period: Option<TimeDelta>,
    pub(crate) cancelled: bool,
    pub(crate) queue_pos: Option<usize>,
}

impl Task {
    pub(crate) fn new(callback: Callback, due_time: Timestamp, period: Option<TimeDelta>) -> Self {
        Task {
            callback: Some(callback),
            due_time,
            period,
            cancelled: false,
            queue_pos: None,
        }
    }
}

/// Owns every live [`Task`], keyed by handle.
///
/// A task is present from `schedule_*` until it finishes its (final)
/// execution or is cancelled; entries without a queue backlink are exactly
/// the tasks currently being executed.
#[derive(Default)]
pub(crate) struct TaskRegistry {
    tasks: FxHashMap<Handle, Task>,
}

impl TaskRegistry {
    pub(crate) fn insert(&mut self, handle: Handle, task: Task) {
        self.tasks.insert(handle, task);
    }

    pub(crate) fn get(&self, handle: Handle) -> Option<&Task> {
        self.tasks.get(&handle)
    }

    pub(crate) fn get_mut(&mut self, handle: Handle) -> Option<&mut Task> {
        self.tasks.get_mut(&handle)
    }

    pub(crate) fn remove(&mut self, handle: Handle) -> Option<Task> {
        self.tasks.remove(&handle)
    }

    pub(crate) fn contains(&self, handle: Handle) -> bool {
        self.tasks.contains_key(&handle)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn clear(&mut self) {
        self.tasks.clear();
    }

    /// Rewrites a task's heap backlink. Called from the queue's sifts.
    pub(crate) fn set_queue_pos(&mut self, handle: Handle, pos: Option<usize>) {
        if let Some(task) = self.tasks.get_mut(&handle) {
            task.queue_pos = pos;
        }
    }
}
