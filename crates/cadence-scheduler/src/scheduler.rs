//! The scheduler: worker pool, lifecycle, scheduling and cancellation.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cadence_clock::{Clock, ClockExt, Monitor, RealClock, TimeDelta, Timestamp};
use parking_lot::MutexGuard;
use thiserror::Error;
use tracing::{debug, trace};

use crate::queue::TaskQueue;
use crate::sequence::SequenceNumber;
use crate::task::{Callback, Handle, Task, TaskRegistry};

// ============================================================================
// Public types
// ============================================================================

/// Configuration for [`Scheduler::new`].
#[derive(Clone)]
pub struct Options {
    /// The number of worker threads. Must be greater than zero. Each worker
    /// is an OS thread, so keep this small.
    pub num_workers: u16,

    /// Clock used to schedule tasks. `None` means the shared [`RealClock`].
    pub clock: Option<Arc<dyn Clock>>,

    /// If `true` the constructor calls [`Scheduler::start`] right away.
    /// Leave `false` e.g. for schedulers created ahead of time, so worker
    /// threads are not spun up on construction.
    pub start_now: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            num_workers: 2,
            clock: None,
            start_now: false,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("num_workers", &self.num_workers)
            .field("clock", &self.clock.as_ref().map(|_| "<clock>"))
            .field("start_now", &self.start_now)
            .finish()
    }
}

/// The state of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    /// Constructed but not yet started.
    Idle = 0,

    /// Started. The worker threads are processing tasks.
    Started = 1,

    /// Stop in progress: in-flight tasks are finishing, no further task
    /// will start.
    Stopping = 2,

    /// Stopped. All workers joined; no task will ever run again.
    Stopped = 3,
}

/// Returned by [`Scheduler::wait_until_all_workers_asleep`] when the
/// scheduler leaves [`State::Started`] before quiescence is observed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("scheduler stopped before quiescence was observed")]
pub struct Cancelled;

// ============================================================================
// Scheduler
// ============================================================================

/// Schedules generic runnable callbacks by due time.
///
/// Supports blocking and non-blocking cancellation as well as recurring
/// (periodic) tasks that are automatically rescheduled after every run.
/// Under the hood, a fixed (configurable) number of worker threads waits on
/// a due-time-ordered queue and runs each task as soon as it is due.
///
/// Fully thread-safe. Callbacks run with no scheduler lock held, so they
/// may block freely (at the cost of worker concurrency) and may call back
/// into the scheduler; the one thing they must not do is panic, since a
/// panicking callback tears down its worker thread and the pool runs
/// degraded from then on (quiescence observation in particular becomes
/// unreliable).
pub struct Scheduler {
    core: Arc<Monitor<Core>>,
    clock: Arc<dyn Clock>,
    handles: SequenceNumber,
    num_workers: u16,
}

struct Core {
    state: State,
    registry: TaskRegistry,
    queue: TaskQueue,
    /// Whether the head of the queue is a non-cancelled task whose due time
    /// has passed. Must be recomputed after every queue mutation: worker
    /// wait predicates may only read monitor-guarded state, so due-ness is
    /// cached here instead of fetching the clock from inside a predicate.
    event_due: bool,
    /// Per-worker flags, true while the worker is inside its fetch wait.
    sleeping: Vec<bool>,
    join_handles: Vec<JoinHandle<()>>,
}

impl Core {
    fn new() -> Self {
        Core {
            state: State::Idle,
            registry: TaskRegistry::default(),
            queue: TaskQueue::new(),
            event_due: false,
            sleeping: Vec::new(),
            join_handles: Vec::new(),
        }
    }

    fn recompute_event_due(&mut self, now: Timestamp) {
        self.event_due = match self.queue.peek() {
            Some((due, handle)) => {
                due <= now && !self.registry.get(handle).map_or(true, |task| task.cancelled)
            }
            None => false,
        };
    }

    fn all_workers_sleeping(&self) -> bool {
        self.sleeping.iter().all(|sleeping| *sleeping)
    }
}

impl Scheduler {
    /// Creates a scheduler.
    ///
    /// # Panics
    ///
    /// Panics if `options.num_workers` is zero.
    #[must_use]
    pub fn new(options: Options) -> Self {
        assert!(
            options.num_workers > 0,
            "Scheduler requires at least one worker thread"
        );
        let Options {
            num_workers,
            clock,
            start_now,
        } = options;
        let clock = clock.unwrap_or_else(|| RealClock::shared() as Arc<dyn Clock>);
        let scheduler = Scheduler {
            core: Arc::new(Monitor::new(Core::new())),
            clock,
            handles: SequenceNumber::default(),
            num_workers,
        };
        if start_now {
            scheduler.start();
        }
        scheduler
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> State {
        self.core.lock().state
    }

    /// Starts the workers.
    ///
    /// Transitions [`State::Idle`] to [`State::Started`]; in any other state
    /// this is a no-op. Safe to call concurrently; the workers are spawned
    /// only once, and the scheduler is in `Started` when the effective call
    /// returns.
    pub fn start(&self) {
        let mut guard = self.core.lock();
        if guard.state != State::Idle {
            return;
        }
        let num_workers = usize::from(self.num_workers);
        guard.sleeping = vec![false; num_workers];
        guard.join_handles = Vec::with_capacity(num_workers);
        for index in 0..num_workers {
            let core = Arc::clone(&self.core);
            let clock = Arc::clone(&self.clock);
            let join_handle = thread::Builder::new()
                .name(format!("cadence-worker-{index}"))
                .spawn(move || worker_loop(&core, &*clock, index))
                .expect("failed to spawn worker thread");
            guard.join_handles.push(join_handle);
        }
        guard.state = State::Started;
        self.core.notify_all();
        debug!(num_workers, "scheduler started");
    }

    /// Stops the scheduler and joins all workers.
    ///
    /// The scheduler passes through [`State::Stopping`] while in-flight
    /// callbacks finish, and is guaranteed to be [`State::Stopped`] on
    /// return; the task queue and registry are cleared. Called before
    /// [`start`](Scheduler::start), it transitions directly from `Idle` to
    /// `Stopped`, preventing the scheduler from ever running a task.
    /// Concurrent calls all block until the workers are joined. Dropping the
    /// scheduler calls this implicitly.
    pub fn stop(&self) {
        let join_handles = {
            let mut guard = self.core.lock();
            match guard.state {
                State::Idle => {
                    guard.state = State::Stopped;
                    self.core.notify_all();
                    debug!("scheduler stopped before start");
                    return;
                }
                State::Stopping | State::Stopped => {
                    // Another stop is (or was) in flight: wait it out.
                    self.core
                        .await_until(&mut guard, |core| core.state == State::Stopped);
                    return;
                }
                State::Started => {
                    guard.state = State::Stopping;
                    self.core.notify_all();
                    std::mem::take(&mut guard.join_handles)
                }
            }
        };
        for join_handle in join_handles {
            // A worker that died to a panicking callback reports the panic
            // here; there is nothing left to unwind into, so drop it.
            let _ = join_handle.join();
        }
        let mut guard = self.core.lock();
        guard.queue.clear();
        guard.registry.clear();
        guard.event_due = false;
        guard.state = State::Stopped;
        self.core.notify_all();
        debug!("scheduler stopped");
    }

    /// Schedules `callback` to run as soon as possible.
    ///
    /// The returned handle can be passed to [`cancel`](Scheduler::cancel) or
    /// [`blocking_cancel`](Scheduler::blocking_cancel).
    #[must_use]
    pub fn schedule_now<F>(&self, callback: F) -> Handle
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_impl(Box::new(callback), self.clock.now(), None)
    }

    /// Schedules `callback` to run at `due_time`.
    #[must_use]
    pub fn schedule_at<F>(&self, callback: F, due_time: Timestamp) -> Handle
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_impl(Box::new(callback), due_time, None)
    }

    /// Schedules `callback` to run after `delay`.
    #[must_use]
    pub fn schedule_in<F>(&self, callback: F, delay: TimeDelta) -> Handle
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_impl(Box::new(callback), self.clock.now() + delay, None)
    }

    /// Schedules `callback` to run once every `period`, starting as soon as
    /// possible.
    ///
    /// # Panics
    ///
    /// Panics if `period` is not positive.
    #[must_use]
    pub fn schedule_recurring<F>(&self, callback: F, period: TimeDelta) -> Handle
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_recurring_at(callback, self.clock.now(), period)
    }

    /// Schedules `callback` to run once every `period`, starting at
    /// `due_time`.
    ///
    /// # Panics
    ///
    /// Panics if `period` is not positive.
    #[must_use]
    pub fn schedule_recurring_at<F>(
        &self,
        callback: F,
        due_time: Timestamp,
        period: TimeDelta,
    ) -> Handle
    where
        F: FnMut() + Send + 'static,
    {
        assert!(period.is_positive(), "recurring period must be positive");
        self.schedule_impl(Box::new(callback), due_time, Some(period))
    }

    /// Schedules `callback` to run once every `period`, starting after
    /// `delay`.
    ///
    /// # Panics
    ///
    /// Panics if `period` is not positive.
    #[must_use]
    pub fn schedule_recurring_in<F>(
        &self,
        callback: F,
        delay: TimeDelta,
        period: TimeDelta,
    ) -> Handle
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_recurring_at(callback, self.clock.now() + delay, period)
    }

    /// Cancels the task with the given handle without blocking.
    ///
    /// Returns `true` iff actual cancellation happened: the task was still
    /// queued and had not started running. A task that is currently
    /// executing finishes normally, but its cancelled flag is set so a
    /// periodic task is not re-armed. An unknown or already-completed
    /// handle returns `false`; that is not an error.
    #[must_use]
    pub fn cancel(&self, handle: Handle) -> bool {
        self.cancel_impl(handle, false)
    }

    /// Like [`cancel`](Scheduler::cancel), but if the task is currently
    /// executing, blocks until that execution completes before returning.
    ///
    /// The returned boolean still reports whether the queued entry was
    /// removed, so it is `false` for a task that was already running.
    #[must_use]
    pub fn blocking_cancel(&self, handle: Handle) -> bool {
        self.cancel_impl(handle, true)
    }

    /// TEST ONLY: blocks until every worker is asleep and no queued task is
    /// due.
    ///
    /// Only meaningful with a [`cadence_clock::MockClock`]: virtual time
    /// advances solely under test control, so observed quiescence persists
    /// until the test advances the clock again. Under a real clock nothing
    /// stops further tasks from becoming due the instant this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the scheduler leaves [`State::Started`]
    /// while waiting.
    pub fn wait_until_all_workers_asleep(&self) -> Result<(), Cancelled> {
        let mut guard = self.core.lock();
        self.core.await_until(&mut guard, |core| {
            core.state != State::Started || (core.all_workers_sleeping() && !core.event_due)
        });
        if guard.state > State::Started {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    fn schedule_impl(
        &self,
        callback: Callback,
        due_time: Timestamp,
        period: Option<TimeDelta>,
    ) -> Handle {
        let handle = Handle::from_raw(self.handles.next());
        let mut guard = self.core.lock();
        {
            let core = &mut *guard;
            core.registry
                .insert(handle, Task::new(callback, due_time, period));
            core.queue.push(&mut core.registry, handle);
        }
        let now = self.clock.now();
        guard.recompute_event_due(now);
        drop(guard);
        self.core.notify_all();
        debug!(task = %handle, periodic = period.is_some(), "scheduled task");
        handle
    }

    fn cancel_impl(&self, handle: Handle, blocking: bool) -> bool {
        let mut guard = self.core.lock();
        let queue_pos = match guard.registry.get_mut(handle) {
            None => return false,
            Some(task) => {
                task.cancelled = true;
                task.queue_pos
            }
        };
        match queue_pos {
            Some(pos) => {
                {
                    let core = &mut *guard;
                    let removed = core.queue.remove(&mut core.registry, pos);
                    debug_assert_eq!(removed, handle, "backlink pointed at the wrong slot");
                    core.registry.remove(handle);
                }
                let now = self.clock.now();
                guard.recompute_event_due(now);
                drop(guard);
                self.core.notify_all();
                debug!(task = %handle, "cancelled queued task");
                true
            }
            None => {
                // Already executing on some worker. The worker drops the
                // task instead of re-arming it once the run completes.
                if blocking {
                    self.core
                        .await_until(&mut guard, |core| !core.registry.contains(handle));
                }
                false
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Worker loop
// ============================================================================

/// A task checked out by a worker. The registry entry stays behind (with
/// its callback slot emptied) so cancellation can still find the task.
struct RunningTask {
    handle: Handle,
    callback: Callback,
}

/// Shutdown signal: the scheduler left `Started`, the worker must exit.
struct Aborted;

fn worker_loop(core: &Arc<Monitor<Core>>, clock: &dyn Clock, index: usize) {
    trace!(worker = index, "worker running");
    let mut last: Option<RunningTask> = None;
    loop {
        match fetch_task(core, clock, index, last.take()) {
            Ok(mut task) => {
                (task.callback)();
                last = Some(task);
            }
            Err(Aborted) => break,
        }
    }
    trace!(worker = index, "worker exiting");
}

/// Hands back the last executed task and blocks until a task is due.
///
/// The worker's sleeping flag is raised for the duration of the call; the
/// flag and the `event_due` cache are what
/// [`Scheduler::wait_until_all_workers_asleep`] observes.
fn fetch_task(
    core: &Arc<Monitor<Core>>,
    clock: &dyn Clock,
    index: usize,
    last: Option<RunningTask>,
) -> Result<RunningTask, Aborted> {
    let mut guard = core.lock();
    guard.sleeping[index] = true;
    core.notify_all();
    let result = fetch_task_locked(core, clock, &mut guard, last);
    guard.sleeping[index] = false;
    result
}

fn fetch_task_locked(
    core: &Arc<Monitor<Core>>,
    clock: &dyn Clock,
    guard: &mut MutexGuard<'_, Core>,
    last: Option<RunningTask>,
) -> Result<RunningTask, Aborted> {
    if let Some(finished) = last {
        requeue_or_erase(core, clock, guard, finished);
    }
    loop {
        // Wait for work or shutdown.
        core.await_until(guard, |core| {
            core.state > State::Started || !core.queue.is_empty()
        });
        if guard.state > State::Started {
            return Err(Aborted);
        }
        let head_due = match guard.queue.peek() {
            Some((due, _)) => due,
            None => continue,
        };
        // Wait for the head to become due, for shutdown, or for the head to
        // change: a newly scheduled earlier task must preempt this wait so
        // the deadline is re-keyed to the new head.
        clock.await_with_deadline(core, guard, head_due, move |core| {
            core.state > State::Started
                || core.event_due
                || core.queue.peek().map_or(true, |(due, _)| due != head_due)
        });
        if guard.state > State::Started {
            return Err(Aborted);
        }
        let now = clock.now();
        let head_is_due = guard
            .queue
            .peek()
            .map_or(false, |(due, _)| due <= now);
        if !head_is_due {
            continue;
        }
        let handle = {
            let core = &mut **guard;
            core.queue
                .pop_min(&mut core.registry)
                .expect("due head vanished under the lock")
        };
        guard.recompute_event_due(now);
        core.notify_all();
        if guard.registry.get(handle).map_or(true, |task| task.cancelled) {
            guard.registry.remove(handle);
            core.notify_all();
            continue;
        }
        let callback = guard
            .registry
            .get_mut(handle)
            .and_then(|task| task.callback.take())
            .expect("queued task lost its callback");
        trace!(task = %handle, "dispatching task");
        return Ok(RunningTask { handle, callback });
    }
}

/// Re-queues a finished periodic task or retires a finished one-shot.
fn requeue_or_erase(
    core: &Arc<Monitor<Core>>,
    clock: &dyn Clock,
    guard: &mut MutexGuard<'_, Core>,
    finished: RunningTask,
) {
    let RunningTask { handle, callback } = finished;
    let now = clock.now();
    let c = &mut **guard;
    let rearmed = match c.registry.get_mut(handle) {
        Some(task) if !task.cancelled => match task.period {
            Some(period) => {
                // Advance by whole periods past "now": overrunning
                // callbacks skip missed intervals instead of firing
                // back-to-back.
                let intervals = (now - task.due_time).ceil_div(period).max(1);
                task.due_time = task.due_time + period.saturating_mul(intervals);
                task.callback = Some(callback);
                true
            }
            None => false,
        },
        _ => false,
    };
    if rearmed {
        c.queue.push(&mut c.registry, handle);
        trace!(task = %handle, "re-armed periodic task");
    } else {
        c.registry.remove(handle);
        trace!(task = %handle, "retired task");
    }
    c.recompute_event_due(now);
    core.notify_all();
}

// ============================================================================
// Tests
// ============================================================================
