//! A convenience wrapper running one closure periodically.

use std::sync::Arc;

use cadence_clock::{Clock, TimeDelta};
use parking_lot::Mutex;

use crate::scheduler::{Cancelled, Options as SchedulerOptions, Scheduler, State};
use crate::task::Callback;

/// Configuration for [`PeriodicClosure`].
#[derive(Clone)]
pub struct Options {
    /// Spacing between consecutive runs of the closure. Must be positive.
    pub period: TimeDelta,

    /// Clock used to pace the runs. `None` means the shared real clock.
    pub clock: Option<Arc<dyn Clock>>,

    /// If `true`, the constructor calls [`PeriodicClosure::start`] right
    /// away.
    pub start_now: bool,
}

/// Runs a closure once every period on a dedicated worker thread.
///
/// Built on a single-worker [`Scheduler`]; the closure's first run happens
/// one period after [`start`](PeriodicClosure::start). A closure that is
/// never started never runs.
pub struct PeriodicClosure {
    scheduler: Scheduler,
    period: TimeDelta,
    pending: Mutex<Option<Callback>>,
}

impl PeriodicClosure {
    /// Creates the wrapper. The closure does not run until
    /// [`start`](PeriodicClosure::start) is called (or immediately, with
    /// `start_now`).
    ///
    /// # Panics
    ///
    /// Panics if `options.period` is not positive.
    #[must_use]
    pub fn new<F>(options: Options, callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let Options {
            period,
            clock,
            start_now,
        } = options;
        assert!(period.is_positive(), "period must be positive");
        let periodic = PeriodicClosure {
            scheduler: Scheduler::new(SchedulerOptions {
                num_workers: 1,
                clock,
                start_now: false,
            }),
            period,
            pending: Mutex::new(Some(Box::new(callback))),
        };
        if start_now {
            periodic.start();
        }
        periodic
    }

    /// Starts the periodic runs. Idempotent; a no-op after
    /// [`stop`](PeriodicClosure::stop).
    pub fn start(&self) {
        let callback = match self.pending.lock().take() {
            Some(callback) => callback,
            None => return,
        };
        self.scheduler.start();
        let _ = self
            .scheduler
            .schedule_recurring_in(callback, self.period, self.period);
    }

    /// Stops the runs, waiting for an in-flight run to finish.
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// The state of the underlying scheduler.
    pub fn state(&self) -> State {
        self.scheduler.state()
    }

    /// TEST ONLY: blocks until the worker is asleep and no run is due. See
    /// [`Scheduler::wait_until_all_workers_asleep`].
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the wrapper is stopped while waiting.
    pub fn wait_until_asleep(&self) -> Result<(), Cancelled> {
        self.scheduler.wait_until_all_workers_asleep()
    }
}
