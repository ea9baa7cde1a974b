//! A mutex-and-condvar bundle with condition waits.

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Guarded state plus the condition variable its waiters park on.
///
/// Keeping the pair in one value guarantees that every wait on the condvar
/// uses the monitor's own mutex, and gives clock listeners a single object
/// to notify when virtual time advances.
pub struct Monitor<T> {
    data: Mutex<T>,
    condvar: Condvar,
}

impl<T> Monitor<T> {
    /// Creates a monitor guarding `value`.
    pub const fn new(value: T) -> Self {
        Monitor {
            data: Mutex::new(value),
            condvar: Condvar::new(),
        }
    }

    /// Acquires the monitor's mutex.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.data.lock()
    }

    /// Wakes every thread parked on the monitor.
    ///
    /// Must be called after every mutation of the guarded state that a
    /// waiter's predicate may observe.
    pub fn notify_all(&self) {
        self.condvar.notify_all();
    }

    /// Blocks until notified. The guard must belong to this monitor.
    pub fn wait(&self, guard: &mut MutexGuard<'_, T>) {
        self.condvar.wait(guard);
    }

    /// Blocks until notified or `timeout` elapses on the OS clock.
    ///
    /// Returns `true` if the wait timed out.
    pub fn wait_for(&self, guard: &mut MutexGuard<'_, T>, timeout: std::time::Duration) -> bool {
        self.condvar.wait_for(guard, timeout).timed_out()
    }

    /// Blocks until `condition` holds for the guarded state.
    ///
    /// The condition is re-evaluated after every wake, so it must be a pure
    /// function of the guarded state. Spurious wakes are harmless.
    pub fn await_until<F>(&self, guard: &mut MutexGuard<'_, T>, mut condition: F)
    where
        F: FnMut(&T) -> bool,
    {
        while !condition(&*guard) {
            self.condvar.wait(guard);
        }
    }

    /// Acquires and releases the mutex, then wakes every waiter.
    ///
    /// The acquire/release pair is a barrier against a thread that has
    /// evaluated its wait predicate but not yet parked: such a thread still
    /// holds the mutex, so the notification cannot fall into that window.
    pub fn pulse(&self) {
        drop(self.data.lock());
        self.condvar.notify_all();
    }

    /// Whether `guard` guards this monitor's state. Debug-assertion helper.
    pub(crate) fn owns(&self, guard: &MutexGuard<'_, T>) -> bool {
        std::ptr::eq(self.data.data_ptr().cast_const(), &**guard)
    }
}
