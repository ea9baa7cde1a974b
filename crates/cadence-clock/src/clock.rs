//! The clock capability trait and the OS-backed implementation.

use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::MutexGuard;

use crate::monitor::Monitor;
use crate::time::{TimeDelta, Timestamp};

/// Identifies a registered [`TimeListener`] for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Notification target for clocks whose time is advanced explicitly.
///
/// [`Monitor`] implements this by pulsing itself, which is the only
/// implementation a deadline wait ever registers.
pub trait TimeListener: Send + Sync {
    /// Called after the clock's time has advanced.
    fn on_time_advanced(&self);
}

impl<T: Send> TimeListener for Monitor<T> {
    fn on_time_advanced(&self) {
        self.pulse();
    }
}

/// An abstract source of time.
///
/// The scheduler consumes this as `Arc<dyn Clock>` so tests can substitute
/// [`crate::MockClock`] for [`RealClock`] and drive time explicitly.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> Timestamp;

    /// Blocks the calling thread for `delta`. Non-positive spans return
    /// immediately.
    fn sleep_for(&self, delta: TimeDelta);

    /// Blocks the calling thread until `deadline`.
    fn sleep_until(&self, deadline: Timestamp);

    /// Registers a listener to be notified whenever time advances.
    ///
    /// Returns `None` if this clock's time flows on its own and listeners
    /// are meaningless; deadline waits then rely on OS timed waits instead.
    fn add_listener(&self, listener: Arc<dyn TimeListener>) -> Option<ListenerId>;

    /// Removes a listener previously registered with
    /// [`add_listener`](Clock::add_listener).
    fn remove_listener(&self, id: ListenerId);
}

/// Condition waits bounded by a deadline measured against the clock.
///
/// Blanket-implemented for every [`Clock`], including `dyn Clock`.
pub trait ClockExt: Clock {
    /// Waits until `condition` holds for the monitor's state or the clock
    /// reports a time at or past `deadline`.
    ///
    /// The caller must hold the monitor's mutex and pass its guard; the
    /// mutex is released while the thread is parked and reacquired before
    /// returning. Returns the final value of `condition`, so a `false`
    /// return means the deadline passed first. Spurious wakes are permitted
    /// and callers must not infer the wake cause from a return.
    ///
    /// The condition must be a pure function of the guarded state: it may
    /// be re-evaluated at any wake, and it must not consult the clock (the
    /// deadline parameter is how time bounds the wait).
    fn await_with_deadline<T, F>(
        &self,
        monitor: &Arc<Monitor<T>>,
        guard: &mut MutexGuard<'_, T>,
        deadline: Timestamp,
        mut condition: F,
    ) -> bool
    where
        T: Send + 'static,
        F: FnMut(&T) -> bool,
    {
        debug_assert!(monitor.owns(guard), "guard does not belong to monitor");
        let registration = self.add_listener(Arc::clone(monitor) as Arc<dyn TimeListener>);
        loop {
            if condition(&*guard) {
                break;
            }
            if self.now() >= deadline {
                break;
            }
            if registration.is_some() || deadline == Timestamp::INFINITE_FUTURE {
                monitor.wait(guard);
            } else {
                let remaining = deadline - self.now();
                monitor.wait_for(guard, remaining.to_std());
            }
        }
        if let Some(id) = registration {
            self.remove_listener(id);
        }
        condition(&*guard)
    }
}

impl<C: Clock + ?Sized> ClockExt for C {}

/// The OS wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealClock;

impl RealClock {
    /// The process-wide shared instance.
    pub fn shared() -> Arc<RealClock> {
        static INSTANCE: OnceLock<Arc<RealClock>> = OnceLock::new();
        Arc::clone(INSTANCE.get_or_init(|| Arc::new(RealClock)))
    }
}

impl Clock for RealClock {
    fn now(&self) -> Timestamp {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since) => Timestamp::from_unix_nanos(clamp_nanos(since.as_nanos())),
            Err(err) => Timestamp::from_unix_nanos(-clamp_nanos(err.duration().as_nanos())),
        }
    }

    fn sleep_for(&self, delta: TimeDelta) {
        if delta.is_positive() {
            std::thread::sleep(delta.to_std());
        }
    }

    fn sleep_until(&self, deadline: Timestamp) {
        self.sleep_for(deadline - self.now());
    }

    fn add_listener(&self, _listener: Arc<dyn TimeListener>) -> Option<ListenerId> {
        None
    }

    fn remove_listener(&self, _id: ListenerId) {}
}

fn clamp_nanos(nanos: u128) -> i64 {
    if nanos > i64::MAX as u128 {
        i64::MAX
    } else {
        nanos as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_real_clock_is_roughly_unix_time() {
        let now = RealClock::shared().now();
        // Any sane machine running this test is past 2020 and before 2200.
        assert!(now > Timestamp::EPOCH + TimeDelta::from_secs(50 * 365 * 24 * 3600));
        assert!(now.is_finite());
    }

    #[test]
    fn test_real_clock_deadline_wait_times_out() {
        let clock = RealClock::shared();
        let monitor = Arc::new(Monitor::new(()));
        let start = Instant::now();
        let deadline = clock.now() + TimeDelta::from_millis(30);
        let mut guard = monitor.lock();
        let satisfied = clock.await_with_deadline(&monitor, &mut guard, deadline, |_| false);
        assert!(!satisfied);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_deadline_wait_returns_on_condition() {
        let clock = RealClock::shared();
        let monitor = Arc::new(Monitor::new(false));
        let waiter = {
            let clock = Arc::clone(&clock);
            let monitor = Arc::clone(&monitor);
            std::thread::spawn(move || {
                let deadline = clock.now() + TimeDelta::from_secs(60);
                let mut guard = monitor.lock();
                clock.await_with_deadline(&monitor, &mut guard, deadline, |ready| *ready)
            })
        };
        {
            let mut guard = monitor.lock();
            *guard = true;
        }
        monitor.notify_all();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_past_deadline_returns_immediately() {
        let clock = RealClock::shared();
        let monitor = Arc::new(Monitor::new(()));
        let deadline = clock.now() - TimeDelta::from_secs(1);
        let mut guard = monitor.lock();
        assert!(!clock.await_with_deadline(&monitor, &mut guard, deadline, |_| false));
    }
}
