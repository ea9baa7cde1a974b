//! A clock whose time is advanced explicitly.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::clock::{Clock, ListenerId, TimeListener};
use crate::time::{TimeDelta, Timestamp};

/// A [`Clock`] holding virtual time that only moves when told to.
///
/// Virtual time starts at [`Timestamp::EPOCH`] and is monotonically
/// non-decreasing. [`advance`](MockClock::advance) and
/// [`set_time`](MockClock::set_time) wake threads blocked in
/// [`sleep_for`](Clock::sleep_for)/[`sleep_until`](Clock::sleep_until) and
/// notify every registered listener, which is how deadline waits keyed to
/// this clock re-evaluate. Listeners are invoked after the clock's internal
/// lock has been released, so a listener may itself acquire arbitrary locks
/// (a [`crate::Monitor`] listener acquires the waiter's mutex). Callers of
/// `advance`/`set_time` must therefore not hold a registered listener's
/// mutex.
///
/// The constructor is `const`, so a clock shared by several tests can live
/// in static storage:
///
/// ```
/// use cadence_clock::{Clock, MockClock, TimeDelta, Timestamp};
///
/// static CLOCK: MockClock = MockClock::new();
///
/// CLOCK.advance(TimeDelta::from_secs(123));
/// assert_eq!(CLOCK.now(), Timestamp::EPOCH + TimeDelta::from_secs(123));
/// ```
pub struct MockClock {
    state: Mutex<MockState>,
    sleepers: Condvar,
}

struct MockState {
    now: Timestamp,
    listeners: Vec<(ListenerId, Arc<dyn TimeListener>)>,
    next_listener_id: u64,
}

impl MockClock {
    /// Creates a clock whose virtual time is the Unix epoch.
    pub const fn new() -> Self {
        Self::starting_at(Timestamp::EPOCH)
    }

    /// Creates a clock whose virtual time is `start`.
    pub const fn starting_at(start: Timestamp) -> Self {
        MockClock {
            state: Mutex::new(MockState {
                now: start,
                listeners: Vec::new(),
                next_listener_id: 1,
            }),
            sleepers: Condvar::new(),
        }
    }

    /// Moves virtual time forward by `delta`.
    ///
    /// # Panics
    ///
    /// Panics if `delta` is negative; virtual time never moves backwards.
    pub fn advance(&self, delta: TimeDelta) {
        assert!(!delta.is_negative(), "virtual time cannot move backwards");
        self.shift(|now| now + delta);
    }

    /// Sets virtual time to `time`.
    ///
    /// # Panics
    ///
    /// Panics if `time` is earlier than the current virtual time.
    pub fn set_time(&self, time: Timestamp) {
        self.shift(|now| {
            assert!(time >= now, "virtual time cannot move backwards");
            time
        });
    }

    fn shift<F>(&self, update: F)
    where
        F: FnOnce(Timestamp) -> Timestamp,
    {
        let listeners = {
            let mut state = self.state.lock();
            state.now = update(state.now);
            self.sleepers.notify_all();
            state.listeners.clone()
        };
        // The internal lock is released here; listeners may take any lock.
        for (_, listener) in listeners {
            listener.on_time_advanced();
        }
    }
}

impl Default for MockClock {
    fn default() -> Self {
        MockClock::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Timestamp {
        self.state.lock().now
    }

    fn sleep_for(&self, delta: TimeDelta) {
        let mut state = self.state.lock();
        let deadline = state.now + delta;
        while state.now < deadline {
            self.sleepers.wait(&mut state);
        }
    }

    fn sleep_until(&self, deadline: Timestamp) {
        let mut state = self.state.lock();
        while state.now < deadline {
            self.sleepers.wait(&mut state);
        }
    }

    fn add_listener(&self, listener: Arc<dyn TimeListener>) -> Option<ListenerId> {
        let mut state = self.state.lock();
        let id = ListenerId(state.next_listener_id);
        state.next_listener_id += 1;
        state.listeners.push((id, listener));
        Some(id)
    }

    fn remove_listener(&self, id: ListenerId) {
        let mut state = self.state.lock();
        state.listeners.retain(|(listener_id, _)| *listener_id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockExt;
    use crate::monitor::Monitor;

    static TEST_GLOBAL_INSTANCE: MockClock = MockClock::new();

    fn secs(n: i64) -> TimeDelta {
        TimeDelta::from_secs(n)
    }

    #[test]
    fn test_initial_time() {
        let clock = MockClock::new();
        assert_eq!(clock.now(), Timestamp::EPOCH);
    }

    #[test]
    fn test_starting_at() {
        let clock = MockClock::starting_at(Timestamp::EPOCH + secs(42));
        assert_eq!(clock.now(), Timestamp::EPOCH + secs(42));
    }

    #[test]
    fn test_global_instance() {
        TEST_GLOBAL_INSTANCE.advance(secs(123));
        assert!(TEST_GLOBAL_INSTANCE.now() >= Timestamp::EPOCH + secs(123));
    }

    #[test]
    fn test_advance_and_set_time() {
        let clock = MockClock::new();
        clock.advance(secs(12));
        assert_eq!(clock.now(), Timestamp::EPOCH + secs(12));
        clock.set_time(Timestamp::EPOCH + secs(34));
        assert_eq!(clock.now(), Timestamp::EPOCH + secs(34));
        clock.advance(TimeDelta::ZERO);
        assert_eq!(clock.now(), Timestamp::EPOCH + secs(34));
    }

    #[test]
    #[should_panic(expected = "backwards")]
    fn test_set_time_backwards_panics() {
        let clock = MockClock::new();
        clock.advance(secs(10));
        clock.set_time(Timestamp::EPOCH + secs(5));
    }

    #[test]
    #[should_panic(expected = "backwards")]
    fn test_negative_advance_panics() {
        let clock = MockClock::new();
        clock.advance(secs(-1));
    }

    #[test]
    fn test_sleep_until_wakes_on_advance() {
        let clock = Arc::new(MockClock::new());
        let sleeper = {
            let clock = Arc::clone(&clock);
            std::thread::spawn(move || {
                clock.sleep_until(Timestamp::EPOCH + secs(10));
                clock.now()
            })
        };
        clock.advance(secs(4));
        clock.advance(secs(8));
        assert_eq!(sleeper.join().unwrap(), Timestamp::EPOCH + secs(12));
    }

    #[test]
    fn test_deadline_wait_released_by_advance() {
        let clock = Arc::new(MockClock::new());
        let monitor = Arc::new(Monitor::new(()));
        let waiter = {
            let clock = Arc::clone(&clock);
            let monitor = Arc::clone(&monitor);
            std::thread::spawn(move || {
                let mut guard = monitor.lock();
                clock.await_with_deadline(
                    &monitor,
                    &mut guard,
                    Timestamp::EPOCH + secs(10),
                    |_| false,
                )
            })
        };
        clock.advance(secs(12));
        // The waiter observes 12s >= 10s whether or not it had parked yet.
        assert!(!waiter.join().unwrap());
        assert!(clock.state.lock().listeners.is_empty());
    }

    #[test]
    fn test_listener_removed_after_wait() {
        let clock = MockClock::new();
        let monitor = Arc::new(Monitor::new(()));
        let mut guard = monitor.lock();
        // Condition already true: the wait registers and unregisters without
        // parking.
        assert!((&clock as &dyn Clock).await_with_deadline(
            &monitor,
            &mut guard,
            Timestamp::EPOCH + secs(10),
            |_| true,
        ));
        drop(guard);
        assert!(clock.state.lock().listeners.is_empty());
    }
}
