//! Clock abstraction with virtual-time support for the cadence scheduler.
//!
//! This crate provides the time primitives and the pluggable clock used by
//! `cadence-scheduler`. Key features:
//!
//! - **Signed time primitives** - [`Timestamp`] and [`TimeDelta`] with the
//!   sentinel values the scheduler's heap manipulation relies on
//! - **Capability clock** - the [`Clock`] trait, consumed as `Arc<dyn Clock>`
//! - **Real time** - [`RealClock`], backed by the OS wall clock
//! - **Virtual time** - [`MockClock`], advanced only by explicit API calls
//! - **Deadline waits** - [`ClockExt::await_with_deadline`], a condition wait
//!   bounded by a deadline measured against the injected clock
//!
//! # Deadline waits under virtual time
//!
//! An OS timed condition wait consults the OS clock and cannot be re-armed
//! when virtual time jumps, so a mock clock cannot be bolted onto
//! `Condvar::wait_until` after the fact. Instead, every deadline wait
//! registers its [`Monitor`] as a [`TimeListener`] with the clock for the
//! duration of the wait:
//!
//! ```text
//!   waiter thread                      mock clock             test thread
//!   -------------                      ----------             -----------
//!   lock monitor
//!   add_listener(monitor) ---------->  remember listener
//!   loop {
//!     condition met?  -> return
//!     now >= deadline? -> return
//!     park on condvar                                         advance(delta)
//!   }                                  update virtual time <--'
//!                                      lock+unlock monitor
//!              wake  <---------------  notify condvar
//! ```
//!
//! The listener's lock/unlock of the caller's monitor is what makes the wake
//! race-free: a waiter that has evaluated its predicate but not yet parked
//! still holds the monitor's mutex, so the notification cannot slip into
//! that window. A clock whose time flows on its own ([`RealClock`]) accepts
//! no listeners and deadline waits against it fall back to OS timed waits.

#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod clock;
pub mod mock;
pub mod monitor;
pub mod time;

pub use clock::{Clock, ClockExt, ListenerId, RealClock, TimeListener};
pub use mock::MockClock;
pub use monitor::Monitor;
pub use time::{TimeDelta, Timestamp};
