//! Millisecond clock source injected into a connection.
//!
//! The engine never sleeps or spawns timers.  It reads the current time from
//! a [`Clock`] and the embedding event loop calls
//! [`crate::connection::Connection::notify_clock`] when the deadline reported
//! by [`crate::connection::Connection::next_tick_deadline`] elapses.
//!
//! Timestamps are `u32` milliseconds that wrap; compare them with
//! [`time_diff`], never with `<`.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// A monotonic millisecond clock.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// Signed distance `later − earlier` in wrapping millisecond space.
#[inline]
pub fn time_diff(later: u32, earlier: u32) -> i32 {
    later.wrapping_sub(earlier) as i32
}

/// Wall clock measured from the moment it was created.
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // Truncation is the wrap.
        self.start.elapsed().as_millis() as u32
    }
}

/// Hand-driven clock for deterministic tests and simulations.
///
/// Clones share the same time source, so a test can keep one handle while
/// the connection owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u32>>,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u32) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }

    pub fn get(&self) -> u32 {
        self.now.get()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.get()
    }
}
