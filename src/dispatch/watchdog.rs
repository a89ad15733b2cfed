//! Shared deadline timer used to detect stalled runs.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A watchdog timer shared by all worker loops in one run phase.
///
/// Any loop making progress calls [`reset`](Watchdog::reset); the
/// coordinator's join operation consults [`expired`](Watchdog::expired)
/// and [`remaining`](Watchdog::remaining) to decide how long to keep
/// waiting. A watchdog constructed with `None` never expires.
pub struct Watchdog {
    timeout: Option<Duration>,
    last_reset: Mutex<Instant>,
}

impl Watchdog {
    /// Creates a watchdog with the given timeout, or without a deadline.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            last_reset: Mutex::new(Instant::now()),
        }
    }

    /// Records progress, pushing the deadline out by the full timeout.
    pub fn reset(&self) {
        *self.last_reset.lock().unwrap() = Instant::now();
    }

    /// Returns true if no progress was recorded within the timeout.
    pub fn expired(&self) -> bool {
        match self.timeout {
            Some(timeout) => self.last_reset.lock().unwrap().elapsed() >= timeout,
            None => false,
        }
    }

    /// Time left until the deadline, or `None` if there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.timeout
            .map(|timeout| timeout.saturating_sub(self.last_reset.lock().unwrap().elapsed()))
    }
}
