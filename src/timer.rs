//! Restartable one-shot timers
//!
//! Timers are plain deadlines. Nothing fires on its own: the owner calls
//! [`Timer::take_expired`] from its `tick` with the current instant.

use std::time::{Duration, Instant};

/// One-shot timer that can be re-armed after it fires
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm (or re-arm) the timer to expire `interval` after `now`
    ///
    /// An interval past the range of `Instant` leaves the timer stopped.
    pub fn start(&mut self, now: Instant, interval: Duration) {
        self.deadline = now.checked_add(interval);
        if self.deadline.is_none() {
            log::warn!("Timer interval {:?} out of range, timer not armed", interval);
        }
    }

    /// Cancel the timer
    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// The instant the timer expires at, if armed
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until expiry, zero once the deadline has passed
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Returns true exactly once when the deadline has been reached
    pub fn take_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
