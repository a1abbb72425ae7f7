//! # Poll Timers
//!
//! Non-blocking elapsed-time checks for the cooperative poll loop. Every
//! wait in the gateway (inter-frame delay, inter-character gap, response
//! timeout) is expressed as "arm a timer, check it on later polls" so no
//! step ever suspends control flow. `Instant` gives microsecond resolution,
//! which covers both the coarse millisecond timeouts and the fine
//! inter-character timing the RTU line needs.

use std::time::{Duration, Instant};

/// A one-shot timer checked by polling.
///
/// Disarmed timers never report elapsed; re-arming restarts the interval
/// from the moment of the call.
#[derive(Debug, Clone, Copy)]
pub struct PollTimer {
    deadline: Option<Instant>,
}

impl PollTimer {
    /// Create a disarmed timer.
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm the timer to elapse after `duration` from now.
    pub fn arm(&mut self, duration: Duration) {
        self.deadline = Some(Instant::now() + duration);
    }

    /// Disarm the timer without waiting for it to elapse.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Whether the timer is currently armed (elapsed or not).
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Non-blocking check: has the armed interval passed?
    ///
    /// Returns `false` while disarmed. Does not consume the timer; callers
    /// `cancel` or re-`arm` once they have acted on the expiry.
    pub fn elapsed(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

impl Default for PollTimer {
    fn default() -> Self {
        Self::new()
    }
}
