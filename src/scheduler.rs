//! Scheduler — every session timer in one place.
//!
//! DESIGN
//! ======
//! Timers are deadlines keyed by a closed [`TimerId`] set; scheduling an id
//! that is already armed replaces its deadline. Nothing runs on its own: the
//! session driver sleeps until [`Scheduler::next_deadline`] and then hands
//! [`Scheduler::take_due`] back to the controller. Teardown is a single
//! [`Scheduler::cancel_all`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Named timers owned by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerId {
    /// Auto-release of held control after inactivity.
    ControlIdle,
    /// Periodic heartbeat ping.
    HeartbeatTick,
    /// No-response watchdog.
    HeartbeatWatchdog,
    /// Restore referencing once window resizing settles.
    ResizeDebounce,
    /// Start a pending snapshot capture.
    SnapshotDebounce,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    deadlines: HashMap<TimerId, Instant>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `id` to fire `delay` after `now`, replacing any earlier deadline.
    pub fn schedule(&mut self, id: TimerId, delay: Duration, now: Instant) {
        self.deadlines.insert(id, now + delay);
    }

    /// Disarm `id`. Returns whether it was armed.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.deadlines.remove(&id).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.deadlines.clear();
    }

    #[must_use]
    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    /// Earliest armed deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Disarm and return every timer due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerId> {
        let mut due: Vec<(Instant, TimerId)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, at)| (*at, *id))
            .collect();
        due.sort();
        for (_, id) in &due {
            self.deadlines.remove(id);
        }
        due.into_iter().map(|(_, id)| id).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod tests;
