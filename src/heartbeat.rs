//! Heartbeat monitor — connection quality from ping round trips.
//!
//! DESIGN
//! ======
//! Two mechanisms feed one status. The periodic tick sends a `ping` when the
//! transport reports connected (or flips to `Error` when it does not) and the
//! pong's round trip is classified against a latency threshold. A slower
//! watchdog, owned by the session's scheduler, catches pings that vanish
//! without the transport noticing.
//!
//! Outstanding pings are tracked here by request id so a late pong is still
//! measured against its own send time.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

/// Connection quality as shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    None,
    Good,
    Bad,
    Error,
}

/// Classify one round trip. A latency equal to the threshold is still `Good`.
#[must_use]
pub fn classify(latency: Duration, threshold: Duration) -> ConnectionStatus {
    if latency > threshold {
        ConnectionStatus::Bad
    } else {
        ConnectionStatus::Good
    }
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    latency_threshold: Duration,
    /// Pings older than this are forgotten.
    stale_after: Duration,
    status: ConnectionStatus,
    outstanding: HashMap<Uuid, Instant>,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new(latency_threshold: Duration, stale_after: Duration) -> Self {
        Self {
            latency_threshold,
            stale_after,
            status: ConnectionStatus::None,
            outstanding: HashMap::new(),
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Record a ping sent at `now`. Drops pings that can no longer matter.
    pub fn ping_sent(&mut self, id: Uuid, now: Instant) {
        let stale_after = self.stale_after;
        self.outstanding
            .retain(|_, sent| now.saturating_duration_since(*sent) < stale_after);
        self.outstanding.insert(id, now);
    }

    /// Whether `id` is an outstanding ping.
    #[must_use]
    pub fn is_ping(&self, id: &Uuid) -> bool {
        self.outstanding.contains_key(id)
    }

    /// Classify the pong for `id`. Returns the round trip when `id` was ours.
    pub fn pong_received(&mut self, id: &Uuid, now: Instant) -> Option<Duration> {
        let sent = self.outstanding.remove(id)?;
        let latency = now.saturating_duration_since(sent);
        self.status = classify(latency, self.latency_threshold);
        Some(latency)
    }

    /// Forget a ping whose acknowledgement failed. Status is left alone.
    pub fn ping_failed(&mut self, id: &Uuid) -> bool {
        self.outstanding.remove(id).is_some()
    }

    /// Set the status directly. Returns whether it changed.
    pub fn set_status(&mut self, status: ConnectionStatus) -> bool {
        let changed = self.status != status;
        self.status = status;
        changed
    }

    pub fn clear(&mut self) {
        self.outstanding.clear();
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}

#[cfg(test)]
#[path = "heartbeat_test.rs"]
mod tests;
