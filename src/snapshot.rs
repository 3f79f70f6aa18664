//! Snapshot manager — debounced captures of the active tab and screen.
//!
//! DESIGN
//! ======
//! At most one capture is live. A request first sits behind the debounce
//! timer as `pending`, then becomes `in_flight` while the capturer runs.
//! Every request gets a fresh ticket; a new request supersedes whatever is
//! pending or in flight, and a finished capture is accepted only when its
//! ticket is still the in-flight one. A superseded capture can therefore
//! never be written, even if its task was not aborted in time.
//!
//! The manager never holds a copy of the tab's snapshot map. The session
//! merges an accepted payload into the map as it stands when the capture
//! finishes, under the `"<tab>:<screen>"` key, so captures of other screens
//! that landed in the meantime are kept.

use std::fmt;

use serde_json::{Map, Value};

/// Identifies one captured view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub tab_id: String,
    /// Screen number within an activity tab; always 0 for single-screen tabs.
    pub screen: u32,
}

impl SnapshotKey {
    pub fn new(tab_id: impl Into<String>, screen: u32) -> Self {
        Self { tab_id: tab_id.into(), screen }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tab_id, self.screen)
    }
}

/// Monotonic capture id.
pub type Ticket = u64;

/// Failure reported by a [`SnapshotCapturer`].
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture surface unavailable: {0}")]
    Unavailable(String),
    #[error("capture failed: {0}")]
    Failed(String),
}

/// Produces the opaque visual payload for a view.
#[async_trait::async_trait]
pub trait SnapshotCapturer: Send + Sync {
    /// Capture the view identified by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError`] when nothing could be captured.
    async fn capture(&self, key: &SnapshotKey) -> Result<Value, CaptureError>;
}

#[derive(Debug, Clone, PartialEq)]
struct Capture {
    ticket: Ticket,
    key: SnapshotKey,
}

/// A capture accepted by the manager, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedCapture {
    pub key: SnapshotKey,
    pub payload: Value,
}

#[derive(Debug, Default)]
pub struct SnapshotManager {
    next_ticket: Ticket,
    pending: Option<Capture>,
    in_flight: Option<Capture>,
}

impl SnapshotManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `previous` already holds a capture for `key`.
    #[must_use]
    pub fn get_snapshot(key: &SnapshotKey, previous: &Map<String, Value>) -> bool {
        previous.contains_key(&key.to_string())
    }

    /// Request a capture of `key`. Supersedes any pending or in-flight
    /// capture; returns the in-flight ticket the caller must abort.
    pub fn take_snapshot(&mut self, key: SnapshotKey) -> Option<Ticket> {
        let superseded = self.cancel_snapshots();
        self.next_ticket += 1;
        self.pending = Some(Capture { ticket: self.next_ticket, key });
        superseded
    }

    /// Debounce elapsed: promote the pending request. Returns what to capture.
    pub fn debounce_elapsed(&mut self) -> Option<(Ticket, SnapshotKey)> {
        let capture = self.pending.take()?;
        let started = (capture.ticket, capture.key.clone());
        self.in_flight = Some(capture);
        Some(started)
    }

    /// A capture finished. Accepted only if `ticket` is still in flight.
    pub fn captured(&mut self, ticket: Ticket, payload: Value) -> Option<CompletedCapture> {
        if self.in_flight.as_ref().map(|c| c.ticket) != Some(ticket) {
            return None;
        }
        let Capture { key, .. } = self.in_flight.take()?;
        Some(CompletedCapture { key, payload })
    }

    /// A capture failed. Returns whether it was the live one.
    pub fn capture_failed(&mut self, ticket: Ticket) -> bool {
        if self.in_flight.as_ref().map(|c| c.ticket) == Some(ticket) {
            self.in_flight = None;
            return true;
        }
        false
    }

    /// Drop the pending request and forget the in-flight one. Returns the
    /// in-flight ticket the caller must abort.
    pub fn cancel_snapshots(&mut self) -> Option<Ticket> {
        self.pending = None;
        self.in_flight.take().map(|c| c.ticket)
    }

    #[must_use]
    pub fn pending_key(&self) -> Option<&SnapshotKey> {
        self.pending.as_ref().map(|c| &c.key)
    }

    #[must_use]
    pub fn in_flight_key(&self) -> Option<&SnapshotKey> {
        self.in_flight.as_ref().map(|c| &c.key)
    }
}

#[cfg(test)]
#[path = "snapshot_test.rs"]
mod tests;
