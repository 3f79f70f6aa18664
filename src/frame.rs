//! Frame — the envelope for every room socket message.
//!
//! ARCHITECTURE
//! ============
//! The session emits request frames named after room events (`JOIN`,
//! `TAKE_CONTROL`, `ping`, ...). Events that expect an acknowledgement are
//! answered by the server with a `done` or `error` frame carrying the request
//! id in `parent_id`. Server pushes (`USER_JOINED`, `TOOK_CONTROL`, ...) are
//! plain request frames with no parent.
//!
//! DESIGN
//! ======
//! - Flat data: payload is `Map<String, Value>` keyed by field name.
//! - The session routes on `event` for pushes and on `parent_id` for acks.
//! - Conversion to and from `frames::Frame` happens at the transport edge.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

pub use frames::Status;

/// The universal message type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub from: Option<String>,
    pub event: String,
    pub status: Status,
    pub data: Data,
}

/// Error converting a wire frame into a session frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame id: {0}")]
    InvalidId(String),
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
pub(crate) fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    /// Create a request frame. Entry point for every emitted event.
    pub fn request(event: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            room_id: None,
            from: None,
            event: event.into(),
            status: Status::Request,
            data,
        }
    }

    /// Create a done acknowledgement carrying a result payload.
    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.reply(Status::Done, data)
    }

    /// Create an empty done acknowledgement.
    #[must_use]
    pub fn done(&self) -> Self {
        self.reply(Status::Done, Data::new())
    }

    /// Create an error acknowledgement from a plain string.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(message.into()));
        self.reply(Status::Error, data)
    }

    /// Build a reply frame. Inherits `room_id` and `event`.
    fn reply(&self, status: Status, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: now_ms(),
            room_id: self.room_id.clone(),
            from: None,
            event: self.event.clone(),
            status,
            data,
        }
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }
}

// =============================================================================
// ACCESSORS
// =============================================================================

impl Frame {
    /// Whether this frame acknowledges an earlier request.
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.parent_id.is_some() && self.status != Status::Request
    }

    /// Error message carried by an error acknowledgement.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        if self.status != Status::Error {
            return None;
        }
        self.data.get(FRAME_MESSAGE).and_then(|v| v.as_str())
    }

    /// Payload as a JSON object, for typed deserialization.
    #[must_use]
    pub fn data_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.data.clone().into_iter().collect())
    }
}

// =============================================================================
// WIRE CONVERSION
// =============================================================================

impl From<&Frame> for frames::Frame {
    fn from(frame: &Frame) -> Self {
        Self {
            id: frame.id.to_string(),
            parent_id: frame.parent_id.map(|id| id.to_string()),
            ts: frame.ts,
            room_id: frame.room_id.clone(),
            from: frame.from.clone(),
            event: frame.event.clone(),
            status: frame.status,
            data: frame.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

impl TryFrom<frames::Frame> for Frame {
    type Error = FrameError;

    fn try_from(wire: frames::Frame) -> Result<Self, Self::Error> {
        let id = wire
            .id
            .parse()
            .map_err(|_| FrameError::InvalidId(wire.id.clone()))?;
        let parent_id = match wire.parent_id {
            Some(raw) => Some(raw.parse().map_err(|_| FrameError::InvalidId(raw.clone()))?),
            None => None,
        };
        Ok(Self {
            id,
            parent_id,
            ts: wire.ts,
            room_id: wire.room_id,
            from: wire.from,
            event: wire.event,
            status: wire.status,
            data: wire.data.into_iter().collect(),
        })
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
