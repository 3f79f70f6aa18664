//! Transport — the session's handle on the room socket.
//!
//! ARCHITECTURE
//! ============
//! The session owns an `Arc<dyn Transport>` for outbound frames and receives
//! inbound frames on a channel fed by the concrete transport. Requests that
//! expect an acknowledgement are matched by id: the server answers with a
//! `done`/`error` frame whose `parent_id` is the request id. Connectivity
//! changes arrive in-band as local `connect` / `disconnect` frames so they
//! are ordered with everything else the session sees.
//!
//! ERROR HANDLING
//! ==============
//! `send` only reports local failures (socket down, queue full). The session
//! treats those exactly like an error acknowledgement: logged, not retried.

pub mod ws;

use crate::frame::Frame;

// =============================================================================
// EVENT NAMES
// =============================================================================

pub const JOIN: &str = "JOIN";
pub const LEAVE_ROOM: &str = "LEAVE_ROOM";
pub const SWITCH_TAB: &str = "SWITCH_TAB";
pub const TAKE_CONTROL: &str = "TAKE_CONTROL";
pub const RELEASE_CONTROL: &str = "RELEASE_CONTROL";
pub const SEND_MESSAGE: &str = "SEND_MESSAGE";
pub const NEW_TAB: &str = "NEW_TAB";
pub const PING: &str = "ping";

pub const USER_JOINED: &str = "USER_JOINED";
pub const USER_LEFT: &str = "USER_LEFT";
pub const TOOK_CONTROL: &str = "TOOK_CONTROL";
pub const RELEASED_CONTROL: &str = "RELEASED_CONTROL";
pub const CREATED_TAB: &str = "CREATED_TAB";
pub const RECEIVED_UPDATED_REFERENCES: &str = "RECEIVED_UPDATED_REFERENCES";

/// Local frame: the socket (re)connected.
pub const CONNECT: &str = "connect";
/// Local frame: the socket dropped.
pub const DISCONNECT: &str = "disconnect";

// =============================================================================
// TRAIT
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("outbound queue full")]
    QueueFull,
    #[error("transport closed")]
    Closed,
    #[error("websocket connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),
}

/// Outbound half of the room socket.
pub trait Transport: Send + Sync {
    /// Whether the socket is currently up.
    fn is_connected(&self) -> bool;

    /// Queue `frame` for delivery. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the frame cannot be queued.
    fn send(&self, frame: Frame) -> Result<(), TransportError>;
}

/// Build a local connectivity frame (`connect` / `disconnect`).
#[must_use]
pub fn local_frame(event: &str) -> Frame {
    Frame::request(event, crate::frame::Data::new())
}

// =============================================================================
// TEST HELPERS
// =============================================================================
