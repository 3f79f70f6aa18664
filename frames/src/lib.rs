//! Room socket codec — protobuf envelopes around JSON event payloads.
//!
//! WIRE FORMAT
//! ===========
//! Every socket message is one `Envelope`:
//!
//! ```text
//! Envelope { id, ts, room_id?, from?, event, payload, body }
//!   body = Emit {}               request or server push
//!        | Ack { parent_id, ok } answer to an earlier emit
//! ```
//!
//! `payload` holds the event data as the text of one JSON object. An empty
//! payload is an empty object. Numbers keep their JSON form, so integer
//! timestamps come back as integers and floats as floats.
//!
//! INVARIANTS
//! ==========
//! A frame's status and parent agree: an emit never has a parent and an
//! acknowledgement always does. [`encode_frame`] refuses frames that break
//! this, and [`decode_frame`] refuses envelopes with no body or an
//! acknowledgement with no parent.

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error returned by [`encode_frame`] and [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to decode protobuf envelope: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("invalid JSON payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("payload must be a JSON object")]
    PayloadNotObject,
    #[error("envelope has neither emit nor ack body")]
    MissingBody,
    #[error("acknowledgement without a parent id")]
    MissingParent,
    #[error("request frame must not carry a parent id")]
    UnexpectedParent,
}

/// Position of a frame in an emit/acknowledge exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Emitted event (either direction).
    Request,
    /// Successful acknowledgement.
    Done,
    /// Failed acknowledgement.
    Error,
}

/// A single message on the room socket.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub id: String,
    /// Request this frame acknowledges. Set exactly when `status` is not
    /// [`Status::Request`].
    pub parent_id: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
    pub room_id: Option<String>,
    pub from: Option<String>,
    /// Event name, e.g. `"TAKE_CONTROL"`.
    pub event: String,
    pub status: Status,
    pub data: Map<String, Value>,
}

/// Encode a frame into envelope bytes.
///
/// # Errors
///
/// Returns [`CodecError::UnexpectedParent`] for a request with a parent,
/// [`CodecError::MissingParent`] for an acknowledgement without one, and
/// [`CodecError::Payload`] if the data cannot be serialized.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    let body = match (frame.status, &frame.parent_id) {
        (Status::Request, None) => Body::Emit(Emit {}),
        (Status::Request, Some(_)) => return Err(CodecError::UnexpectedParent),
        (Status::Done | Status::Error, None) => return Err(CodecError::MissingParent),
        (status, Some(parent_id)) => Body::Ack(Ack { parent_id: parent_id.clone(), ok: status == Status::Done }),
    };
    let payload = if frame.data.is_empty() { Vec::new() } else { serde_json::to_vec(&frame.data)? };

    let envelope = Envelope {
        id: frame.id.clone(),
        ts: frame.ts,
        room_id: frame.room_id.clone(),
        from: frame.from.clone(),
        event: frame.event.clone(),
        payload,
        body: Some(body),
    };
    Ok(envelope.encode_to_vec())
}

/// Decode envelope bytes into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes, [`CodecError::MissingBody`]
/// or [`CodecError::MissingParent`] for an incomplete envelope, and
/// [`CodecError::Payload`] / [`CodecError::PayloadNotObject`] for bad data.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    let envelope = Envelope::decode(bytes)?;
    let (status, parent_id) = match envelope.body {
        None => return Err(CodecError::MissingBody),
        Some(Body::Emit(_)) => (Status::Request, None),
        Some(Body::Ack(ack)) if ack.parent_id.is_empty() => return Err(CodecError::MissingParent),
        Some(Body::Ack(ack)) => (if ack.ok { Status::Done } else { Status::Error }, Some(ack.parent_id)),
    };

    Ok(Frame {
        id: envelope.id,
        parent_id,
        ts: envelope.ts,
        room_id: envelope.room_id,
        from: envelope.from,
        event: envelope.event,
        status,
        data: decode_payload(&envelope.payload)?,
    })
}

fn decode_payload(bytes: &[u8]) -> Result<Map<String, Value>, CodecError> {
    if bytes.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_slice(bytes)? {
        Value::Object(map) => Ok(map),
        _ => Err(CodecError::PayloadNotObject),
    }
}

// =============================================================================
// PROTOBUF MESSAGES
// =============================================================================

#[derive(Clone, PartialEq, Message)]
struct Envelope {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(int64, tag = "2")]
    ts: i64,
    #[prost(string, optional, tag = "3")]
    room_id: Option<String>,
    #[prost(string, optional, tag = "4")]
    from: Option<String>,
    #[prost(string, tag = "5")]
    event: String,
    #[prost(bytes = "vec", tag = "6")]
    payload: Vec<u8>,
    #[prost(oneof = "Body", tags = "7, 8")]
    body: Option<Body>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
enum Body {
    #[prost(message, tag = "7")]
    Emit(Emit),
    #[prost(message, tag = "8")]
    Ack(Ack),
}

#[derive(Clone, PartialEq, Message)]
struct Emit {}

#[derive(Clone, PartialEq, Message)]
struct Ack {
    #[prost(string, tag = "1")]
    parent_id: String,
    #[prost(bool, tag = "2")]
    ok: bool,
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
