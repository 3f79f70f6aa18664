use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use super::*;
use crate::model::test_helpers::room;
use crate::snapshot::{CaptureError, SnapshotCapturer};
use crate::transport::test_helpers::RecordingTransport;

/// Options for roster member `user_id` (username equals id).
#[must_use]
pub fn options(user_id: &str) -> SessionOptions {
    SessionOptions { user: MemberRef::new(user_id, user_id), ..SessionOptions::default() }
}

/// Session over the standard test room, not yet started.
#[must_use]
pub fn session_with(room: Room, options: SessionOptions) -> (Session, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let session = Session::new(room, options, transport.clone(), SessionConfig::default())
        .expect("test room has tabs");
    (session, transport)
}

/// Started session for `user_id` with the join acknowledged.
#[must_use]
pub fn joined(user_id: &str, now: Instant) -> (Session, Arc<RecordingTransport>) {
    let (mut session, transport) = session_with(room(), options(user_id));
    session.start_at(now);
    let join = transport
        .sent_named(JOIN)
        .pop()
        .expect("join sent");
    let ack = join.done_with(to_data(&serde_json::json!({
        "room": { "currentMembers": [{ "_id": user_id, "username": user_id }] },
    })));
    session.handle_frame_at(ack, now);
    transport.take();
    session.drain_effects();
    (session, transport)
}

/// Acknowledge `frame` successfully.
pub fn ack(session: &mut Session, frame: &Frame, now: Instant) {
    session.handle_frame_at(frame.done(), now);
}

/// UI updates among `effects`.
#[must_use]
pub fn updates(effects: &[SessionEffect]) -> Vec<SessionUpdate> {
    effects
        .iter()
        .filter_map(|e| match e {
            SessionEffect::Update(update) => Some(update.clone()),
            _ => None,
        })
        .collect()
}

/// Notices among `effects`.
#[must_use]
pub fn notices(effects: &[SessionEffect]) -> Vec<Notice> {
    updates(effects)
        .into_iter()
        .filter_map(|u| match u {
            SessionUpdate::Notice(n) => Some(n),
            _ => None,
        })
        .collect()
}

/// Inbound push frame with an object payload.
#[must_use]
pub fn push(event: &str, data: &Value) -> Frame {
    Frame::request(event, to_data(data))
}

#[must_use]
pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Capturer that returns a fixed payload after an optional delay and
/// records the keys it was asked for.
#[derive(Debug, Default)]
pub struct ScriptedCapturer {
    pub delay: Duration,
    pub fail: bool,
    pub calls: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl SnapshotCapturer for ScriptedCapturer {
    async fn capture(&self, key: &SnapshotKey) -> Result<Value, CaptureError> {
        self.calls.lock().unwrap().push(key.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(CaptureError::Failed("scripted".into()));
        }
        Ok(Value::String(format!("image:{key}")))
    }
}
