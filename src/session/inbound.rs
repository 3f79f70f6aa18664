//! Inbound frames: server pushes, acknowledgements, and local connectivity.

use std::time::Instant;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::{Pending, Session, SessionUpdate};
use crate::frame::{Frame, Status};
use crate::model::{Event, MemberRef, Tab};
use crate::transport::{
    CONNECT, CREATED_TAB, DISCONNECT, RECEIVED_UPDATED_REFERENCES, RELEASED_CONTROL, TOOK_CONTROL, USER_JOINED,
    USER_LEFT,
};

/// `USER_JOINED` / `USER_LEFT` payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Presence {
    #[serde(default)]
    current_members: Vec<MemberRef>,
    message: Option<Event>,
    #[serde(default)]
    released_control: bool,
}

/// `CREATED_TAB` payload: the tab itself plus the announcement.
#[derive(Debug, Deserialize)]
struct CreatedTab {
    #[serde(flatten)]
    tab: Tab,
    message: Option<Event>,
}

#[derive(Debug, Deserialize)]
struct UpdatedReferences {
    #[serde(default)]
    events: Vec<Event>,
}

/// `JOIN` acknowledgement payload.
#[derive(Debug, Deserialize)]
struct JoinAck {
    room: JoinedRoom,
    message: Option<Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinedRoom {
    #[serde(default)]
    current_members: Vec<MemberRef>,
}

fn parse<T: DeserializeOwned>(frame: &Frame) -> Option<T> {
    match serde_json::from_value(frame.data_value()) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, event = %frame.event, "malformed payload; ignoring");
            None
        }
    }
}

impl Session {
    pub fn handle_frame(&mut self, frame: Frame) {
        self.handle_frame_at(frame, Instant::now());
    }

    /// Fold one inbound frame into the replica.
    pub fn handle_frame_at(&mut self, frame: Frame, now: Instant) {
        if self.closed {
            debug!(event = %frame.event, "session closed; dropping frame");
            return;
        }
        if frame.is_ack() {
            self.handle_ack(&frame, now);
            return;
        }

        match frame.event.as_str() {
            USER_JOINED => {
                let Some(presence) = parse::<Presence>(&frame) else { return };
                self.set_current_members(presence.current_members);
                if let Some(message) = presence.message {
                    self.append(message);
                }
            }
            USER_LEFT => {
                let Some(presence) = parse::<Presence>(&frame) else { return };
                if presence.released_control {
                    self.control.observe_released();
                    self.sync_idle_timer(now);
                    self.emit(SessionUpdate::ControlChanged(None));
                }
                self.set_current_members(presence.current_members);
                if let Some(message) = presence.message {
                    self.append(message);
                }
            }
            TOOK_CONTROL => {
                let Some(message) = parse::<Event>(&frame) else { return };
                let holder = message.user.id.clone();
                self.append(message);
                self.control.observe_taken(holder.as_str());
                self.sync_idle_timer(now);
                self.emit(SessionUpdate::ControlChanged(Some(holder)));
            }
            RELEASED_CONTROL => {
                let Some(message) = parse::<Event>(&frame) else { return };
                self.append(message);
                self.control.observe_released();
                self.sync_idle_timer(now);
                self.emit(SessionUpdate::ControlChanged(None));
            }
            CREATED_TAB => {
                let Some(created) = parse::<CreatedTab>(&frame) else { return };
                if let Some(message) = created.message {
                    self.append(message);
                }
                self.add_tab(created.tab);
            }
            RECEIVED_UPDATED_REFERENCES => {
                let Some(updated) = parse::<UpdatedReferences>(&frame) else { return };
                self.update_references(updated.events);
            }
            CONNECT => {
                info!(room_id = %self.room_id, "transport connected");
                self.reset_watchdog(now);
            }
            DISCONNECT => {
                warn!(room_id = %self.room_id, "transport disconnected");
                self.release_if_holding_at(now);
            }
            other => debug!(event = %other, "unhandled inbound event"),
        }
    }

    fn set_current_members(&mut self, members: Vec<MemberRef>) {
        self.current_members.clone_from(&members);
        self.emit(SessionUpdate::MembersChanged(members));
    }

    fn handle_ack(&mut self, frame: &Frame, now: Instant) {
        let Some(parent_id) = frame.parent_id else { return };

        if let Some(pending) = self.pending.remove(&parent_id) {
            match frame.status {
                Status::Error => {
                    let message = frame.error_message().unwrap_or("unknown error");
                    self.on_ack_error(pending, message);
                }
                _ => self.on_ack_done(pending, frame, now),
            }
            return;
        }

        if self.heartbeat.is_ping(&parent_id) {
            if frame.status == Status::Error {
                self.heartbeat.ping_failed(&parent_id);
                warn!(error = frame.error_message().unwrap_or("unknown error"), "ping failed");
                return;
            }
            let before = self.heartbeat.status();
            if let Some(latency) = self.heartbeat.pong_received(&parent_id, now) {
                debug!(?latency, "heartbeat");
                let status = self.heartbeat.status();
                if status != before {
                    self.emit(SessionUpdate::StatusChanged(status));
                }
                self.reset_watchdog(now);
            }
            return;
        }

        debug!(%parent_id, event = %frame.event, "acknowledgement for unknown request");
    }

    fn on_ack_done(&mut self, pending: Pending, frame: &Frame, now: Instant) {
        match pending {
            Pending::Join => {
                let Some(ack) = parse::<JoinAck>(frame) else { return };
                self.set_current_members(ack.room.current_members);
                if let Some(message) = ack.message {
                    self.append(message);
                }
                self.reset_watchdog(now);
                info!(room_id = %self.room_id, "joined room");
            }
            Pending::AppendOnAck(event) => self.append(event),
            Pending::Broadcast(_) => {}
        }
    }

    /// Error acknowledgement or local send failure.
    pub(super) fn on_ack_error(&mut self, pending: Pending, message: &str) {
        match pending {
            Pending::Join => {
                warn!(room_id = %self.room_id, error = %message, "join failed; leaving room");
                self.navigate_away();
            }
            Pending::AppendOnAck(event) => {
                warn!(room_id = %self.room_id, error = %message, "broadcast failed");
                self.append(event);
            }
            Pending::Broadcast(event) => {
                warn!(room_id = %self.room_id, error = %message, event, "broadcast failed");
            }
        }
    }
}
