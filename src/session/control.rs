//! Control toggling and idle release.

use std::time::Instant;

use tracing::{debug, info};

use super::{Notice, Pending, Session, SessionUpdate, to_data};
use crate::control::{ControlAction, REQUEST_CONTROL_TEXT, released_control_text, took_control_text};
use crate::model::{Event, MessageType};
use crate::scheduler::TimerId;
use crate::transport::{RELEASE_CONTROL, SEND_MESSAGE, TAKE_CONTROL};

impl Session {
    pub fn toggle_control(&mut self, auto: bool) {
        self.toggle_control_at(auto, Instant::now());
    }

    /// Take, release, or request control depending on who holds it.
    pub fn toggle_control_at(&mut self, auto: bool, now: Instant) {
        let me = self.options.user.id.clone();
        let action = self.control.decide(&me, self.options.in_admin_mode, auto);
        debug!(room_id = %self.room_id, ?action, auto, "toggle control");

        match action {
            ControlAction::Take => {
                self.control.take(&me);
                self.references.stop_referencing();
                self.scheduler.schedule(TimerId::ControlIdle, self.config.control_idle, now);

                let event = Event::system(&me, took_control_text(&self.options.user.username), MessageType::TookControl)
                    .in_room(self.room_id.as_str(), self.color.as_str());
                self.append(event.clone());
                self.emit(SessionUpdate::ControlChanged(Some(me)));
                self.send(TAKE_CONTROL, to_data(&event), Some(Pending::Broadcast(TAKE_CONTROL)));
            }
            ControlAction::Release { auto } => {
                // Capture the view before it changes hands.
                self.request_snapshot_at(now);

                let text = released_control_text(&self.options.user.username, auto);
                let event = Event::system(&me, text, MessageType::ReleasedControl)
                    .in_room(self.room_id.as_str(), self.color.as_str());
                self.append(event.clone());
                self.control.release();
                self.emit(SessionUpdate::ControlChanged(None));
                self.send(RELEASE_CONTROL, to_data(&event), Some(Pending::Broadcast(RELEASE_CONTROL)));
                self.scheduler.cancel(TimerId::ControlIdle);
                info!(room_id = %self.room_id, auto, "released control");
            }
            ControlAction::AskHolder { holder } => {
                debug!(room_id = %self.room_id, %holder, "asking holder for control");
                let message = Event::chat(self.options.user.clone(), REQUEST_CONTROL_TEXT)
                    .in_room(self.room_id.as_str(), self.color.as_str());
                self.send(SEND_MESSAGE, to_data(&message), Some(Pending::AppendOnAck(message)));
            }
            ControlAction::AdminBlocked => {
                self.emit(SessionUpdate::Notice(Notice::AdminCannotTakeControl));
            }
            ControlAction::Noop => {}
        }
    }

    pub fn reset_idle_timer(&mut self) {
        self.reset_idle_timer_at(Instant::now());
    }

    /// Push the idle release back while the local member holds control.
    pub fn reset_idle_timer_at(&mut self, now: Instant) {
        if self.control.is_held_by(&self.options.user.id) {
            self.scheduler.schedule(TimerId::ControlIdle, self.config.control_idle, now);
        }
    }

    pub(super) fn on_control_idle(&mut self, now: Instant) {
        info!(room_id = %self.room_id, "control idle; releasing");
        self.toggle_control_at(true, now);
    }

    /// Automatic release when the connection is gone.
    pub(super) fn release_if_holding_at(&mut self, now: Instant) {
        if self.control.is_held_by(&self.options.user.id) {
            self.toggle_control_at(true, now);
        }
    }

    /// After control changed under us: the idle timer runs exactly while
    /// the local member holds control.
    pub(super) fn sync_idle_timer(&mut self, now: Instant) {
        if !self.control.is_held_by(&self.options.user.id) {
            self.scheduler.cancel(TimerId::ControlIdle);
        } else if !self.scheduler.is_scheduled(TimerId::ControlIdle) {
            self.scheduler.schedule(TimerId::ControlIdle, self.config.control_idle, now);
        }
    }
}
