//! Tabs, screens, instructions, and snapshots.

use std::time::Instant;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{Notice, PersistFollowup, Pending, Session, SessionEffect, SessionUpdate, to_data};
use crate::model::{Event, MessageType, Role, Tab, TabUpdate};
use crate::persistence::PersistenceError;
use crate::reference::ClearOptions;
use crate::scheduler::TimerId;
use crate::snapshot::{CaptureError, SnapshotKey, SnapshotManager, Ticket};
use crate::transport::{NEW_TAB, SWITCH_TAB};

const TABS: &str = "tabs";

impl Session {
    // =========================================================================
    // TAB SWITCHING
    // =========================================================================

    pub fn change_tab(&mut self, tab_id: &str) {
        self.change_tab_at(tab_id, Instant::now());
    }

    /// Open another tab and announce it. Unknown ids are ignored.
    pub fn change_tab_at(&mut self, tab_id: &str, now: Instant) {
        let Some(tab) = self.tab(tab_id) else {
            warn!(room_id = %self.room_id, %tab_id, "change to unknown tab ignored");
            return;
        };
        let text = format!("{} switched to {}", self.options.user.username, tab.name);

        self.references.clear_reference(ClearOptions::default());
        let event = Event::system(&self.options.user.id, text, MessageType::SwitchTab)
            .in_room(self.room_id.as_str(), self.color.as_str());
        self.send(SWITCH_TAB, to_data(&event), Some(Pending::AppendOnAck(event)));

        self.current_tab_id = tab_id.to_owned();
        self.current_screen = 0;
        self.clear_tab_activity(tab_id);
        self.check_instructions();
        self.take_snapshot_if_needed_at(now);
    }

    /// The first tab's surface finished loading.
    pub fn set_first_tab_loaded(&mut self) {
        if self.first_tab_loaded {
            return;
        }
        self.first_tab_loaded = true;
        self.check_instructions();
    }

    pub fn set_screen(&mut self, screen: u32) {
        self.set_screen_at(screen, Instant::now());
    }

    /// Track the visible screen of a multi-screen tab.
    pub fn set_screen_at(&mut self, screen: u32, now: Instant) {
        let has_screens = self.tab(&self.current_tab_id).is_some_and(|t| t.tab_type.has_screens());
        if !has_screens {
            debug!(%screen, "screen change on single-screen tab ignored");
            return;
        }
        self.current_screen = screen;
        self.take_snapshot_if_needed_at(now);
    }

    // =========================================================================
    // TAB ACTIVITY
    // =========================================================================

    /// Badge a tab with unseen activity.
    pub fn add_tab_activity(&mut self, tab_id: &str) {
        if tab_id != self.current_tab_id && !self.activity_on_other_tabs.iter().any(|t| t == tab_id) {
            self.activity_on_other_tabs.push(tab_id.to_owned());
        }
    }

    pub fn clear_tab_activity(&mut self, tab_id: &str) {
        self.activity_on_other_tabs.retain(|t| t != tab_id);
    }

    // =========================================================================
    // TAB CREATION
    // =========================================================================

    /// Open the new-tab flow if the local member may create tabs.
    pub fn begin_new_tab(&mut self) -> bool {
        let allowed = self.role == Role::Facilitator || self.settings.participants_can_create_tabs;
        if allowed {
            self.creating_new_tab = true;
        }
        allowed
    }

    pub fn cancel_new_tab(&mut self) {
        self.creating_new_tab = false;
    }

    /// Announce a tab created through the REST API.
    pub fn emit_new_tab(&mut self, tab: Tab, mut message: Event) {
        self.creating_new_tab = false;
        message.color = Some(self.color.clone());

        let mut data = to_data(&tab);
        data.insert("message".into(), serde_json::to_value(&message).unwrap_or(Value::Null));
        self.send(NEW_TAB, data, Some(Pending::AppendOnAck(message)));
        self.add_tab(tab);
    }

    pub(super) fn add_tab(&mut self, tab: Tab) {
        if self.tab(&tab.id).is_some() {
            debug!(tab_id = %tab.id, "tab already known");
            return;
        }
        info!(room_id = %self.room_id, tab_id = %tab.id, "tab added");
        self.tabs.push(tab.clone());
        self.emit(SessionUpdate::TabAdded(tab));
    }

    // =========================================================================
    // TAB UPDATES
    // =========================================================================

    /// Apply a partial update to a local tab.
    pub fn update_tab(&mut self, tab_id: &str, update: &TabUpdate) {
        match self.tabs.iter_mut().find(|t| t.id == tab_id) {
            Some(tab) => tab.apply(update),
            None => warn!(%tab_id, "update for unknown tab ignored"),
        }
    }

    /// Entering or leaving admin mode while in a room ends the session.
    pub fn set_admin_mode(&mut self, in_admin_mode: bool) {
        if self.options.in_admin_mode == in_admin_mode {
            return;
        }
        self.options.in_admin_mode = in_admin_mode;
        info!(room_id = %self.room_id, in_admin_mode, "admin mode changed; leaving room");
        self.navigate_away();
    }

    /// Show the current tab's instructions to a first-time or returning
    /// visitor who has not seen the latest text, and record the visit.
    fn check_instructions(&mut self) {
        let me = self.options.user.id.clone();
        let Some(index) = self.tabs.iter().position(|t| t.id == self.current_tab_id) else {
            return;
        };
        let tab = &self.tabs[index];
        let instructions = match &tab.instructions {
            Some(text) if !text.is_empty() => text.clone(),
            _ if index == 0 => match &self.room_instructions {
                Some(text) if !text.is_empty() => text.clone(),
                _ => return,
            },
            _ => return,
        };

        let mut since = tab.visitors_since_instructions_updated.clone();
        let update = if tab.visitors.contains(&me) {
            if since.contains(&me) {
                return;
            }
            since.push(me.clone());
            TabUpdate { visitors_since_instructions_updated: Some(since), ..TabUpdate::default() }
        } else {
            let mut visitors = tab.visitors.clone();
            visitors.push(me.clone());
            since.push(me.clone());
            TabUpdate {
                visitors: Some(visitors),
                visitors_since_instructions_updated: Some(since),
                ..TabUpdate::default()
            }
        };

        let tab_id = tab.id.clone();
        self.emit(SessionUpdate::Notice(Notice::Instructions(instructions)));
        self.effects.push_back(SessionEffect::Persist {
            collection: TABS,
            id: tab_id.clone(),
            body: json!({ "newVisitor": me }),
            followup: PersistFollowup::ApplyTabUpdate { tab_id, update },
        });
    }

    /// Report the outcome of a persistence write.
    pub fn on_persist_result(&mut self, followup: PersistFollowup, result: Result<(), PersistenceError>) {
        if self.closed {
            return;
        }
        match (followup, result) {
            (PersistFollowup::ApplyTabUpdate { tab_id, update }, Ok(())) => self.update_tab(&tab_id, &update),
            (PersistFollowup::InsertSnapshot { tab_id, key, payload }, Ok(())) => {
                match self.tabs.iter_mut().find(|t| t.id == tab_id) {
                    Some(tab) => {
                        tab.snapshot.insert(key, payload);
                    }
                    None => warn!(%tab_id, "snapshot for unknown tab ignored"),
                }
            }
            (PersistFollowup::ApplyTabUpdate { tab_id, .. } | PersistFollowup::InsertSnapshot { tab_id, .. }, Err(e)) => {
                warn!(error = %e, %tab_id, "tab write failed");
            }
        }
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    fn snapshots_enabled(&self) -> bool {
        self.options.snapshots && !self.options.temp
    }

    /// Key of the view currently on screen.
    #[must_use]
    pub fn snapshot_key(&self) -> SnapshotKey {
        SnapshotKey::new(self.current_tab_id.as_str(), self.current_screen)
    }

    /// Whether the current tab already holds a capture for `key`.
    #[must_use]
    pub fn get_snapshot(&self, key: &SnapshotKey) -> bool {
        self.tab(&key.tab_id)
            .is_some_and(|t| SnapshotManager::get_snapshot(key, &t.snapshot))
    }

    pub(super) fn take_snapshot_if_needed_at(&mut self, now: Instant) {
        if !self.snapshots_enabled() {
            return;
        }
        let key = self.snapshot_key();
        if !self.get_snapshot(&key) {
            self.request_snapshot_at(now);
        }
    }

    /// Capture the current view after the debounce, superseding any other.
    pub(super) fn request_snapshot_at(&mut self, now: Instant) {
        if !self.snapshots_enabled() {
            return;
        }
        let key = self.snapshot_key();
        if let Some(ticket) = self.snapshots.take_snapshot(key) {
            self.effects.push_back(SessionEffect::AbortCapture(ticket));
        }
        self.scheduler
            .schedule(TimerId::SnapshotDebounce, self.config.snapshot_debounce, now);
    }

    /// Drop any pending or in-flight capture.
    pub fn cancel_snapshots(&mut self) {
        self.scheduler.cancel(TimerId::SnapshotDebounce);
        if let Some(ticket) = self.snapshots.cancel_snapshots() {
            self.effects.push_back(SessionEffect::AbortCapture(ticket));
        }
    }

    /// Report the outcome of a capture started by a `Capture` effect.
    pub fn on_capture_result(&mut self, ticket: Ticket, result: Result<Value, CaptureError>) {
        if self.closed {
            return;
        }
        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                if self.snapshots.capture_failed(ticket) {
                    warn!(error = %e, ticket, "snapshot capture failed");
                }
                return;
            }
        };
        let Some(done) = self.snapshots.captured(ticket, payload) else {
            debug!(ticket, "stale snapshot discarded");
            return;
        };
        // Merge into the map as it is now; other screens may have landed
        // since this capture was requested.
        let tab_id = done.key.tab_id.clone();
        let key = done.key.to_string();
        let mut snapshot = self.tab(&tab_id).map(|t| t.snapshot.clone()).unwrap_or_default();
        snapshot.insert(key.clone(), done.payload.clone());
        self.effects.push_back(SessionEffect::Persist {
            collection: TABS,
            id: tab_id.clone(),
            body: json!({ "snapshot": snapshot }),
            followup: PersistFollowup::InsertSnapshot { tab_id, key, payload: done.payload },
        });
    }
}
