//! Session controller — one participant's live view of a room.
//!
//! ARCHITECTURE
//! ============
//! `Session` owns the client-side replica of the room (tabs, members, log,
//! control holder) and composes the control arbiter, heartbeat monitor,
//! snapshot manager, reference state, and the single timer scheduler.
//!
//! ```text
//! UI command ──► operation ─┐
//! inbound frame ────────────┼──► mutate replica ──► Transport::send
//! timer expiry ─────────────┤                   └─► effects queue ──► driver
//! I/O completion ───────────┘
//! ```
//!
//! DESIGN
//! ======
//! - Synchronous and single-owner. Every method runs to completion; the
//!   async driver (`runtime::run_session`) is the only caller in production.
//! - Time-dependent operations take `now` in a `*_at` variant so tests can
//!   drive timers deterministically.
//! - Work the controller cannot do itself (persistence writes, snapshot
//!   captures, UI updates) is queued as [`SessionEffect`]s and drained by the
//!   driver, which reports results back through `on_persist_result` and
//!   `on_capture_result`.
//! - Optimistic local changes are never rolled back. Authoritative pushes
//!   overwrite the local guess field by field.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here returns an error to the UI. Send failures and error
//! acknowledgements are logged and otherwise treated like success, except a
//! failed join, which ends the session with [`SessionUpdate::NavigateAway`].

mod chat;
mod control;
mod inbound;
mod tabs;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::control::ControlArbiter;
use crate::frame::{Data, Frame};
use crate::heartbeat::{ConnectionStatus, HeartbeatMonitor};
use crate::layout::{Panel, PanelLayout};
use crate::log::EventLog;
use crate::model::{Event, MemberRef, Role, Room, RoomMember, RoomSettings, Tab, TabUpdate};
use crate::reference::{ReferenceError, ReferenceState};
use crate::scheduler::{Scheduler, TimerId};
use crate::snapshot::{SnapshotKey, SnapshotManager, Ticket};
use crate::transport::{JOIN, LEAVE_ROOM, PING, Transport};

/// Color for site administrators who are not on the room roster.
pub const ADMIN_COLOR: &str = "#ffd549";
/// Color for anyone else missing from the roster.
pub const DEFAULT_COLOR: &str = "#f26247";

// =============================================================================
// TYPES
// =============================================================================

/// Who the local member is and how they entered the room.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub user: MemberRef,
    /// Site administrator.
    pub is_admin: bool,
    /// Observing with admin privileges: no join/leave broadcasts, no control.
    pub in_admin_mode: bool,
    /// Temporary room: no join handshake, no snapshots.
    pub temp: bool,
    pub snapshots: bool,
    /// Appended to the log at start.
    pub last_message: Option<Event>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("room {0} has no tabs")]
    NoTabs(String),
}

/// User-visible notice. `Display` renders the text shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    ReferenceWrongTab,
    ReferenceDeleted { label: String },
    ReferenceModified { label: String },
    AdminCannotTakeControl,
    Instructions(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReferenceWrongTab => write!(f, "This reference does not belong to this tab"),
            Self::ReferenceDeleted { label } => write!(f, "The referenced object ({label}) was deleted."),
            Self::ReferenceModified { label } => write!(
                f,
                "Caution! The referenced object ({label}) has been modified since the time of reference."
            ),
            Self::AdminCannotTakeControl => {
                write!(f, "You are in admin mode. Leave admin mode to take control of this room.")
            }
            Self::Instructions(text) => write!(f, "Instructions: {text}"),
        }
    }
}

impl From<ReferenceError> for Notice {
    fn from(err: ReferenceError) -> Self {
        match err {
            ReferenceError::WrongTab => Self::ReferenceWrongTab,
            ReferenceError::Deleted { label } => Self::ReferenceDeleted { label },
        }
    }
}

/// State change the UI should reflect.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Notice(Notice),
    /// The session cannot continue; leave the room.
    NavigateAway,
    LogAppended(Event),
    ControlChanged(Option<String>),
    StatusChanged(ConnectionStatus),
    MembersChanged(Vec<MemberRef>),
    TabAdded(Tab),
}

/// What to do once a persistence write succeeds.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistFollowup {
    ApplyTabUpdate { tab_id: String, update: TabUpdate },
    /// Add one captured view to the tab's snapshot map, keeping the rest.
    InsertSnapshot { tab_id: String, key: String, payload: Value },
}

/// Work for the async driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    Persist { collection: &'static str, id: String, body: Value, followup: PersistFollowup },
    Capture { ticket: Ticket, key: SnapshotKey },
    AbortCapture(Ticket),
    Update(SessionUpdate),
}

/// Request awaiting its acknowledgement.
#[derive(Debug, Clone)]
enum Pending {
    Join,
    /// Append the event once the server has seen it.
    AppendOnAck(Event),
    /// Fire-and-forget broadcast; errors are only logged.
    Broadcast(&'static str),
}

// =============================================================================
// SESSION
// =============================================================================

pub struct Session {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    options: SessionOptions,

    room_id: String,
    room_name: String,
    tabs: Vec<Tab>,
    log: EventLog,
    members: Vec<RoomMember>,
    current_members: Vec<MemberRef>,
    settings: RoomSettings,
    room_instructions: Option<String>,

    control: ControlArbiter,
    role: Role,
    color: String,

    current_tab_id: String,
    current_screen: u32,
    activity_on_other_tabs: Vec<String>,
    creating_new_tab: bool,
    first_tab_loaded: bool,

    references: ReferenceState,
    heartbeat: HeartbeatMonitor,
    snapshots: SnapshotManager,
    scheduler: Scheduler,
    layout: PanelLayout,

    pending: HashMap<Uuid, Pending>,
    effects: VecDeque<SessionEffect>,
    closed: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("room_id", &self.room_id)
            .field("user", &self.options.user.id)
            .field("current_tab_id", &self.current_tab_id)
            .field("controlled_by", &self.control.controlled_by())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Role of `user` in `room`: from the roster, else admin for site admins.
#[must_use]
pub fn resolve_role(room: &Room, user_id: &str, is_admin: bool) -> Role {
    match room.member(user_id) {
        Some(member) if member.role == "facilitator" => Role::Facilitator,
        Some(_) => Role::Participant,
        None if is_admin => Role::Admin,
        None => Role::Participant,
    }
}

/// Color of `user` in `room`: from the roster, else a fixed fallback.
#[must_use]
pub fn resolve_color(room: &Room, user_id: &str, is_admin: bool) -> String {
    match room.member(user_id) {
        Some(member) if !member.color.is_empty() => member.color.clone(),
        None if is_admin => ADMIN_COLOR.to_owned(),
        _ => DEFAULT_COLOR.to_owned(),
    }
}

/// Serialize a payload into frame data. Non-objects become empty data.
pub(crate) fn to_data<T: Serialize>(value: &T) -> Data {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        Ok(_) => Data::new(),
        Err(e) => {
            warn!(error = %e, "payload serialization failed");
            Data::new()
        }
    }
}

impl Session {
    /// Build a session over a loaded room.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoTabs`] if the room has no tab to open.
    pub fn new(
        room: Room,
        options: SessionOptions,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let Some(first_tab) = room.tabs.first() else {
            return Err(SessionError::NoTabs(room.id));
        };
        let current_tab_id = first_tab.id.clone();
        let role = resolve_role(&room, &options.user.id, options.is_admin);
        let color = resolve_color(&room, &options.user.id, options.is_admin);

        Ok(Self {
            heartbeat: HeartbeatMonitor::new(config.latency_threshold, config.heartbeat_watchdog),
            config,
            transport,
            options,
            room_id: room.id,
            room_name: room.name,
            tabs: room.tabs,
            log: EventLog::new(room.log),
            members: room.members,
            current_members: room.current_members,
            settings: room.settings,
            room_instructions: room.instructions,
            control: ControlArbiter::new(room.controlled_by),
            role,
            color,
            current_tab_id,
            current_screen: 0,
            activity_on_other_tabs: Vec::new(),
            creating_new_tab: false,
            first_tab_loaded: false,
            references: ReferenceState::default(),
            snapshots: SnapshotManager::new(),
            scheduler: Scheduler::new(),
            layout: PanelLayout::default(),
            pending: HashMap::new(),
            effects: VecDeque::new(),
            closed: false,
        })
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    /// Seed the reference index, join the room, and arm the heartbeat.
    pub fn start_at(&mut self, now: Instant) {
        self.log.compute_references();
        if let Some(message) = self.options.last_message.take() {
            self.append(message);
        }

        if !self.options.temp && !self.options.in_admin_mode {
            let data = to_data(&serde_json::json!({
                "_id": Uuid::new_v4().to_string(),
                "userId": self.options.user.id,
                "roomId": self.room_id,
                "username": self.options.user.username,
                "roomName": self.room_name,
                "color": self.color,
            }));
            self.send(JOIN, data, Some(Pending::Join));
            if self.closed {
                return;
            }
        }

        self.scheduler
            .schedule(TimerId::HeartbeatTick, self.config.heartbeat_interval, now);
        self.reset_watchdog(now);
        self.take_snapshot_if_needed_at(now);

        info!(
            room_id = %self.room_id,
            user_id = %self.options.user.id,
            role = ?self.role,
            "session started"
        );
    }

    /// Leave the room and release every timer and capture.
    pub fn teardown(&mut self) {
        if self.closed {
            return;
        }
        if !self.options.in_admin_mode {
            let data = to_data(&serde_json::json!({ "roomId": self.room_id, "color": self.color }));
            self.send(LEAVE_ROOM, data, None);
            let me = self.options.user.id.clone();
            self.current_members.retain(|m| m.id != me);
        }
        self.scheduler.cancel_all();
        self.cancel_snapshots();
        self.heartbeat.clear();
        self.pending.clear();
        self.closed = true;
        info!(room_id = %self.room_id, "session torn down");
    }

    pub fn reset_room(&mut self, room: Room) {
        self.reset_room_at(room, Instant::now());
    }

    /// Replace the replica with a freshly loaded copy of the room.
    ///
    /// Control holder, members, tabs, and log are taken from `room`; the
    /// reference index is rebuilt and the idle timer follows the new holder.
    /// The local view stays on the current tab if it still exists, else
    /// falls back to the first one. A room with another id or without tabs
    /// is ignored.
    pub fn reset_room_at(&mut self, room: Room, now: Instant) {
        if self.closed {
            return;
        }
        if room.id != self.room_id {
            warn!(room_id = %self.room_id, other = %room.id, "reset with another room ignored");
            return;
        }
        let Some(first_tab) = room.tabs.first() else {
            warn!(room_id = %self.room_id, "reset with no tabs ignored");
            return;
        };
        if !room.tabs.iter().any(|t| t.id == self.current_tab_id) {
            self.current_tab_id = first_tab.id.clone();
            self.current_screen = 0;
        }
        self.role = resolve_role(&room, &self.options.user.id, self.options.is_admin);
        self.color = resolve_color(&room, &self.options.user.id, self.options.is_admin);

        self.room_name = room.name;
        self.tabs = room.tabs;
        self.log = EventLog::new(room.log);
        self.log.compute_references();
        self.members = room.members;
        self.current_members = room.current_members;
        self.settings = room.settings;
        self.room_instructions = room.instructions;
        self.control = ControlArbiter::new(room.controlled_by);

        let tabs = &self.tabs;
        self.activity_on_other_tabs.retain(|id| tabs.iter().any(|t| &t.id == id));
        self.sync_idle_timer(now);

        info!(
            room_id = %self.room_id,
            controlled_by = ?self.control.controlled_by(),
            tabs = self.tabs.len(),
            "room reset"
        );
        self.emit(SessionUpdate::ControlChanged(self.control.controlled_by().map(str::to_owned)));
        self.emit(SessionUpdate::MembersChanged(self.current_members.clone()));
        self.take_snapshot_if_needed_at(now);
    }

    /// Abandon the session after an unrecoverable failure.
    fn navigate_away(&mut self) {
        self.emit(SessionUpdate::NavigateAway);
        self.scheduler.cancel_all();
        self.cancel_snapshots();
        self.heartbeat.clear();
        self.pending.clear();
        self.closed = true;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // =========================================================================
    // TIMERS
    // =========================================================================

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    pub fn fire_due_timers(&mut self) {
        self.fire_due_timers_at(Instant::now());
    }

    pub fn fire_due_timers_at(&mut self, now: Instant) {
        if self.closed {
            return;
        }
        for id in self.scheduler.take_due(now) {
            debug!(timer = ?id, "timer fired");
            match id {
                TimerId::ControlIdle => self.on_control_idle(now),
                TimerId::HeartbeatTick => self.on_heartbeat_tick(now),
                TimerId::HeartbeatWatchdog => {
                    warn!(room_id = %self.room_id, "no heartbeat response; marking connection error");
                    self.set_status(ConnectionStatus::Error);
                }
                TimerId::ResizeDebounce => self.references.resize_settled(),
                TimerId::SnapshotDebounce => {
                    if let Some((ticket, key)) = self.snapshots.debounce_elapsed() {
                        self.effects.push_back(SessionEffect::Capture { ticket, key });
                    }
                }
            }
        }
    }

    fn on_heartbeat_tick(&mut self, now: Instant) {
        if self.closed {
            return;
        }
        self.scheduler
            .schedule(TimerId::HeartbeatTick, self.config.heartbeat_interval, now);
        if !self.transport.is_connected() {
            self.set_status(ConnectionStatus::Error);
            self.release_if_holding_at(now);
            return;
        }
        if let Some(id) = self.send(PING, Data::new(), None) {
            self.heartbeat.ping_sent(id, now);
        }
    }

    fn reset_watchdog(&mut self, now: Instant) {
        self.scheduler
            .schedule(TimerId::HeartbeatWatchdog, self.config.heartbeat_watchdog, now);
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.heartbeat.set_status(status) {
            self.emit(SessionUpdate::StatusChanged(status));
        }
    }

    // =========================================================================
    // EFFECTS AND EMISSION
    // =========================================================================

    /// Take every queued effect, oldest first.
    pub fn drain_effects(&mut self) -> Vec<SessionEffect> {
        self.effects.drain(..).collect()
    }

    fn emit(&mut self, update: SessionUpdate) {
        self.effects.push_back(SessionEffect::Update(update));
    }

    /// Append to the log and tell the UI.
    fn append(&mut self, event: Event) {
        self.log.append(event.clone());
        self.emit(SessionUpdate::LogAppended(event));
    }

    /// Send a request frame. Returns its id when it was handed to the
    /// transport. A local send failure resolves `pending` as an error ack.
    fn send(&mut self, event: &'static str, data: Data, pending: Option<Pending>) -> Option<Uuid> {
        let frame = Frame::request(event, data)
            .with_room_id(self.room_id.as_str())
            .with_from(self.options.user.id.as_str());
        let id = frame.id;
        if let Some(pending) = pending {
            self.pending.insert(id, pending);
        }
        match self.transport.send(frame) {
            Ok(()) => Some(id),
            Err(e) => {
                warn!(error = %e, event, room_id = %self.room_id, "send failed");
                if let Some(pending) = self.pending.remove(&id) {
                    self.on_ack_error(pending, &e.to_string());
                }
                None
            }
        }
    }

    // =========================================================================
    // LAYOUT
    // =========================================================================

    pub fn toggle_panel(&mut self, panel: Panel) -> bool {
        self.layout.toggle(panel)
    }

    pub fn toggle_simple_chat(&mut self) -> bool {
        self.layout.toggle_simplified_chat()
    }

    // =========================================================================
    // READ ACCESS
    // =========================================================================

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    #[must_use]
    pub fn user(&self) -> &MemberRef {
        &self.options.user
    }

    #[must_use]
    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    #[must_use]
    pub fn tab(&self, tab_id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == tab_id)
    }

    #[must_use]
    pub fn log(&self) -> &[Event] {
        self.log.entries()
    }

    /// Log entries that carry an indexable reference.
    #[must_use]
    pub fn events_with_references(&self) -> &[Event] {
        self.log.references()
    }

    #[must_use]
    pub fn members(&self) -> &[RoomMember] {
        &self.members
    }

    #[must_use]
    pub fn current_members(&self) -> &[MemberRef] {
        &self.current_members
    }

    #[must_use]
    pub fn controlled_by(&self) -> Option<&str> {
        self.control.controlled_by()
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn color(&self) -> &str {
        &self.color
    }

    /// Display color of any roster member.
    #[must_use]
    pub fn member_color(&self, user_id: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|m| m.user.id == user_id)
            .map(|m| m.color.as_str())
    }

    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.heartbeat.status()
    }

    #[must_use]
    pub fn current_tab_id(&self) -> &str {
        &self.current_tab_id
    }

    #[must_use]
    pub fn current_screen(&self) -> u32 {
        self.current_screen
    }

    #[must_use]
    pub fn activity_on_other_tabs(&self) -> &[String] {
        &self.activity_on_other_tabs
    }

    #[must_use]
    pub fn is_creating_new_tab(&self) -> bool {
        self.creating_new_tab
    }

    #[must_use]
    pub fn reference_state(&self) -> &ReferenceState {
        &self.references
    }

    #[must_use]
    pub fn layout(&self) -> &PanelLayout {
        &self.layout
    }

    #[must_use]
    pub fn is_timer_armed(&self, id: TimerId) -> bool {
        self.scheduler.is_scheduled(id)
    }

    #[must_use]
    pub fn armed_timers(&self) -> usize {
        self.scheduler.len()
    }
}

#[cfg(test)]
pub(crate) mod test_helpers;

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
