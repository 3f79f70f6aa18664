//! Session driver — the async loop that owns a [`Session`].
//!
//! DESIGN
//! ======
//! One task, one `select!` loop over four sources:
//! - inbound frames from the transport
//! - UI commands
//! - the session's next timer deadline
//! - completions of persistence writes and snapshot captures
//!
//! After every step the driver drains the session's effects: persistence
//! writes and captures are spawned as tasks that report back through the
//! completion channel, superseded captures are aborted, and UI updates are
//! forwarded with `try_send`.
//!
//! The clock is read from `tokio::time` so paused-time tests drive the
//! controller's timers deterministically.
//!
//! LIFECYCLE
//! =========
//! 1. `start` the session (join, heartbeat)
//! 2. loop until `Leave`, the command channel closes, or the session
//!    navigates away
//! 3. `teardown`, abort in-flight captures, return the session

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::frame::Frame;
use crate::layout::Panel;
use crate::model::{Coords, Event, Reference, Room, Tab};
use crate::persistence::{PersistenceClient, PersistenceError};
use crate::reference::ClearOptions;
use crate::session::{PersistFollowup, Session, SessionEffect, SessionUpdate};
use crate::snapshot::{CaptureError, SnapshotCapturer, SnapshotKey, Ticket};

const COMPLETION_QUEUE_CAPACITY: usize = 64;

/// UI intent routed to the session.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    ToggleControl,
    /// Local activity while holding control.
    ResetIdleTimer,
    ChangeTab(String),
    SetScreen(u32),
    FirstTabLoaded,
    SendMessage { text: String, reference: Option<Reference> },
    StartReference,
    ShowReference {
        to_el: Reference,
        to_coords: Option<Coords>,
        from_el: Option<Reference>,
        from_coords: Option<Coords>,
        tab_id: String,
    },
    ClearReference(ClearOptions),
    SetToElement { el: Option<Reference>, coords: Option<Coords> },
    SetFromElement { el: Option<Reference>, coords: Option<Coords> },
    CancelKey,
    WindowResized,
    BeginNewTab,
    CancelNewTab,
    EmitNewTab { tab: Box<Tab>, message: Box<Event> },
    SetAdminMode(bool),
    TogglePanel(Panel),
    ToggleSimpleChat,
    /// Replace the replica with a freshly loaded room.
    ResetRoom(Box<Room>),
    Leave,
}

enum Completion {
    Persist { followup: PersistFollowup, result: Result<(), PersistenceError> },
    Capture { ticket: Ticket, result: Result<Value, CaptureError> },
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// EFFECT EXECUTION
// =============================================================================

struct Driver {
    persistence: Arc<dyn PersistenceClient>,
    capturer: Option<Arc<dyn SnapshotCapturer>>,
    updates: mpsc::Sender<SessionUpdate>,
    done_tx: mpsc::Sender<Completion>,
    captures: HashMap<Ticket, JoinHandle<()>>,
}

impl Driver {
    /// Execute queued effects. Returns `false` once the session asked to
    /// navigate away.
    fn run_effects(&mut self, session: &mut Session) -> bool {
        let mut keep_going = true;
        for effect in session.drain_effects() {
            match effect {
                SessionEffect::Persist { collection, id, body, followup } => {
                    self.spawn_persist(collection, id, body, followup);
                }
                SessionEffect::Capture { ticket, key } => self.spawn_capture(ticket, key),
                SessionEffect::AbortCapture(ticket) => {
                    if let Some(handle) = self.captures.remove(&ticket) {
                        debug!(ticket, "aborting superseded capture");
                        handle.abort();
                    }
                }
                SessionEffect::Update(update) => {
                    if update == SessionUpdate::NavigateAway {
                        keep_going = false;
                    }
                    self.forward(update);
                }
            }
        }
        keep_going
    }

    fn spawn_persist(&self, collection: &'static str, id: String, body: Value, followup: PersistFollowup) {
        let persistence = Arc::clone(&self.persistence);
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = persistence.put(collection, &id, body).await.map(|_| ());
            let _ = done_tx.send(Completion::Persist { followup, result }).await;
        });
    }

    fn spawn_capture(&mut self, ticket: Ticket, key: SnapshotKey) {
        let Some(capturer) = self.capturer.clone() else {
            debug!(%key, "no capture surface; skipping snapshot");
            return;
        };
        let done_tx = self.done_tx.clone();
        let handle = tokio::spawn(async move {
            let result = capturer.capture(&key).await;
            let _ = done_tx.send(Completion::Capture { ticket, result }).await;
        });
        self.captures.insert(ticket, handle);
    }

    fn forward(&self, update: SessionUpdate) {
        match self.updates.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(update)) => {
                warn!(?update, "update queue full; dropping update");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("update receiver gone");
            }
        }
    }

    fn complete(&mut self, session: &mut Session, completion: Completion) {
        match completion {
            Completion::Persist { followup, result } => session.on_persist_result(followup, result),
            Completion::Capture { ticket, result } => {
                self.captures.remove(&ticket);
                session.on_capture_result(ticket, result);
            }
        }
    }

    fn abort_all(&mut self) {
        for (_, handle) in self.captures.drain() {
            handle.abort();
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

fn apply(session: &mut Session, command: SessionCommand, now: Instant) {
    match command {
        SessionCommand::ToggleControl => session.toggle_control_at(false, now),
        SessionCommand::ResetIdleTimer => session.reset_idle_timer_at(now),
        SessionCommand::ChangeTab(tab_id) => session.change_tab_at(&tab_id, now),
        SessionCommand::SetScreen(screen) => session.set_screen_at(screen, now),
        SessionCommand::FirstTabLoaded => session.set_first_tab_loaded(),
        SessionCommand::SendMessage { text, reference } => session.send_message(text, reference),
        SessionCommand::StartReference => session.start_new_reference(),
        SessionCommand::ShowReference { to_el, to_coords, from_el, from_coords, tab_id } => {
            session.show_reference(to_el, to_coords, from_el, from_coords, &tab_id);
        }
        SessionCommand::ClearReference(options) => session.clear_reference(options),
        SessionCommand::SetToElement { el, coords } => session.set_to_el_and_coords(el, coords),
        SessionCommand::SetFromElement { el, coords } => session.set_from_el_and_coords(el, coords),
        SessionCommand::CancelKey => session.cancel_key(),
        SessionCommand::WindowResized => session.window_resized_at(now),
        SessionCommand::BeginNewTab => {
            if !session.begin_new_tab() {
                debug!("new tab not permitted for this member");
            }
        }
        SessionCommand::CancelNewTab => session.cancel_new_tab(),
        SessionCommand::EmitNewTab { tab, message } => session.emit_new_tab(*tab, *message),
        SessionCommand::SetAdminMode(on) => session.set_admin_mode(on),
        SessionCommand::TogglePanel(panel) => {
            session.toggle_panel(panel);
        }
        SessionCommand::ToggleSimpleChat => {
            session.toggle_simple_chat();
        }
        SessionCommand::ResetRoom(room) => session.reset_room_at(*room, now),
        // Handled by the loop.
        SessionCommand::Leave => {}
    }
}

// =============================================================================
// LOOP
// =============================================================================

/// Start `session` and drive it until the member leaves.
///
/// `capturer` is `None` where no capture surface exists; snapshot requests
/// are then dropped. Returns the torn-down session.
pub async fn run_session(
    mut session: Session,
    mut inbound: mpsc::Receiver<Frame>,
    mut commands: mpsc::Receiver<SessionCommand>,
    updates: mpsc::Sender<SessionUpdate>,
    persistence: Arc<dyn PersistenceClient>,
    capturer: Option<Arc<dyn SnapshotCapturer>>,
) -> Session {
    let (done_tx, mut done_rx) = mpsc::channel(COMPLETION_QUEUE_CAPACITY);
    let mut driver = Driver { persistence, capturer, updates, done_tx, captures: HashMap::new() };

    session.start_at(now());
    let mut running = driver.run_effects(&mut session);
    let mut inbound_open = true;

    while running {
        let deadline = session.next_deadline();
        tokio::select! {
            maybe_frame = inbound.recv(), if inbound_open => {
                match maybe_frame {
                    Some(frame) => session.handle_frame_at(frame, now()),
                    None => {
                        info!(room_id = %session.room_id(), "inbound stream closed");
                        inbound_open = false;
                    }
                }
            }
            maybe_command = commands.recv() => {
                match maybe_command {
                    Some(SessionCommand::Leave) | None => break,
                    Some(command) => apply(&mut session, command, now()),
                }
            }
            Some(completion) = done_rx.recv() => driver.complete(&mut session, completion),
            () = sleep_until(deadline) => session.fire_due_timers_at(now()),
        }
        running = driver.run_effects(&mut session);
    }

    session.teardown();
    driver.run_effects(&mut session);
    driver.abort_all();
    info!(room_id = %session.room_id(), "session driver stopped");
    session
}

#[cfg(test)]
#[path = "runtime_test.rs"]
mod tests;
