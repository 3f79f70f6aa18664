//! Chat, log maintenance, and reference operations.

use std::time::Instant;

use tracing::debug;

use super::{Notice, Pending, Session, SessionUpdate, to_data};
use crate::log::TargetChange;
use crate::model::{Coords, Event, Reference};
use crate::reference::{ClearOptions, ShowOutcome};
use crate::scheduler::TimerId;
use crate::transport::SEND_MESSAGE;

impl Session {
    // =========================================================================
    // LOG
    // =========================================================================

    /// Send a chat message; it is appended once the server acknowledges it.
    pub fn send_message(&mut self, text: impl Into<String>, reference: Option<Reference>) {
        let mut message =
            Event::chat(self.options.user.clone(), text).in_room(self.room_id.as_str(), self.color.as_str());
        if let Some(mut reference) = reference {
            if reference.tab.is_none() && !reference.is_chat_message() {
                reference.tab = Some(self.current_tab_id.clone());
            }
            message = message.with_reference(reference);
        }
        self.send(SEND_MESSAGE, to_data(&message), Some(Pending::AppendOnAck(message)));
    }

    /// Append a locally observed event.
    pub fn add_to_log(&mut self, event: Event) {
        self.append(event);
    }

    /// Replace the reference index with an authoritative set.
    pub fn update_references(&mut self, events: Vec<Event>) {
        self.log.update_references(events);
        debug!(count = self.log.references().len(), "reference index replaced");
    }

    /// A referenced workspace object changed; flag every entry pointing at it.
    pub fn flag_reference_target(&mut self, element: &str, change: TargetChange) -> usize {
        self.log.flag_target(element, change)
    }

    // =========================================================================
    // REFERENCES
    // =========================================================================

    pub fn start_new_reference(&mut self) {
        self.references.start_new_reference();
    }

    /// Show a stored reference, surfacing a notice when it cannot be shown
    /// or its target has changed.
    pub fn show_reference(
        &mut self,
        to_el: Reference,
        to_coords: Option<Coords>,
        from_el: Option<Reference>,
        from_coords: Option<Coords>,
        tab_id: &str,
    ) -> bool {
        let current_tab = self.current_tab_id.clone();
        match self
            .references
            .show_reference(to_el, to_coords, from_el, from_coords, tab_id, &current_tab)
        {
            Ok(ShowOutcome::Shown) => true,
            Ok(ShowOutcome::ShownModified { label }) => {
                self.emit(SessionUpdate::Notice(Notice::ReferenceModified { label }));
                true
            }
            Err(err) => {
                self.emit(SessionUpdate::Notice(err.into()));
                false
            }
        }
    }

    pub fn clear_reference(&mut self, options: ClearOptions) {
        self.references.clear_reference(options);
    }

    pub fn set_to_el_and_coords(&mut self, el: Option<Reference>, coords: Option<Coords>) {
        self.references.set_to_el_and_coords(el, coords);
    }

    pub fn set_from_el_and_coords(&mut self, el: Option<Reference>, coords: Option<Coords>) {
        self.references.set_from_el_and_coords(el, coords);
    }

    /// Cancel key pressed.
    pub fn cancel_key(&mut self) {
        self.references.cancel_key();
    }

    pub fn window_resized(&mut self) {
        self.window_resized_at(Instant::now());
    }

    /// Suspend referencing until resizing has been quiet for the debounce.
    pub fn window_resized_at(&mut self, now: Instant) {
        self.references.resize_started();
        self.scheduler
            .schedule(TimerId::ResizeDebounce, self.config.resize_debounce, now);
    }
}
