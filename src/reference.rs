//! Reference resolution — picking and showing links between log entries and
//! workspace objects.
//!
//! DESIGN
//! ======
//! The mode is derived from two flags: `referencing` (the user is picking a
//! target) and `showing_reference` (a stored reference is drawn). Showing
//! takes precedence, so a reference can be shown while picking stays on.
//!
//! A window resize suspends picking. The first resize of a burst remembers
//! whether picking was on; the session re-arms a debounce timer on every
//! resize and calls [`ReferenceState::resize_settled`] once it fires.

use crate::model::{Coords, Reference};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceMode {
    Idle,
    Referencing,
    ShowingReference,
}

/// Why a stored reference could not be shown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("This reference does not belong to this tab")]
    WrongTab,
    #[error("The referenced object ({label}) was deleted.")]
    Deleted { label: String },
}

/// Result of a successful `show_reference`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShowOutcome {
    Shown,
    /// Shown, but the target changed after the reference was made.
    ShownModified { label: String },
}

/// Options for [`ReferenceState::clear_reference`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearOptions {
    /// Drop only the shown target and stay in picking mode.
    pub keep_referencing: bool,
}

impl ClearOptions {
    pub const KEEP_REFERENCING: Self = Self { keep_referencing: true };
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceState {
    referencing: bool,
    showing_reference: bool,
    to_el: Option<Reference>,
    to_coords: Option<Coords>,
    from_el: Option<Reference>,
    from_coords: Option<Coords>,
    referencing_before_resize: Option<bool>,
}

impl ReferenceState {
    #[must_use]
    pub fn mode(&self) -> ReferenceMode {
        if self.showing_reference {
            ReferenceMode::ShowingReference
        } else if self.referencing {
            ReferenceMode::Referencing
        } else {
            ReferenceMode::Idle
        }
    }

    #[must_use]
    pub fn is_referencing(&self) -> bool {
        self.referencing
    }

    #[must_use]
    pub fn is_showing_reference(&self) -> bool {
        self.showing_reference
    }

    #[must_use]
    pub fn to_el(&self) -> Option<&Reference> {
        self.to_el.as_ref()
    }

    #[must_use]
    pub fn to_coords(&self) -> Option<Coords> {
        self.to_coords
    }

    #[must_use]
    pub fn from_el(&self) -> Option<&Reference> {
        self.from_el.as_ref()
    }

    #[must_use]
    pub fn from_coords(&self) -> Option<Coords> {
        self.from_coords
    }

    /// Begin picking a new target. Any shown target is dropped.
    pub fn start_new_reference(&mut self) {
        self.referencing = true;
        self.showing_reference = false;
        self.to_el = None;
        self.to_coords = None;
    }

    /// Show a stored reference.
    ///
    /// Rejected without a state change when the reference belongs to a tab
    /// other than `current_tab` (chat-message targets are exempt) or when
    /// its target was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError`] when the reference cannot be shown.
    pub fn show_reference(
        &mut self,
        to_el: Reference,
        to_coords: Option<Coords>,
        from_el: Option<Reference>,
        from_coords: Option<Coords>,
        tab_id: &str,
        current_tab: &str,
    ) -> Result<ShowOutcome, ReferenceError> {
        if tab_id != current_tab && !to_el.is_chat_message() {
            return Err(ReferenceError::WrongTab);
        }
        if to_el.was_object_deleted {
            return Err(ReferenceError::Deleted { label: to_el.label() });
        }
        let outcome = if to_el.was_object_updated {
            ShowOutcome::ShownModified { label: to_el.label() }
        } else {
            ShowOutcome::Shown
        };

        self.to_el = Some(to_el);
        self.to_coords = to_coords;
        self.from_el = from_el;
        self.from_coords = from_coords;
        self.showing_reference = true;
        Ok(outcome)
    }

    pub fn clear_reference(&mut self, options: ClearOptions) {
        self.to_el = None;
        self.to_coords = None;
        self.showing_reference = false;
        if !options.keep_referencing {
            self.from_el = None;
            self.from_coords = None;
            self.referencing = false;
        }
    }

    /// Update the target of the reference being made. `None` keeps the field.
    pub fn set_to_el_and_coords(&mut self, el: Option<Reference>, coords: Option<Coords>) {
        if let Some(el) = el {
            self.to_el = Some(el);
        }
        if let Some(coords) = coords {
            self.to_coords = Some(coords);
        }
    }

    /// Update the origin of the reference being made. `None` keeps the field.
    pub fn set_from_el_and_coords(&mut self, el: Option<Reference>, coords: Option<Coords>) {
        if let Some(el) = el {
            self.from_el = Some(el);
        }
        if let Some(coords) = coords {
            self.from_coords = Some(coords);
        }
    }

    /// Turn picking off without touching a shown reference.
    pub fn stop_referencing(&mut self) {
        self.referencing = false;
    }

    /// Cancel key: abandon the in-progress pick but keep picking mode.
    /// Returns whether anything happened.
    pub fn cancel_key(&mut self) -> bool {
        if !self.referencing {
            return false;
        }
        self.clear_reference(ClearOptions::KEEP_REFERENCING);
        true
    }

    /// Window resize: remember the picking mode once per burst, then clear.
    pub fn resize_started(&mut self) {
        if self.referencing_before_resize.is_none() {
            self.referencing_before_resize = Some(self.referencing);
        }
        self.clear_reference(ClearOptions::default());
    }

    /// Resize burst over: restore picking if it was on before.
    pub fn resize_settled(&mut self) {
        if self.referencing_before_resize.take() == Some(true) {
            self.referencing = true;
        }
    }
}

#[cfg(test)]
#[path = "reference_test.rs"]
mod tests;
