//! Control arbiter — advisory single-writer lock over the shared workspace.
//!
//! DESIGN
//! ======
//! The arbiter only decides; the session applies the decision, synthesizes
//! the log event and emits it. Control is cooperative: the server relays
//! `TOOK_CONTROL` / `RELEASED_CONTROL` and each client believes the last one
//! it saw. Two clients can briefly both hold control under reordering; the
//! next authoritative push overwrites the local guess.

/// Chat text broadcast when control is requested from another holder.
pub const REQUEST_CONTROL_TEXT: &str = "Can I take control?";

/// What a control toggle should do given the current holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    /// Nobody holds control; the caller takes it.
    Take,
    /// The caller holds control and gives it up.
    Release { auto: bool },
    /// Someone else holds control; ask them for it in chat.
    AskHolder { holder: String },
    /// Administrative observers may not seize control.
    AdminBlocked,
    /// Automatic toggle with nothing to release.
    Noop,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlArbiter {
    controlled_by: Option<String>,
}

impl ControlArbiter {
    #[must_use]
    pub fn new(controlled_by: Option<String>) -> Self {
        Self { controlled_by }
    }

    #[must_use]
    pub fn controlled_by(&self) -> Option<&str> {
        self.controlled_by.as_deref()
    }

    #[must_use]
    pub fn is_held_by(&self, member_id: &str) -> bool {
        self.controlled_by.as_deref() == Some(member_id)
    }

    /// Decide a toggle for `member_id`. `auto` marks system-initiated
    /// toggles (idle timeout, disconnect), which may only release.
    #[must_use]
    pub fn decide(&self, member_id: &str, admin_observer: bool, auto: bool) -> ControlAction {
        if self.is_held_by(member_id) {
            return ControlAction::Release { auto };
        }
        if auto {
            return ControlAction::Noop;
        }
        if admin_observer {
            return ControlAction::AdminBlocked;
        }
        match &self.controlled_by {
            Some(holder) => ControlAction::AskHolder { holder: holder.clone() },
            None => ControlAction::Take,
        }
    }

    pub fn take(&mut self, member_id: &str) {
        self.controlled_by = Some(member_id.to_string());
    }

    pub fn release(&mut self) {
        self.controlled_by = None;
    }

    /// Authoritative push: `holder` now has control.
    pub fn observe_taken(&mut self, holder: impl Into<String>) {
        self.controlled_by = Some(holder.into());
    }

    /// Authoritative push: control is free.
    pub fn observe_released(&mut self) {
        self.controlled_by = None;
    }
}

#[must_use]
pub fn took_control_text(username: &str) -> String {
    format!("{username} took control")
}

#[must_use]
pub fn released_control_text(username: &str, auto: bool) -> String {
    if auto {
        format!("{username} control was released by system")
    } else {
        format!("{username} released control")
    }
}

#[cfg(test)]
#[path = "control_test.rs"]
mod tests;
