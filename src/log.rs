//! Event log and its derived reference index.
//!
//! DESIGN
//! ======
//! The log is append-only: insertion order is both the total order and the
//! display order, and entries are never removed. The reference index holds
//! the entries whose `reference.element` is a string id. It is rebuilt by a
//! full scan once at session start, grown on every append, and replaced
//! wholesale when the server pushes an authoritative set.

use crate::model::Event;

/// Narrow syntactic check: the event carries a reference with a string id.
#[must_use]
pub fn is_reference(event: &Event) -> bool {
    event
        .reference
        .as_ref()
        .is_some_and(|r| r.element.is_string())
}

/// State change observed on a referenced workspace object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetChange {
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Vec<Event>,
    references: Vec<Event>,
}

impl EventLog {
    /// Wrap a persisted log. The index stays empty until `compute_references`.
    #[must_use]
    pub fn new(entries: Vec<Event>) -> Self {
        Self { entries, references: Vec::new() }
    }

    /// Append one entry. Returns whether it was also indexed.
    pub fn append(&mut self, event: Event) -> bool {
        let indexed = is_reference(&event);
        if indexed {
            self.references.push(event.clone());
        }
        self.entries.push(event);
        indexed
    }

    /// Rebuild the index from a full scan of the log.
    pub fn compute_references(&mut self) {
        self.references = self
            .entries
            .iter()
            .filter(|e| is_reference(e))
            .cloned()
            .collect();
    }

    /// Replace the index with an authoritative set from the server.
    pub fn update_references(&mut self, events: Vec<Event>) {
        self.references = events.into_iter().filter(is_reference).collect();
    }

    /// Flag every entry that references `element` after its target changed.
    /// Returns the number of entries touched across the log and the index.
    pub fn flag_target(&mut self, element: &str, change: TargetChange) -> usize {
        let mut touched = 0;
        for event in self.entries.iter_mut().chain(self.references.iter_mut()) {
            let Some(reference) = event.reference.as_mut() else {
                continue;
            };
            if reference.element.as_str() != Some(element) {
                continue;
            }
            match change {
                TargetChange::Updated => reference.was_object_updated = true,
                TargetChange::Deleted => reference.was_object_deleted = true,
            }
            touched += 1;
        }
        touched
    }

    #[must_use]
    pub fn entries(&self) -> &[Event] {
        &self.entries
    }

    #[must_use]
    pub fn references(&self) -> &[Event] {
        &self.references
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "log_test.rs"]
mod tests;
