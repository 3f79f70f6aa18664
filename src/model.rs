//! Room model — the client-side replica of server-owned room state.
//!
//! DESIGN
//! ======
//! Field names follow the server's JSON (`_id`, camelCase) so payloads from
//! the socket and the REST API deserialize directly. The replica is a cache:
//! authoritative pushes overwrite local guesses field by field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::frame::now_ms;

/// Username the server uses for autogenerated room notices.
pub const SYSTEM_USERNAME: &str = "VMTBot";

/// Element type of a reference that points at another chat message.
pub const CHAT_MESSAGE_ELEMENT: &str = "chat_message";

// =============================================================================
// MEMBERS
// =============================================================================

/// Minimal user identity carried by events and presence lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRef {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub username: String,
}

impl MemberRef {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self { id: id.into(), username: username.into() }
    }
}

/// Roster entry: a user's standing membership in the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMember {
    pub user: MemberRef,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub color: String,
}

/// Role of the local member within this session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Participant,
    Facilitator,
    /// Site administrator who entered without being on the roster.
    Admin,
}

// =============================================================================
// ROOM
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomSettings {
    pub participants_can_create_tabs: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tabs: Vec<Tab>,
    #[serde(default)]
    pub log: Vec<Event>,
    #[serde(default)]
    pub members: Vec<RoomMember>,
    #[serde(default)]
    pub current_members: Vec<MemberRef>,
    #[serde(default)]
    pub controlled_by: Option<String>,
    #[serde(default)]
    pub settings: RoomSettings,
    /// Room-level instructions, shown on the first tab when it has none.
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Room {
    #[must_use]
    pub fn member(&self, user_id: &str) -> Option<&RoomMember> {
        self.members.iter().find(|m| m.user.id == user_id)
    }
}

// =============================================================================
// TABS
// =============================================================================

/// Closed set of tool surfaces a tab can host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TabType {
    /// Graphing calculator.
    Desmos,
    /// Multi-screen activity.
    DesmosActivity,
    /// Code editor.
    Pyret,
    #[default]
    #[serde(other)]
    Geogebra,
}

impl TabType {
    /// Only activity tabs have more than one screen.
    #[must_use]
    pub fn has_screens(self) -> bool {
        matches!(self, Self::DesmosActivity)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tab_type: TabType,
    #[serde(default)]
    pub instructions: Option<String>,
    /// Captured previews keyed by `SnapshotKey`.
    #[serde(default)]
    pub snapshot: Map<String, Value>,
    #[serde(default)]
    pub visitors: Vec<String>,
    #[serde(default)]
    pub visitors_since_instructions_updated: Vec<String>,
}

/// Partial tab update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visitors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visitors_since_instructions_updated: Option<Vec<String>>,
}

impl Tab {
    /// Apply a partial update, keeping `visitors_since_instructions_updated`
    /// a subset of `visitors`.
    pub fn apply(&mut self, update: &TabUpdate) {
        if let Some(name) = &update.name {
            self.name.clone_from(name);
        }
        if let Some(instructions) = &update.instructions {
            if self.instructions.as_ref() != Some(instructions) {
                self.visitors_since_instructions_updated.clear();
            }
            self.instructions = Some(instructions.clone());
        }
        if let Some(snapshot) = &update.snapshot {
            self.snapshot.clone_from(snapshot);
        }
        if let Some(visitors) = &update.visitors {
            self.visitors.clone_from(visitors);
        }
        if let Some(since) = &update.visitors_since_instructions_updated {
            self.visitors_since_instructions_updated.clone_from(since);
        }
        let visitors = &self.visitors;
        self.visitors_since_instructions_updated
            .retain(|id| visitors.contains(id));
    }
}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Text,
    TookControl,
    ReleasedControl,
    SwitchTab,
    JoinedRoom,
    LeftRoom,
    NewTab,
    #[serde(other)]
    Other,
}

/// Pointer from a log entry to a chat message or workspace object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(default)]
    pub element_type: String,
    /// Identifier of the referenced element. Only string ids are indexable.
    #[serde(default)]
    pub element: Value,
    #[serde(default)]
    pub was_object_deleted: bool,
    #[serde(default)]
    pub was_object_updated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,
}

impl Reference {
    pub fn new(element_type: impl Into<String>, element: impl Into<String>) -> Self {
        Self { element_type: element_type.into(), element: Value::String(element.into()), ..Self::default() }
    }

    #[must_use]
    pub fn is_chat_message(&self) -> bool {
        self.element_type == CHAT_MESSAGE_ELEMENT
    }

    /// Human-readable `"<type> <element>"` label for notices.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.element {
            Value::String(s) => format!("{} {s}", self.element_type),
            other => format!("{} {other}", self.element_type),
        }
    }
}

/// Screen position of a reference endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub left: f64,
    pub top: f64,
}

/// One log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "_id")]
    pub id: String,
    pub user: MemberRef,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub autogenerated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,
}

impl Event {
    /// Autogenerated room notice attributed to `author_id` but shown as the bot.
    pub fn system(author_id: &str, text: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user: MemberRef::new(author_id, SYSTEM_USERNAME),
            text: text.into(),
            message_type,
            timestamp: now_ms(),
            room: None,
            color: None,
            autogenerated: true,
            reference: None,
            tab: None,
        }
    }

    /// Chat message typed by a member.
    pub fn chat(author: MemberRef, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user: author,
            text: text.into(),
            message_type: MessageType::Text,
            timestamp: now_ms(),
            room: None,
            color: None,
            autogenerated: false,
            reference: None,
            tab: None,
        }
    }

    #[must_use]
    pub fn in_room(mut self, room_id: impl Into<String>, color: impl Into<String>) -> Self {
        self.room = Some(room_id.into());
        self.color = Some(color.into());
        self
    }

    #[must_use]
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
