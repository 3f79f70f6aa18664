//! Workspace layout flags owned by the session.

use serde::Serialize;

/// Collapsible side panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Panel {
    Chat,
    Members,
    Instructions,
    Tools,
}

impl Panel {
    pub const ALL: [Self; 4] = [Self::Chat, Self::Members, Self::Instructions, Self::Tools];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelLayout {
    pub chat_expanded: bool,
    pub members_expanded: bool,
    pub instructions_expanded: bool,
    pub tools_expanded: bool,
    /// Simplified chat hides autogenerated notices.
    pub simplified_chat: bool,
}

impl Default for PanelLayout {
    fn default() -> Self {
        Self {
            chat_expanded: true,
            members_expanded: true,
            instructions_expanded: true,
            tools_expanded: true,
            simplified_chat: true,
        }
    }
}

impl PanelLayout {
    #[must_use]
    pub fn is_expanded(&self, panel: Panel) -> bool {
        match panel {
            Panel::Chat => self.chat_expanded,
            Panel::Members => self.members_expanded,
            Panel::Instructions => self.instructions_expanded,
            Panel::Tools => self.tools_expanded,
        }
    }

    /// Flip one panel. Returns the new state.
    pub fn toggle(&mut self, panel: Panel) -> bool {
        let flag = match panel {
            Panel::Chat => &mut self.chat_expanded,
            Panel::Members => &mut self.members_expanded,
            Panel::Instructions => &mut self.instructions_expanded,
            Panel::Tools => &mut self.tools_expanded,
        };
        *flag = !*flag;
        *flag
    }

    pub fn toggle_simplified_chat(&mut self) -> bool {
        self.simplified_chat = !self.simplified_chat;
        self.simplified_chat
    }
}
