use serde::{Deserialize, Serialize};
use std::fmt;

use crate::api::types::Avatar;

/// Which persona an avatar, message or video belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "user", alias = "USER", alias = "User")]
    User,
    #[serde(rename = "ai", alias = "AI", alias = "Ai")]
    Ai,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::User => "user",
            Side::Ai => "ai",
        }
    }

    pub fn parse(value: &str) -> Option<Side> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Side::User),
            "ai" => Some(Side::Ai),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender: Side,
    /// Backend audio path, unresolved.
    pub audio: Option<String>,
}

impl Message {
    pub fn new(text: impl Into<String>, sender: Side, audio: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            sender,
            audio,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: "New Conversation".to_string(),
            messages: Vec::new(),
        }
    }

    /// Rebuilds a conversation that was persisted elsewhere.
    pub fn restore(id: String, title: String, messages: Vec<Message>) -> Self {
        Self { id, title, messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn append(&mut self, message: Message) -> &Message {
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Text currently typed (or dictated) into each side's input field.
#[derive(Debug, Clone, Default)]
pub struct InputFields {
    user: String,
    ai: String,
}

impl InputFields {
    pub fn get(&self, side: Side) -> &str {
        match side {
            Side::User => &self.user,
            Side::Ai => &self.ai,
        }
    }

    pub fn set(&mut self, side: Side, text: impl Into<String>) {
        match side {
            Side::User => self.user = text.into(),
            Side::Ai => self.ai = text.into(),
        }
    }

    pub fn clear(&mut self, side: Side) {
        self.set(side, String::new());
    }
}

/// Chat state behind the dialogue screen.
#[derive(Debug, Default)]
pub struct Session {
    pub conversation: Conversation,
    pub inputs: InputFields,
    avatars: Vec<Avatar>,
    user_avatar: Option<Avatar>,
    ai_avatar: Option<Avatar>,
}

impl Session {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            ..Default::default()
        }
    }

    pub fn avatars(&self) -> &[Avatar] {
        &self.avatars
    }

    /// Replaces the avatar catalogue. A side keeps its selection if the avatar is still
    /// listed, otherwise it falls back to the first avatar of that side.
    pub fn set_avatars(&mut self, avatars: Vec<Avatar>) {
        self.avatars = avatars;
        for side in [Side::User, Side::Ai] {
            let keep = self
                .selected(side)
                .map(|current| self.avatars.iter().any(|a| a.uid == current.uid))
                .unwrap_or(false);
            if !keep {
                let first = self.avatars.iter().find(|a| a.side == side).cloned();
                self.set_selected(side, first);
            }
        }
    }

    pub fn avatars_for(&self, side: Side) -> Vec<&Avatar> {
        self.avatars.iter().filter(|a| a.side == side).collect()
    }

    pub fn selected(&self, side: Side) -> Option<&Avatar> {
        match side {
            Side::User => self.user_avatar.as_ref(),
            Side::Ai => self.ai_avatar.as_ref(),
        }
    }

    /// Selects a catalogue avatar by uid on its own side. Returns the side it landed on.
    pub fn select_avatar(&mut self, uid: &str) -> Option<Side> {
        let avatar = self.avatars.iter().find(|a| a.uid == uid).cloned()?;
        let side = avatar.side;
        self.set_selected(side, Some(avatar));
        Some(side)
    }

    fn set_selected(&mut self, side: Side, avatar: Option<Avatar>) {
        match side {
            Side::User => self.user_avatar = avatar,
            Side::Ai => self.ai_avatar = avatar,
        }
    }

    /// Swaps in a different conversation, dropping whatever was typed.
    pub fn replace_conversation(&mut self, conversation: Conversation) {
        self.conversation = conversation;
        self.inputs = InputFields::default();
    }
}

/// Indicators the UI renders; always derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UiIndicators {
    pub replaying: bool,
    pub mic: Option<Side>,
}
