use serde::{Deserialize, Serialize};

use crate::session::{Message, Side};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoredConversation {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender: String,
    pub text: String,
    pub audio: Option<String>,
    pub created_at: String,
}

impl StoredMessage {
    /// None when the row carries a sender this build does not know.
    pub fn into_message(self) -> Option<Message> {
        let sender = Side::parse(&self.sender)?;
        Some(Message {
            id: self.id,
            text: self.text,
            sender,
            audio: self.audio,
        })
    }
}
