//! UI-agnostic conversation types
//!
//! Shared by the terminal client, the one-shot `ask` command and the relay
//! client. They don't depend on any UI framework.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Id reserved for the temporary (never persisted) session.
pub const TEMPORARY_SESSION_ID: &str = "temp";

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One conversation. Messages are only ever appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        let created_at = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            title: format!("Chat {}", created_at.with_timezone(&chrono::Local).format("%H:%M")),
            messages: Vec::new(),
            created_at,
        }
    }

    pub fn temporary() -> Self {
        Self {
            id: TEMPORARY_SESSION_ID.to_string(),
            title: "Temporary Chat".to_string(),
            messages: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_temporary(&self) -> bool {
        self.id == TEMPORARY_SESSION_ID
    }

    pub(crate) fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
