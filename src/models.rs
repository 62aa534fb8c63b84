use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of the legacy author id carried by bot messages.
pub const BOT_UID_PREFIX: &str = "chatbot-";

/// Represents who authored a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Human,
    Bot,
}

impl MessageRole {
    pub fn as_str(&self) -> &str {
        match self {
            MessageRole::Human => "human",
            MessageRole::Bot => "bot",
        }
    }
}

/// A signed-in user as reported by an identity provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub display_name: String,
    pub photo_url: Option<String>,
}

impl Identity {
    pub fn new(uid: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: display_name.into(),
            photo_url: None,
        }
    }

    pub fn with_photo(mut self, photo_url: impl Into<String>) -> Self {
        self.photo_url = Some(photo_url.into());
        self
    }
}

/// A message as submitted to the store, before it has an id or timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: String,
    pub role: MessageRole,
    pub text: String,
    pub photo_url: Option<String>,
}

impl NewMessage {
    /// A message written by `author` into their own conversation.
    pub fn human(author: &Identity, text: impl Into<String>) -> Self {
        Self {
            conversation_id: author.uid.clone(),
            role: MessageRole::Human,
            text: text.into(),
            photo_url: author.photo_url.clone(),
        }
    }

    pub fn bot(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role: MessageRole::Bot,
            text: text.into(),
            photo_url: None,
        }
    }
}

/// A single message record held by the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub seq: u64,
    pub conversation_id: String,
    pub role: MessageRole,
    pub text: String,
    pub photo_url: Option<String>,
    /// Assigned by the store on confirmation; `None` while the write is pending.
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn accepted(message: NewMessage, seq: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            seq,
            conversation_id: message.conversation_id,
            role: message.role,
            text: message.text,
            photo_url: message.photo_url,
            created_at: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.created_at.is_some()
    }

    /// Author id in the `uid` / `chatbot-<uid>` form older clients expect.
    pub fn author_uid(&self) -> String {
        match self.role {
            MessageRole::Human => self.conversation_id.clone(),
            MessageRole::Bot => bot_uid(&self.conversation_id),
        }
    }
}

pub fn bot_uid(human_uid: &str) -> String {
    format!("{BOT_UID_PREFIX}{human_uid}")
}
