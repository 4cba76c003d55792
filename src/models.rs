//! Core data models for the support engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Sender =================
//

/// Who authored a message. `Management` marks human operator turns and
/// drives the handoff state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
    Management,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Ai => "ai",
            Sender::Management => "management",
        }
    }

    /// Parse a stored sender label. Unknown labels collapse to `User` so a
    /// corrupted row can never fabricate a management lock.
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "ai" => Sender::Ai,
            "management" => Sender::Management,
            _ => Sender::User,
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//
// ================= Message =================
//

/// One immutable entry in the append-only conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned, strictly monotonic. Chronological tiebreaker for
    /// near-simultaneous appends.
    pub id: u64,
    pub sender: Sender,
    pub content: String,
    /// Data URL of an uploaded image, if any.
    pub image_ref: Option<String>,
    pub conversation_id: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by callers when appending; id and timestamp are assigned
/// by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: Sender,
    pub content: String,
    pub conversation_id: String,
    pub display_name: Option<String>,
    pub image_ref: Option<String>,
}

impl NewMessage {
    pub fn text(sender: Sender, content: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
            conversation_id: conversation_id.into(),
            display_name: None,
            image_ref: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_image_ref(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }
}

//
// ================= Conversation Summary =================
//

/// One row per conversation for the operator dashboard, newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub last_sender: Sender,
    pub last_message: String,
    pub display_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

//
// ================= Orchestrator I/O =================
//

/// Inbound exchange from an end user.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message: String,
    pub conversation_id: String,
    pub display_name: Option<String>,
    /// Raw attachment bytes and mime type, if the user uploaded an image.
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Final reply for one inbound exchange. An empty `text` signals the
/// handoff-suppressed case: a human operator owns the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_parse_roundtrip() {
        for sender in [Sender::User, Sender::Ai, Sender::Management] {
            assert_eq!(Sender::parse(sender.as_str()), sender);
        }
    }

    #[test]
    fn test_unknown_sender_defaults_to_user() {
        assert_eq!(Sender::parse("admin"), Sender::User);
        assert_eq!(Sender::parse(""), Sender::User);
    }

    #[test]
    fn test_sender_serde_label() {
        let json = serde_json::to_string(&Sender::Management).unwrap();
        assert_eq!(json, "\"management\"");
    }
}
