//! Append-only conversation log
//!
//! The message log is the sole source of truth for conversation state:
//! messages are immutable once stored and never deleted. Ids are assigned
//! by the store and strictly increase, so a chronological scan is
//! deterministic even for near-simultaneous appends.

pub mod postgres;

use crate::error::EngineError;
use crate::models::{ConversationSummary, Message, NewMessage, Sender};
use crate::Result;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub use postgres::PgMessageStore;

/// Trait for the durable message log
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    /// Append one message; the store assigns id and timestamp.
    async fn append(&self, new: NewMessage) -> Result<Message>;

    /// The most recent `limit` messages of one conversation, oldest → newest.
    async fn conversation(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>>;

    /// Latest message per conversation, newest-first, capped at `limit`.
    async fn recent_conversations(&self, limit: usize) -> Result<Vec<ConversationSummary>>;
}

/// Reject rows that would break the content-or-image invariant. Management
/// control messages are exempt: the handoff placeholder is intentionally
/// empty.
pub(crate) fn validate_new_message(new: &NewMessage) -> Result<()> {
    if new.conversation_id.trim().is_empty() {
        return Err(EngineError::Persistence(
            "conversation id is required".to_string(),
        ));
    }
    let has_content = !new.content.trim().is_empty();
    let has_image = new
        .image_ref
        .as_deref()
        .map(|r| !r.trim().is_empty())
        .unwrap_or(false);
    if !has_content && !has_image && new.sender != Sender::Management {
        return Err(EngineError::Persistence(
            "content or image is required".to_string(),
        ));
    }
    Ok(())
}

/// In-memory message log for development and tests
pub struct InMemoryMessageStore {
    inner: Arc<RwLock<LogState>>,
}

struct LogState {
    next_id: u64,
    entries: Vec<Message>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(LogState {
                next_id: 1,
                entries: Vec::new(),
            })),
        }
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, new: NewMessage) -> Result<Message> {
        validate_new_message(&new)?;

        let mut state = self.inner.write().await;

        // Keep timestamps non-decreasing even if the wall clock stalls;
        // the id remains the authoritative order.
        let now = Utc::now();
        let created_at = match state.entries.last() {
            Some(last) if last.created_at >= now => last.created_at + Duration::milliseconds(1),
            _ => now,
        };

        let message = Message {
            id: state.next_id,
            sender: new.sender,
            content: new.content,
            image_ref: new.image_ref,
            conversation_id: new.conversation_id,
            display_name: new.display_name,
            created_at,
        };

        state.next_id += 1;
        state.entries.push(message.clone());

        Ok(message)
    }

    async fn conversation(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let state = self.inner.read().await;

        let mut messages: Vec<Message> = state
            .entries
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();

        // Entries are appended in id order already; keep the most recent
        // `limit`, still oldest → newest.
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }

        Ok(messages)
    }

    async fn recent_conversations(&self, limit: usize) -> Result<Vec<ConversationSummary>> {
        let state = self.inner.read().await;

        let mut latest: HashMap<&str, &Message> = HashMap::new();
        for message in &state.entries {
            latest.insert(message.conversation_id.as_str(), message);
        }

        let mut summaries: Vec<&Message> = latest.into_values().collect();
        summaries.sort_by(|a, b| b.id.cmp(&a.id));
        summaries.truncate(limit);

        Ok(summaries
            .into_iter()
            .map(|m| ConversationSummary {
                conversation_id: m.conversation_id.clone(),
                last_sender: m.sender,
                last_message: m.content.clone(),
                display_name: m.display_name.clone(),
                updated_at: m.created_at,
            })
            .collect())
    }
}
