//! Human/AI handoff state machine
//!
//! Control state is never stored: it is derived from the append-only log.
//! The most recent non-user message decides who owns the conversation, so
//! an operator reply locks it and an AI control message unlocks it.

use crate::messages::MessageStore;
use crate::models::{Message, Sender};
use std::sync::Arc;
use tracing::warn;

/// How many trailing messages to scan when deriving state. The last
/// non-user sender is all that matters, so a bounded window is enough.
const STATE_SCAN_WINDOW: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    AiActive,
    HumanActive,
}

/// Derive control state from a chronologically ordered message slice.
///
/// HUMAN_ACTIVE iff the most recent non-user message was sent by
/// management; a missing non-user message means a fresh conversation,
/// which the AI owns.
pub fn derive_state(messages: &[Message]) -> ControlState {
    let last_non_user = messages.iter().rev().find(|m| m.sender != Sender::User);

    match last_non_user {
        Some(m) if m.sender == Sender::Management => ControlState::HumanActive,
        _ => ControlState::AiActive,
    }
}

/// Derives conversation control state from the message log.
pub struct HandoffStateMachine {
    store: Arc<dyn MessageStore>,
}

impl HandoffStateMachine {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Current control state for a conversation.
    ///
    /// Fails open: if history cannot be read the bot stays available
    /// rather than enforcing a lock it cannot verify.
    pub async fn control_state(&self, conversation_id: &str) -> ControlState {
        match self.store.conversation(conversation_id, STATE_SCAN_WINDOW).await {
            Ok(messages) => derive_state(&messages),
            Err(error) => {
                warn!(
                    conversation_id = %conversation_id,
                    "Failed to read history for handoff state, failing open to AI: {}",
                    error
                );
                ControlState::AiActive
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::messages::InMemoryMessageStore;
    use crate::models::{ConversationSummary, NewMessage};
    use crate::Result;
    use chrono::Utc;

    fn message(id: u64, sender: Sender) -> Message {
        Message {
            id,
            sender,
            content: format!("m{}", id),
            image_ref: None,
            conversation_id: "c1".to_string(),
            display_name: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_history_is_ai_active() {
        assert_eq!(derive_state(&[]), ControlState::AiActive);
    }

    #[test]
    fn test_user_only_history_is_ai_active() {
        let history = vec![message(1, Sender::User), message(2, Sender::User)];
        assert_eq!(derive_state(&history), ControlState::AiActive);
    }

    #[test]
    fn test_management_last_non_user_locks() {
        let history = vec![
            message(1, Sender::User),
            message(2, Sender::Ai),
            message(3, Sender::Management),
            message(4, Sender::User),
        ];
        assert_eq!(derive_state(&history), ControlState::HumanActive);
    }

    #[test]
    fn test_ai_control_message_unlocks() {
        let history = vec![
            message(1, Sender::Management),
            message(2, Sender::User),
            message(3, Sender::Ai),
        ];
        assert_eq!(derive_state(&history), ControlState::AiActive);
    }

    /// For all histories: HUMAN_ACTIVE iff the last non-user sender is
    /// management.
    #[test]
    fn test_state_matches_last_non_user_sender() {
        let senders = [Sender::User, Sender::Ai, Sender::Management];

        // All histories of length 4 over the three senders.
        for a in senders {
            for b in senders {
                for c in senders {
                    for d in senders {
                        let history = vec![
                            message(1, a),
                            message(2, b),
                            message(3, c),
                            message(4, d),
                        ];
                        let expected = history
                            .iter()
                            .rev()
                            .find(|m| m.sender != Sender::User)
                            .map(|m| m.sender == Sender::Management)
                            .unwrap_or(false);

                        let state = derive_state(&history);
                        assert_eq!(state == ControlState::HumanActive, expected);
                    }
                }
            }
        }
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl MessageStore for FailingStore {
        async fn append(&self, _new: NewMessage) -> Result<Message> {
            Err(EngineError::Persistence("down".to_string()))
        }
        async fn conversation(&self, _id: &str, _limit: usize) -> Result<Vec<Message>> {
            Err(EngineError::Persistence("down".to_string()))
        }
        async fn recent_conversations(&self, _limit: usize) -> Result<Vec<ConversationSummary>> {
            Err(EngineError::Persistence("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_unreadable_history_fails_open() {
        let machine = HandoffStateMachine::new(Arc::new(FailingStore));
        assert_eq!(machine.control_state("c1").await, ControlState::AiActive);
    }

    #[tokio::test]
    async fn test_state_follows_appends() {
        let store = Arc::new(InMemoryMessageStore::new());
        let machine = HandoffStateMachine::new(store.clone());

        store
            .append(NewMessage::text(Sender::User, "hello", "c1"))
            .await
            .unwrap();
        assert_eq!(machine.control_state("c1").await, ControlState::AiActive);

        store
            .append(NewMessage::text(Sender::Management, "taking over", "c1"))
            .await
            .unwrap();
        assert_eq!(machine.control_state("c1").await, ControlState::HumanActive);

        store
            .append(NewMessage::text(Sender::Ai, "back to the assistant", "c1"))
            .await
            .unwrap();
        assert_eq!(machine.control_state("c1").await, ControlState::AiActive);
    }
}
