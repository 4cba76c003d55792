//! Per-message orchestration
//!
//! One inbound exchange runs through a fixed sequence, terminal on the
//! first applicable branch:
//!
//! VALIDATE → RECORD INBOUND → HANDOFF CHECK → RULE ROUTE → GREETING
//! → RETRIEVE + GENERATE → RECORD OUTBOUND
//!
//! Persistence failures on the response path are logged and swallowed;
//! gateway failures degrade to deterministic fallbacks. Once invoked the
//! pipeline runs to completion or to one of its defined fallbacks.

use crate::config::EngineConfig;
use crate::context::ContextAssembler;
use crate::error::EngineError;
use crate::gateway::{EmbeddingGateway, GenerationGateway};
use crate::handoff::{ControlState, HandoffStateMachine};
use crate::knowledge::{KnowledgeHit, KnowledgeStore};
use crate::messages::MessageStore;
use crate::models::{ChatReply, ConversationSummary, InboundMessage, Message, NewMessage, Sender};
use crate::rates::RatesSource;
use crate::router::RuleRouter;
use crate::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Timelike;
use std::sync::Arc;
use tracing::{info, warn};

/// Transcript page size for the operator dashboard.
const TRANSCRIPT_LIMIT: usize = 500;

pub struct Orchestrator {
    config: Arc<EngineConfig>,
    messages: Arc<dyn MessageStore>,
    knowledge: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingGateway>,
    generator: Arc<dyn GenerationGateway>,
    router: RuleRouter,
    assembler: ContextAssembler,
    handoff: HandoffStateMachine,
}

impl Orchestrator {
    pub fn new(
        config: Arc<EngineConfig>,
        messages: Arc<dyn MessageStore>,
        knowledge: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingGateway>,
        generator: Arc<dyn GenerationGateway>,
        rates: Arc<dyn RatesSource>,
    ) -> Self {
        let router = RuleRouter::new(&config, rates);
        let assembler = ContextAssembler::new(&config);
        let handoff = HandoffStateMachine::new(messages.clone());

        Self {
            config,
            messages,
            knowledge,
            embedder,
            generator,
            router,
            assembler,
            handoff,
        }
    }

    /// Handle one inbound exchange using the local wall clock for the
    /// greeting branch.
    pub async fn handle(&self, inbound: InboundMessage) -> Result<ChatReply> {
        let hour = chrono::Local::now().hour();
        self.handle_at(inbound, hour).await
    }

    /// Pipeline body with the hour injected so the greeting branch is
    /// deterministic under test.
    pub async fn handle_at(&self, inbound: InboundMessage, hour: u32) -> Result<ChatReply> {
        // === VALIDATE (no side effects on failure) ===
        if inbound.conversation_id.trim().is_empty() {
            return Err(EngineError::Validation(
                "Conversation id is required".to_string(),
            ));
        }
        if inbound.message.trim().is_empty() && inbound.attachment.is_none() {
            return Err(EngineError::Validation(
                "Request message is empty".to_string(),
            ));
        }

        let conversation_id = inbound.conversation_id.clone();
        info!(conversation_id = %conversation_id, "Handling inbound message");

        // === RECORD INBOUND (failure must not kill the reply) ===
        let image_ref = inbound
            .attachment
            .as_ref()
            .map(|a| format!("data:{};base64,{}", a.mime_type, BASE64.encode(&a.bytes)));

        let mut user_message =
            NewMessage::text(Sender::User, inbound.message.clone(), conversation_id.clone());
        user_message.display_name = inbound.display_name.clone();
        user_message.image_ref = image_ref;

        if let Err(error) = self.messages.append(user_message).await {
            warn!("Failed to persist inbound message, continuing: {}", error);
        }

        // === HANDOFF CHECK ===
        if self.handoff.control_state(&conversation_id).await == ControlState::HumanActive {
            info!(conversation_id = %conversation_id, "Human operator active, suppressing AI reply");

            // Empty management placeholder keeps the derived lock in place.
            let placeholder = NewMessage::text(Sender::Management, "", conversation_id.clone())
                .with_display_name(self.config.management_display_name.clone());
            if let Err(error) = self.messages.append(placeholder).await {
                warn!("Failed to persist handoff placeholder: {}", error);
            }

            return Ok(ChatReply {
                text: String::new(),
            });
        }

        // === RULE SHORT-CIRCUIT ===
        if let Some(reply) = self.router.try_route(&inbound.message).await {
            self.record_outbound(&conversation_id, &reply).await;
            return Ok(ChatReply { text: reply });
        }

        // === GREETING SHORT-CIRCUIT (no retrieval) ===
        if self.is_greeting(&inbound.message) {
            let reply = self
                .handle_greeting(&inbound.message, &conversation_id, hour)
                .await;
            self.record_outbound(&conversation_id, &reply).await;
            return Ok(ChatReply { text: reply });
        }

        // === RETRIEVAL + GENERATION ===
        let hits = self.retrieve(&inbound.message).await;
        let context = self.assembler.assemble(&inbound.message, hits);

        let user_prompt = format!("User query: {}", inbound.message);
        let reply = match self
            .generator
            .generate(
                &self.config.persona_prompt,
                &user_prompt,
                &context.blocks,
                &conversation_id,
            )
            .await
        {
            Ok(text) => text,
            Err(error) => {
                warn!("Generation failed, using deterministic fallback: {}", error);
                self.assembler.fallback_summary(
                    &inbound.message,
                    &context.candidates,
                    &self.config.need_detail_apology,
                )
            }
        };

        // === RECORD OUTBOUND ===
        self.record_outbound(&conversation_id, &reply).await;

        Ok(ChatReply { text: reply })
    }

    /// Top-K candidates for a query. Retrieval failures degrade to an
    /// empty candidate list; generation is still attempted.
    async fn retrieve(&self, query: &str) -> Vec<KnowledgeHit> {
        let vector = match self.embedder.embed(query).await {
            Ok(vector) => vector,
            Err(error) => {
                warn!("Embedding failed, continuing without context: {}", error);
                return Vec::new();
            }
        };

        match self
            .knowledge
            .nearest_neighbors(&vector, self.config.top_k)
            .await
        {
            Ok(hits) => hits,
            Err(error) => {
                warn!("Similarity search failed, continuing without context: {}", error);
                Vec::new()
            }
        }
    }

    fn is_greeting(&self, message: &str) -> bool {
        let lowered = message.to_lowercase();

        if self
            .config
            .greeting_phrases
            .iter()
            .any(|p| lowered.contains(p.as_str()))
        {
            return true;
        }

        lowered
            .split_whitespace()
            .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
            .any(|token| self.config.greeting_words.iter().any(|w| w == token))
    }

    /// Lightweight generation with the greeting-only prompt; falls back to
    /// a canned time-of-day greeting if the gateway fails.
    async fn handle_greeting(&self, message: &str, conversation_id: &str, hour: u32) -> String {
        let tod = time_of_day(hour);
        let user_prompt = format!("User said: {}\n\nTime of day: {}", message, tod);

        match self
            .generator
            .generate(&self.config.greeting_prompt, &user_prompt, &[], conversation_id)
            .await
        {
            Ok(text) => text,
            Err(error) => {
                warn!("Greeting generation failed, using canned greeting: {}", error);
                format!(
                    "Good {}! I'm your exchange support assistant. How can I help you today?",
                    tod
                )
            }
        }
    }

    /// Persist the final reply. The control state is re-derived first: if
    /// an operator reply landed mid-flight, the outbound message is
    /// attributed to management so the lock is preserved.
    async fn record_outbound(&self, conversation_id: &str, reply: &str) {
        let (sender, display_name) =
            match self.handoff.control_state(conversation_id).await {
                ControlState::HumanActive => (
                    Sender::Management,
                    self.config.management_display_name.clone(),
                ),
                ControlState::AiActive => {
                    (Sender::Ai, self.config.ai_display_name.clone())
                }
            };

        let outbound = NewMessage::text(sender, reply, conversation_id)
            .with_display_name(display_name);
        if let Err(error) = self.messages.append(outbound).await {
            warn!("Failed to persist outbound message: {}", error);
        }
    }

    // =============================
    // Operator actions
    // =============================

    /// Append a human operator reply; locks the conversation to
    /// HUMAN_ACTIVE via the derived state.
    pub async fn reply_as_management(
        &self,
        conversation_id: &str,
        message: &str,
        operator_name: Option<String>,
    ) -> Result<Message> {
        if message.trim().is_empty() {
            return Err(EngineError::Validation("Message is required".to_string()));
        }

        let display_name = operator_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.config.management_display_name.clone());

        self.messages
            .append(
                NewMessage::text(Sender::Management, message, conversation_id)
                    .with_display_name(display_name),
            )
            .await
    }

    /// Hand the conversation back to the AI by appending an `ai`-sender
    /// control message.
    pub async fn return_to_ai(&self, conversation_id: &str) -> Result<Message> {
        self.messages
            .append(
                NewMessage::text(
                    Sender::Ai,
                    self.config.return_to_ai_notice.clone(),
                    conversation_id,
                )
                .with_display_name(self.config.ai_display_name.clone()),
            )
            .await
    }

    pub async fn recent_conversations(&self, limit: usize) -> Result<Vec<ConversationSummary>> {
        self.messages.recent_conversations(limit).await
    }

    pub async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.messages.conversation(conversation_id, TRANSCRIPT_LIMIT).await
    }

    pub async fn control_state(&self, conversation_id: &str) -> ControlState {
        self.handoff.control_state(conversation_id).await
    }
}

/// Morning before 12:00, afternoon before 17:00, evening otherwise.
fn time_of_day(hour: u32) -> &'static str {
    if hour < 12 {
        "morning"
    } else if hour < 17 {
        "afternoon"
    } else {
        "evening"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::{MockEmbedder, MockGenerator};
    use crate::knowledge::{InMemoryKnowledgeStore, KnowledgeService};
    use crate::messages::InMemoryMessageStore;
    use crate::rates::{InMemoryRatesSource, NewRateSnapshot};

    struct Harness {
        orchestrator: Orchestrator,
        store: Arc<InMemoryMessageStore>,
        embedder: Arc<MockEmbedder>,
        generator: Arc<MockGenerator>,
        rates: Arc<InMemoryRatesSource>,
        knowledge: Arc<InMemoryKnowledgeStore>,
    }

    fn harness(generator: MockGenerator) -> Harness {
        let config = Arc::new(EngineConfig::default());
        let store = Arc::new(InMemoryMessageStore::new());
        let knowledge = Arc::new(InMemoryKnowledgeStore::new());
        let embedder = Arc::new(MockEmbedder::new(8));
        let generator = Arc::new(generator);
        let rates = Arc::new(InMemoryRatesSource::new());

        let orchestrator = Orchestrator::new(
            config,
            store.clone(),
            knowledge.clone(),
            embedder.clone(),
            generator.clone(),
            rates.clone(),
        );

        Harness {
            orchestrator,
            store,
            embedder,
            generator,
            rates,
            knowledge,
        }
    }

    fn inbound(message: &str, conversation_id: &str) -> InboundMessage {
        InboundMessage {
            message: message.to_string(),
            conversation_id: conversation_id.to_string(),
            display_name: Some("Ada".to_string()),
            attachment: None,
        }
    }

    async fn seed_products(h: &Harness) {
        let service = KnowledgeService::new(
            h.embedder.clone(),
            h.knowledge.clone(),
            1.0,
            5,
        );
        service
            .register_product("USDT top-up", "Fund your wallet with USDT", 25.0)
            .await
            .unwrap();
        service
            .register_product("Gift card", "Redeemable gift card", 50.0)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_validation_errors_have_no_side_effects() {
        let h = harness(MockGenerator::echoing());

        let missing_message = h.orchestrator.handle_at(inbound("  ", "c1"), 9).await;
        assert!(matches!(missing_message, Err(EngineError::Validation(_))));

        let missing_conversation = h.orchestrator.handle_at(inbound("hello", " "), 9).await;
        assert!(matches!(missing_conversation, Err(EngineError::Validation(_))));

        assert!(h.store.conversation("c1", 10).await.unwrap().is_empty());
        assert_eq!(h.generator.call_count(), 0);
    }

    // Scenario A: greeting branch fires without touching retrieval.
    #[tokio::test]
    async fn test_greeting_at_nine_is_morning_and_skips_retrieval() {
        let h = harness(MockGenerator::echoing());

        let reply = h.orchestrator.handle_at(inbound("hi", "c1"), 9).await.unwrap();

        assert!(reply.text.contains("morning"));
        assert_eq!(h.embedder.call_count(), 0);

        let system_prompt = h.generator.last_system_prompt.lock().await.clone().unwrap();
        assert!(system_prompt.contains("Respond warmly to the greeting"));

        // Inbound user message + ai reply were persisted.
        let log = h.store.conversation("c1", 10).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].sender, Sender::Ai);
    }

    #[tokio::test]
    async fn test_greeting_fallback_is_time_appropriate() {
        let h = harness(MockGenerator::failing());

        let reply = h.orchestrator.handle_at(inbound("hello", "c1"), 18).await.unwrap();
        assert!(reply.text.contains("Good evening"));
    }

    #[tokio::test]
    async fn test_greeting_inside_word_does_not_trigger() {
        let h = harness(MockGenerator::echoing());
        seed_products(&h).await;
        let embeds_before = h.embedder.call_count();

        // "this" contains "hi" but is not a greeting.
        let reply = h
            .orchestrator
            .handle_at(inbound("this gift card, how does it work", "c1"), 9)
            .await
            .unwrap();
        assert!(!reply.text.contains("Time of day"));
        assert_eq!(h.embedder.call_count(), embeds_before + 1);
    }

    // Scenario B: rate questions bypass generation entirely.
    #[tokio::test]
    async fn test_rate_question_answered_from_snapshot() {
        let h = harness(MockGenerator::echoing());
        h.rates
            .save_snapshot(NewRateSnapshot {
                deriv_deposit: Some(1470.0),
                deriv_withdraw: Some(1430.0),
                crypto_deposit: Some(1490.0),
                crypto_withdraw: Some(1450.0),
                cash_dollar: Some(1430.0),
            })
            .await
            .unwrap();

        let reply = h
            .orchestrator
            .handle_at(inbound("what's the rate today", "c1"), 9)
            .await
            .unwrap();

        assert!(reply.text.contains("₦1,470 per $1"));
        assert_eq!(h.generator.call_count(), 0);
        assert_eq!(h.embedder.call_count(), 0);

        let log = h.store.conversation("c1", 10).await.unwrap();
        assert_eq!(log[1].sender, Sender::Ai);
        assert_eq!(log[1].content, reply.text);
    }

    // Scenario C: human lock suppresses the pipeline and stays locked.
    #[tokio::test]
    async fn test_human_active_suppresses_and_relocks() {
        let h = harness(MockGenerator::echoing());

        h.orchestrator
            .reply_as_management("c1", "I'll take it from here", None)
            .await
            .unwrap();

        let reply = h
            .orchestrator
            .handle_at(inbound("are you there?", "c1"), 9)
            .await
            .unwrap();
        assert_eq!(reply.text, "");
        assert_eq!(h.generator.call_count(), 0);

        let log = h.store.conversation("c1", 10).await.unwrap();
        let placeholder = log.last().unwrap();
        assert_eq!(placeholder.sender, Sender::Management);
        assert!(placeholder.content.is_empty());

        assert_eq!(
            h.orchestrator.control_state("c1").await,
            ControlState::HumanActive
        );
    }

    // Scenario D: return-to-AI unlocks immediately.
    #[tokio::test]
    async fn test_return_to_ai_unlocks() {
        let h = harness(MockGenerator::echoing());

        h.orchestrator
            .reply_as_management("c1", "handling this", Some("Joy".to_string()))
            .await
            .unwrap();
        assert_eq!(
            h.orchestrator.control_state("c1").await,
            ControlState::HumanActive
        );

        let control = h.orchestrator.return_to_ai("c1").await.unwrap();
        assert_eq!(control.sender, Sender::Ai);
        assert_eq!(
            h.orchestrator.control_state("c1").await,
            ControlState::AiActive
        );
    }

    // Scenario E: generation failure yields the deterministic summary and
    // that exact text is what gets persisted.
    #[tokio::test]
    async fn test_generation_failure_uses_fallback_and_persists_it() {
        let h = harness(MockGenerator::failing());
        seed_products(&h).await;

        let reply = h
            .orchestrator
            .handle_at(inbound("tell me about the gift card", "c1"), 10)
            .await
            .unwrap();

        assert!(reply.text.contains("here's what I found"));
        assert!(reply.text.contains("Gift card"));

        let log = h.store.conversation("c1", 10).await.unwrap();
        let outbound = log.last().unwrap();
        assert_eq!(outbound.sender, Sender::Ai);
        assert_eq!(outbound.content, reply.text);
    }

    #[tokio::test]
    async fn test_generation_failure_without_candidates_apologizes() {
        let h = harness(MockGenerator::failing());

        let reply = h
            .orchestrator
            .handle_at(inbound("completely unknown topic", "c1"), 10)
            .await
            .unwrap();
        assert!(reply.text.contains("share a bit more detail"));
    }

    #[tokio::test]
    async fn test_retrieval_failure_still_generates() {
        let config = Arc::new(EngineConfig::default());
        let store = Arc::new(InMemoryMessageStore::new());
        let knowledge = Arc::new(InMemoryKnowledgeStore::new());
        let embedder = Arc::new(MockEmbedder::failing(8));
        let generator = Arc::new(MockGenerator::echoing());
        let rates = Arc::new(InMemoryRatesSource::new());

        let orchestrator = Orchestrator::new(
            config,
            store,
            knowledge,
            embedder.clone(),
            generator.clone(),
            rates,
        );

        let reply = orchestrator
            .handle_at(inbound("how do withdrawals work", "c1"), 10)
            .await
            .unwrap();

        // Embedding failed, so generation ran with zero context blocks.
        assert!(reply.text.contains("0 context blocks"));
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_attachment_allows_empty_message() {
        let h = harness(MockGenerator::echoing());

        let mut message = inbound("", "c1");
        message.attachment = Some(crate::models::Attachment {
            bytes: vec![1, 2, 3],
            mime_type: "image/jpeg".to_string(),
        });

        h.orchestrator.handle_at(message, 10).await.unwrap();

        let log = h.store.conversation("c1", 10).await.unwrap();
        let stored = &log[0];
        assert_eq!(stored.sender, Sender::User);
        let image_ref = stored.image_ref.as_deref().unwrap();
        assert!(image_ref.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_time_of_day_boundaries() {
        assert_eq!(time_of_day(0), "morning");
        assert_eq!(time_of_day(11), "morning");
        assert_eq!(time_of_day(12), "afternoon");
        assert_eq!(time_of_day(16), "afternoon");
        assert_eq!(time_of_day(17), "evening");
        assert_eq!(time_of_day(23), "evening");
    }
}
