//! Engine configuration
//!
//! Keyword lists, prompt templates and tuning constants loaded once at
//! startup and injected into the router, assembler and orchestrator.
//! Nothing in the pipeline reads the environment after construction.

use std::env;
use std::time::Duration;

/// Immutable configuration for the whole engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // =============================
    // Retrieval / context assembly
    // =============================
    /// Nearest-neighbor candidates requested per query.
    pub top_k: usize,
    /// Per-candidate description budget (characters) in the prompt context.
    pub context_truncate_chars: usize,
    /// Items listed in the deterministic generation-failure summary.
    pub fallback_max_items: usize,
    /// Price at or below this marks an entry as a document, not a product.
    pub doc_price_threshold: f64,
    /// Price marker stamped on ingested documents.
    pub document_marker_price: f64,

    // =============================
    // Routing keywords
    // =============================
    /// Substrings that route a message to the deterministic rate answer.
    pub rate_triggers: Vec<String>,
    /// Substrings that flag a profile/document-intent query.
    pub profile_keywords: Vec<String>,
    /// Single words that count as a greeting when they appear as a token.
    pub greeting_words: Vec<String>,
    /// Multi-word greetings matched as substrings.
    pub greeting_phrases: Vec<String>,

    // =============================
    // Prompts & canned text
    // =============================
    pub persona_prompt: String,
    pub greeting_prompt: String,
    /// Control message appended when an operator hands a chat back to the AI.
    pub return_to_ai_notice: String,
    /// Reply when a rate question arrives but no snapshot is configured.
    pub rates_apology: String,
    /// Reply when generation fails and no candidates were retrieved.
    pub need_detail_apology: String,

    // =============================
    // Identity & gateways
    // =============================
    pub ai_display_name: String,
    pub management_display_name: String,
    /// Hard bound on every embedding/generation call. Timeout == failure.
    pub gateway_timeout: Duration,
    /// Prior messages included as conversation memory per generation call.
    pub history_window: usize,
}

const PERSONA_PROMPT: &str = "\
You are the support assistant for a currency-exchange service.

ROLE LIMITS:
- You are NOT a licensed financial advisor.
- Never promise returns or give investment recommendations.
- Make clear you provide service support, not professional financial advice.

YOUR RESPONSIBILITIES:
- Answer questions about deposits, withdrawals and exchange operations.
- Use ONLY relevant information from the provided context.
- Summarize in simple, human language; never dump raw document text.
- If the context is sparse, say so and give general guidance.

RESPONSE STYLE:
- Reply in the user's language.
- Be conversational and concise.
- Use bullet points when listing options or steps.

SAFETY:
- Add a short disclaimer whenever the answer touches financial decisions.
- Refer the user to a human operator for disputes or account problems.";

const GREETING_PROMPT: &str = "\
You are a friendly support assistant for a currency-exchange service.
Respond warmly to the greeting.
Use the appropriate time-based greeting.
Briefly introduce yourself and offer help.
Keep it conversational and welcoming.";

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            context_truncate_chars: 800,
            fallback_max_items: 3,
            doc_price_threshold: 5.0,
            document_marker_price: 1.0,
            rate_triggers: [
                "rate",
                "rates",
                "how much per",
                "buy dollar",
                "sell dollar",
                "deriv rate",
                "crypto rate",
                "usd rate",
                "today rate",
                "exchange rate",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            profile_keywords: ["cv", "resume", "profile", "who is", "about me"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            greeting_words: ["hi", "hello", "hey", "greetings"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            greeting_phrases: ["good morning", "good afternoon", "good evening"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            persona_prompt: PERSONA_PROMPT.to_string(),
            greeting_prompt: GREETING_PROMPT.to_string(),
            return_to_ai_notice:
                "The assistant is handling this chat again. You can continue normally."
                    .to_string(),
            rates_apology:
                "I couldn't load the current rates right now. Please try again in a moment, \
                 or ask our team to confirm for you."
                    .to_string(),
            need_detail_apology:
                "I'm here to help with your exchange questions. Could you share a bit more \
                 detail about what you need?"
                    .to_string(),
            ai_display_name: "Exchange Support AI".to_string(),
            management_display_name: "Exchange Support Team".to_string(),
            gateway_timeout: Duration::from_secs(30),
            history_window: 10,
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides for the operationally tunable
    /// fields. Call once at startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(k) = parse_env("RAG_TOP_K") {
            config.top_k = k;
        }
        if let Some(chars) = parse_env("CONTEXT_TRUNCATE_CHARS") {
            config.context_truncate_chars = chars;
        }
        if let Some(secs) = parse_env::<u64>("GATEWAY_TIMEOUT_SECS") {
            config.gateway_timeout = Duration::from_secs(secs);
        }
        if let Ok(name) = env::var("AI_DISPLAY_NAME") {
            if !name.trim().is_empty() {
                config.ai_display_name = name;
            }
        }
        if let Ok(name) = env::var("MANAGEMENT_DISPLAY_NAME") {
            if !name.trim().is_empty() {
                config.management_display_name = name;
            }
        }

        config
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.top_k, 5);
        assert_eq!(config.context_truncate_chars, 800);
        assert_eq!(config.fallback_max_items, 3);
        assert!(config.document_marker_price <= config.doc_price_threshold);
    }

    #[test]
    fn test_keyword_lists_lowercase() {
        let config = EngineConfig::default();
        for kw in config
            .rate_triggers
            .iter()
            .chain(&config.profile_keywords)
            .chain(&config.greeting_words)
            .chain(&config.greeting_phrases)
        {
            assert_eq!(kw, &kw.to_lowercase());
        }
    }
}
