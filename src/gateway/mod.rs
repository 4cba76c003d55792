//! Model gateway traits
//!
//! The engine never talks to a model directly: embedding and generation
//! sit behind these traits so the pipeline can be exercised with mocks
//! and the provider swapped without touching the orchestrator.

use crate::Result;
use async_trait::async_trait;

pub mod gemini;
pub use gemini::{GeminiEmbedder, GeminiGenerator};

/// Text → fixed-length vector. Deterministic for a fixed model version.
/// Failures (including timeouts) surface as `RetrievalUnavailable`.
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Prompt → text. Failures (including timeouts) surface as
/// `GenerationUnavailable`.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// `conversation_id` is the conversation-memory handle: implementations
    /// may use it to include prior turns.
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        context_blocks: &[String],
        conversation_id: &str,
    ) -> Result<String>;
}

// =============================
// Test doubles
// =============================
