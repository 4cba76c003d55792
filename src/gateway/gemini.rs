//! Gemini gateway clients
//!
//! Generation and embedding over the Gemini REST API, with connection
//! pooling and a hard per-call timeout. A timeout is reported exactly like
//! any other gateway failure; retries are the caller's choice.

use crate::error::EngineError;
use crate::messages::MessageStore;
use crate::models::Sender;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{EmbeddingGateway, GenerationGateway};

const GENERATION_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";
const EMBEDDING_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/text-embedding-004:embedContent";

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .build()
        .map_err(|e| EngineError::GenerationUnavailable(format!("Failed to build HTTP client: {}", e)))
}

//
// ================= Generation =================
//

pub struct GeminiGenerator {
    client: Client,
    api_key: String,
    base_url: String,
    /// Optional conversation memory: prior turns are replayed into the
    /// request keyed by the conversation id.
    memory: Option<Arc<dyn MessageStore>>,
    history_window: usize,
}

impl GeminiGenerator {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            base_url: GENERATION_URL.to_string(),
            memory: None,
            history_window: 0,
        })
    }

    pub fn with_memory(mut self, store: Arc<dyn MessageStore>, history_window: usize) -> Self {
        self.memory = Some(store);
        self.history_window = history_window;
        self
    }

    /// Prior turns as Gemini contents. Memory failures degrade to an
    /// empty history; they never fail the call.
    async fn history_contents(&self, conversation_id: &str) -> Vec<Content> {
        let Some(store) = &self.memory else {
            return Vec::new();
        };

        let messages = match store.conversation(conversation_id, self.history_window).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Conversation memory load failed, generating without history: {}", e);
                return Vec::new();
            }
        };

        messages
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| Content {
                role: match m.sender {
                    Sender::User => "user".to_string(),
                    _ => "model".to_string(),
                },
                parts: vec![Part {
                    text: m.content.clone(),
                }],
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl GenerationGateway for GeminiGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        context_blocks: &[String],
        conversation_id: &str,
    ) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(EngineError::GenerationUnavailable(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let mut user_text = user_prompt.to_string();
        if !context_blocks.is_empty() {
            user_text.push_str("\n\nRelevant knowledge:\n");
            for block in context_blocks {
                user_text.push_str(block);
            }
        }

        let mut contents = self.history_contents(conversation_id).await;
        contents.push(Content {
            role: "user".to_string(),
            parts: vec![Part { text: user_text }],
        });

        let request = GenerateRequest {
            contents,
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system_prompt.to_string(),
                }],
            },
        };

        info!("Calling Gemini generateContent");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini generation request failed: {}", e);
                if e.is_timeout() {
                    EngineError::GenerationUnavailable("Gemini request timed out".to_string())
                } else {
                    EngineError::GenerationUnavailable(format!("Gemini request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini generation error response ({}): {}", status, error_text);
            return Err(EngineError::GenerationUnavailable(format!(
                "Gemini returned {}",
                status
            )));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            EngineError::GenerationUnavailable(format!("Gemini parse error: {}", e))
        })?;

        body.candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| {
                EngineError::GenerationUnavailable("Empty response from Gemini".to_string())
            })
    }
}

//
// ================= Embedding =================
//

pub struct GeminiEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiEmbedder {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            base_url: EMBEDDING_URL.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingGateway for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.api_key.is_empty() {
            return Err(EngineError::RetrievalUnavailable(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = EmbedRequest {
            content: EmbedContent {
                parts: vec![Part {
                    text: text.to_string(),
                }],
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini embedding request failed: {}", e);
                if e.is_timeout() {
                    EngineError::RetrievalUnavailable("Embedding request timed out".to_string())
                } else {
                    EngineError::RetrievalUnavailable(format!("Embedding request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(EngineError::RetrievalUnavailable(format!(
                "Gemini embedding returned {}",
                status
            )));
        }

        let body: EmbedResponse = response.json().await.map_err(|e| {
            EngineError::RetrievalUnavailable(format!("Embedding parse error: {}", e))
        })?;

        if body.embedding.values.is_empty() {
            return Err(EngineError::RetrievalUnavailable(
                "Empty embedding from Gemini".to_string(),
            ));
        }

        Ok(body.embedding.values)
    }
}

//
// ================= Wire types =================
//

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    content: EmbedContent,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Debug, Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_serialization() {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: "What are your rates?".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: "You are a support assistant".to_string(),
                }],
            },
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("What are your rates?"));
        assert!(json.contains("systemInstruction"));
        assert!(json.contains("maxOutputTokens"));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_gateway_failure() {
        let generator =
            GeminiGenerator::new(String::new(), Duration::from_secs(5)).unwrap();
        let result = generator.generate("system", "user", &[], "c1").await;
        assert!(matches!(
            result,
            Err(EngineError::GenerationUnavailable(_))
        ));

        let embedder = GeminiEmbedder::new(String::new(), Duration::from_secs(5)).unwrap();
        let result = embedder.embed("query").await;
        assert!(matches!(result, Err(EngineError::RetrievalUnavailable(_))));
    }

    #[test]
    fn test_embed_response_parse() {
        let body = r#"{"embedding": {"values": [0.1, -0.2, 0.3]}}"#;
        let parsed: EmbedResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.embedding.values.len(), 3);
    }
}
