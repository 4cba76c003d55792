//! Vector-indexed knowledge store and ingestion service
//!
//! Products and uploaded documents share one table: a small price marker
//! distinguishes ingested documents from priced items. All vectors share
//! one dimension and cosine distance semantics, for storage and query
//! alike.

use crate::error::EngineError;
use crate::gateway::EmbeddingGateway;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

//
// ================= Types =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    /// Low/marker values denote ingested documents rather than priced items.
    pub price_marker: Option<f64>,
    pub embedding: Vec<f32>,
}

/// One nearest-neighbor result; `distance` is cosine distance
/// (0 = identical direction), non-decreasing across a result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub title: String,
    pub description: String,
    pub price_marker: Option<f64>,
    pub distance: f32,
}

/// Receipt returned by document ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReceipt {
    pub name: String,
    pub chars: usize,
    pub status: String,
    pub uploaded_at: DateTime<Utc>,
}

//
// ================= Store =================
//

/// Trait for the vector-indexed content store
#[async_trait::async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn upsert(
        &self,
        title: String,
        description: String,
        price_marker: Option<f64>,
        embedding: Vec<f32>,
    ) -> Result<Uuid>;

    /// At most `k` items, ordered by non-decreasing distance.
    async fn nearest_neighbors(&self, vector: &[f32], k: usize) -> Result<Vec<KnowledgeHit>>;
}

/// Cosine distance: 1 − cosine similarity. Degenerate vectors are treated
/// as maximally distant rather than erroring.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

/// In-memory knowledge store. The dimension is fixed by the first upsert.
pub struct InMemoryKnowledgeStore {
    inner: Arc<RwLock<IndexState>>,
}

struct IndexState {
    dimension: Option<usize>,
    items: Vec<KnowledgeItem>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(IndexState {
                dimension: None,
                items: Vec::new(),
            })),
        }
    }
}

impl Default for InMemoryKnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn upsert(
        &self,
        title: String,
        description: String,
        price_marker: Option<f64>,
        embedding: Vec<f32>,
    ) -> Result<Uuid> {
        let mut state = self.inner.write().await;

        match state.dimension {
            None => state.dimension = Some(embedding.len()),
            Some(dim) if dim != embedding.len() => {
                return Err(EngineError::Persistence(format!(
                    "Embedding dimension mismatch: index is {}, got {}",
                    dim,
                    embedding.len()
                )));
            }
            Some(_) => {}
        }

        let id = Uuid::new_v4();
        state.items.push(KnowledgeItem {
            id,
            title,
            description,
            price_marker,
            embedding,
        });

        Ok(id)
    }

    async fn nearest_neighbors(&self, vector: &[f32], k: usize) -> Result<Vec<KnowledgeHit>> {
        let state = self.inner.read().await;

        if let Some(dim) = state.dimension {
            if dim != vector.len() {
                return Err(EngineError::RetrievalUnavailable(format!(
                    "Query dimension mismatch: index is {}, got {}",
                    dim,
                    vector.len()
                )));
            }
        }

        let mut hits: Vec<KnowledgeHit> = state
            .items
            .iter()
            .map(|item| KnowledgeHit {
                title: item.title.clone(),
                description: item.description.clone(),
                price_marker: item.price_marker,
                distance: cosine_distance(vector, &item.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);

        Ok(hits)
    }
}

//
// ================= Ingestion service =================
//

/// Embeds and stores products and documents, and runs similarity search.
pub struct KnowledgeService {
    embedder: Arc<dyn EmbeddingGateway>,
    store: Arc<dyn KnowledgeStore>,
    document_marker_price: f64,
    top_k: usize,
}

impl KnowledgeService {
    pub fn new(
        embedder: Arc<dyn EmbeddingGateway>,
        store: Arc<dyn KnowledgeStore>,
        document_marker_price: f64,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            document_marker_price,
            top_k,
        }
    }

    /// Register a priced product. All fields required; price must be > 0.
    pub async fn register_product(
        &self,
        name: &str,
        description: &str,
        price: f64,
    ) -> Result<Uuid> {
        if name.trim().is_empty() || description.trim().is_empty() {
            return Err(EngineError::Validation(
                "Product name and description are required".to_string(),
            ));
        }
        if price <= 0.0 {
            return Err(EngineError::Validation(
                "Product price must be greater than zero".to_string(),
            ));
        }

        let text = format!("{} {}", name, description);
        let vector = self.embedder.embed(&text).await?;
        let id = self
            .store
            .upsert(name.to_string(), description.to_string(), Some(price), vector)
            .await?;

        info!(product = %name, "Registered product in knowledge store");
        Ok(id)
    }

    /// Ingest a document body; stored with the low price marker that tags
    /// document-style entries.
    pub async fn ingest_document(&self, name: &str, body: &str) -> Result<DocumentReceipt> {
        if body.trim().is_empty() {
            return Err(EngineError::Validation("Document body is empty".to_string()));
        }

        let safe_name = if name.trim().is_empty() {
            "Uploaded document"
        } else {
            name
        };

        let text = format!("{} {}", safe_name, body);
        let vector = self.embedder.embed(&text).await?;
        self.store
            .upsert(
                safe_name.to_string(),
                body.to_string(),
                Some(self.document_marker_price),
                vector,
            )
            .await?;

        info!(document = %safe_name, chars = body.len(), "Ingested document");
        Ok(DocumentReceipt {
            name: safe_name.to_string(),
            chars: body.len(),
            status: "ready".to_string(),
            uploaded_at: Utc::now(),
        })
    }

    /// Embed a query and return the raw top-K neighbors.
    pub async fn search(&self, query: &str) -> Result<Vec<KnowledgeHit>> {
        let vector = self.embedder.embed(query).await?;
        self.store.nearest_neighbors(&vector, self.top_k).await
    }
}
