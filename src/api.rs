//! REST API for the exchange support engine
//!
//! Exposes the chat pipeline, the operator dashboard, knowledge ingestion
//! and the rates admin over HTTP. Internal failures are logged with their
//! cause and returned as a stable generic message; validation failures are
//! returned verbatim.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::EngineError;
use crate::knowledge::KnowledgeService;
use crate::models::{Attachment, InboundMessage};
use crate::orchestrator::Orchestrator;
use crate::rates::{NewRateSnapshot, RatesSource};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub message: Option<String>,
    pub conversation_id: Option<String>,
    pub display_name: Option<String>,
    /// Base64-encoded image bytes, paired with `image_mime_type`.
    pub image_base64: Option<String>,
    pub image_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OperatorReplyRequest {
    pub message: String,
    pub operator_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProductRequest {
    pub name: String,
    pub description: String,
    pub price: f64,
}

#[derive(Debug, Deserialize)]
pub struct DocumentRequest {
    #[serde(default)]
    pub name: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct RateUpdateRequest {
    pub deriv_deposit: Option<f64>,
    pub deriv_withdraw: Option<f64>,
    pub crypto_deposit: Option<f64>,
    pub crypto_withdraw: Option<f64>,
    pub cash_dollar: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Map an engine error to a status and client-safe message. Validation and
/// not-found messages pass through; everything else is logged and replaced
/// with a stable generic message.
fn error_response(error: EngineError) -> (StatusCode, Json<ApiResponse>) {
    match error {
        EngineError::Validation(message) => {
            (StatusCode::BAD_REQUEST, Json(ApiResponse::error(message)))
        }
        EngineError::NotFound(message) => {
            (StatusCode::NOT_FOUND, Json(ApiResponse::error(message)))
        }
        other => {
            error!("Request failed: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(
                    "Something went wrong. Please try again.".to_string(),
                )),
            )
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub knowledge: Arc<KnowledgeService>,
    pub rates: Arc<dyn RatesSource>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn prompt_handler(
    State(state): State<ApiState>,
    Json(req): Json<PromptRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let attachment = match decode_attachment(&req) {
        Ok(attachment) => attachment,
        Err(e) => return error_response(e),
    };

    let inbound = InboundMessage {
        message: req.message.unwrap_or_default(),
        conversation_id: req.conversation_id.unwrap_or_default(),
        display_name: req.display_name,
        attachment,
    };

    match state.orchestrator.handle(inbound).await {
        Ok(reply) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "response": reply.text,
            }))),
        ),
        Err(e) => error_response(e),
    }
}

fn decode_attachment(req: &PromptRequest) -> crate::Result<Option<Attachment>> {
    let Some(encoded) = req.image_base64.as_deref().filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| EngineError::Validation(format!("Invalid image encoding: {}", e)))?;

    Ok(Some(Attachment {
        bytes,
        mime_type: req
            .image_mime_type
            .clone()
            .unwrap_or_else(|| "image/jpeg".to_string()),
    }))
}

/// =============================
/// Operator Endpoints
/// =============================

async fn list_conversations(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    let limit = query.limit.unwrap_or(50);
    match state.orchestrator.recent_conversations(limit).await {
        Ok(summaries) => (StatusCode::OK, Json(ApiResponse::success(summaries))),
        Err(e) => error_response(e),
    }
}

async fn conversation_transcript(
    State(state): State<ApiState>,
    Path(conversation_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let control_state = state.orchestrator.control_state(&conversation_id).await;
    match state
        .orchestrator
        .conversation_messages(&conversation_id)
        .await
    {
        Ok(messages) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "conversation_id": conversation_id,
                "control_state": format!("{:?}", control_state),
                "messages": messages,
            }))),
        ),
        Err(e) => error_response(e),
    }
}

async fn operator_reply(
    State(state): State<ApiState>,
    Path(conversation_id): Path<String>,
    Json(req): Json<OperatorReplyRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(conversation_id = %conversation_id, "Operator reply");
    match state
        .orchestrator
        .reply_as_management(&conversation_id, &req.message, req.operator_name)
        .await
    {
        Ok(message) => (StatusCode::OK, Json(ApiResponse::success(message))),
        Err(e) => error_response(e),
    }
}

async fn return_to_ai(
    State(state): State<ApiState>,
    Path(conversation_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(conversation_id = %conversation_id, "Returning conversation to AI");
    match state.orchestrator.return_to_ai(&conversation_id).await {
        Ok(message) => (StatusCode::OK, Json(ApiResponse::success(message))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Knowledge Endpoints
/// =============================

async fn register_product(
    State(state): State<ApiState>,
    Json(req): Json<ProductRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    match state
        .knowledge
        .register_product(&req.name, &req.description, req.price)
        .await
    {
        Ok(id) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({ "id": id }))),
        ),
        Err(e) => error_response(e),
    }
}

async fn ingest_document(
    State(state): State<ApiState>,
    Json(req): Json<DocumentRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.knowledge.ingest_document(&req.name, &req.body).await {
        Ok(receipt) => (StatusCode::OK, Json(ApiResponse::success(receipt))),
        Err(e) => error_response(e),
    }
}

async fn search_knowledge(
    State(state): State<ApiState>,
    Json(req): Json<SearchRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.query.trim().is_empty() {
        return error_response(EngineError::Validation("Query is required".to_string()));
    }
    match state.knowledge.search(&req.query).await {
        Ok(hits) => (StatusCode::OK, Json(ApiResponse::success(hits))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Rates Endpoints
/// =============================

async fn current_rates(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    match state.rates.latest_snapshot().await {
        Ok(Some(snapshot)) => (StatusCode::OK, Json(ApiResponse::success(snapshot))),
        Ok(None) => error_response(EngineError::NotFound(
            "No rates have been published yet".to_string(),
        )),
        Err(e) => error_response(e),
    }
}

async fn save_rates(
    State(state): State<ApiState>,
    Json(req): Json<RateUpdateRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let update = NewRateSnapshot {
        deriv_deposit: req.deriv_deposit,
        deriv_withdraw: req.deriv_withdraw,
        crypto_deposit: req.crypto_deposit,
        crypto_withdraw: req.crypto_withdraw,
        cash_dollar: req.cash_dollar,
    };
    match state.rates.save_snapshot(update).await {
        Ok(snapshot) => (StatusCode::OK, Json(ApiResponse::success(snapshot))),
        Err(e) => error_response(e),
    }
}

async fn rates_history(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    match state.rates.history().await {
        Ok(history) => (StatusCode::OK, Json(ApiResponse::success(history))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/prompt", post(prompt_handler))
        .route("/api/admin/conversations", get(list_conversations))
        .route("/api/admin/conversations/:id", get(conversation_transcript))
        .route("/api/admin/conversations/:id/reply", post(operator_reply))
        .route(
            "/api/admin/conversations/:id/return-to-ai",
            post(return_to_ai),
        )
        .route("/api/knowledge/products", post(register_product))
        .route("/api/knowledge/documents", post(ingest_document))
        .route("/api/knowledge/search", post(search_knowledge))
        .route("/api/rates/current", get(current_rates))
        .route("/api/rates", post(save_rates))
        .route("/api/rates/history", get(rates_history))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
