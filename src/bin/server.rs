use exchange_support_engine::api::{start_server, ApiState};
use exchange_support_engine::config::EngineConfig;
use exchange_support_engine::gateway::{GeminiEmbedder, GeminiGenerator};
use exchange_support_engine::knowledge::{InMemoryKnowledgeStore, KnowledgeService};
use exchange_support_engine::messages::{InMemoryMessageStore, MessageStore, PgMessageStore};
use exchange_support_engine::orchestrator::Orchestrator;
use exchange_support_engine::rates::InMemoryRatesSource;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    dotenv::dotenv().ok();

    let config = Arc::new(EngineConfig::from_env());

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
        warn!("GEMINI_API_KEY not set; model calls will fail until configured");
        String::new()
    });

    let port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Exchange Support Engine");
    info!("Port: {}", port);

    let messages: Arc<dyn MessageStore> = match std::env::var("DATABASE_URL")
        .or_else(|_| std::env::var("POSTGRES_URL"))
    {
        Ok(url) => match PgMessageStore::connect_lazy(&url) {
            Ok(store) => {
                info!("Using Postgres message store");
                Arc::new(store)
            }
            Err(e) => {
                warn!("Postgres unavailable, falling back to in-memory store: {}", e);
                Arc::new(InMemoryMessageStore::new())
            }
        },
        Err(_) => {
            info!("DATABASE_URL not set; using in-memory message store");
            Arc::new(InMemoryMessageStore::new())
        }
    };

    let generator = Arc::new(
        GeminiGenerator::new(gemini_api_key.clone(), config.gateway_timeout)?
            .with_memory(messages.clone(), config.history_window),
    );
    let embedder = Arc::new(GeminiEmbedder::new(gemini_api_key, config.gateway_timeout)?);

    let knowledge_store = Arc::new(InMemoryKnowledgeStore::new());
    let rates = Arc::new(InMemoryRatesSource::new());

    let knowledge = Arc::new(KnowledgeService::new(
        embedder.clone(),
        knowledge_store.clone(),
        config.document_marker_price,
        config.top_k,
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        messages,
        knowledge_store,
        embedder,
        generator,
        rates.clone(),
    ));

    info!("Engine initialized");

    start_server(
        ApiState {
            orchestrator,
            knowledge,
            rates,
        },
        port,
    )
    .await?;

    Ok(())
}
