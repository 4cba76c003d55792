//! Error types for the support engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {

    // =============================
    // Pipeline Errors
    // =============================

    /// Bad caller input (missing message / conversation id). Surfaced
    /// verbatim, no side effects.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Message log or knowledge store failure. Logged and swallowed on the
    /// response path; surfaced only from admin/ingestion operations.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Embedding or nearest-neighbor lookup failed (including timeouts).
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// The generation gateway failed (including timeouts).
    #[error("Generation unavailable: {0}")]
    GenerationUnavailable(String),

    /// Conversation history could not be read while deriving control state.
    #[error("State determination failed: {0}")]
    StateDetermination(String),

    /// Requested record does not exist (e.g. no rate snapshot configured).
    #[error("Not found: {0}")]
    NotFound(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
