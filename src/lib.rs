//! Exchange Support Engine
//!
//! A conversation engine for a currency-exchange support desk that:
//! - Derives AI/human handoff state from an append-only message log
//! - Short-circuits rate questions to deterministic answers from stored quotes
//! - Grounds generated replies in retrieved knowledge (RAG)
//! - Degrades to deterministic fallbacks whenever a gateway fails
//!
//! PER-MESSAGE PIPELINE:
//! VALIDATE → RECORD → HANDOFF CHECK → RULE ROUTE → GREETING → RETRIEVE + GENERATE → RECORD

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod handoff;
pub mod knowledge;
pub mod messages;
pub mod models;
pub mod orchestrator;
pub mod rates;
pub mod router;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use handoff::{ControlState, HandoffStateMachine};
