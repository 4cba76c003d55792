//! Deterministic rule router
//!
//! Intercepts questions answerable from structured data (rate questions)
//! before any model call. Matching is a pure lowercase substring check
//! over a fixed trigger list, so identical input always routes the same
//! way.

use crate::config::EngineConfig;
use crate::rates::{render_rate_message, RatesSource};
use std::sync::Arc;
use tracing::{info, warn};

pub struct RuleRouter {
    triggers: Vec<String>,
    rates: Arc<dyn RatesSource>,
    apology: String,
}

impl RuleRouter {
    pub fn new(config: &EngineConfig, rates: Arc<dyn RatesSource>) -> Self {
        Self {
            triggers: config.rate_triggers.clone(),
            rates,
            apology: config.rates_apology.clone(),
        }
    }

    /// Pure routing decision; no I/O.
    pub fn matches(&self, message: &str) -> bool {
        let lowered = message.to_lowercase();
        self.triggers.iter().any(|t| lowered.contains(t.as_str()))
    }

    /// Deterministic reply for a matched message, or None when the message
    /// is not a rate question. A missing or failing snapshot yields the
    /// apology template instead of an error.
    pub async fn try_route(&self, message: &str) -> Option<String> {
        if !self.matches(message) {
            return None;
        }

        match self.rates.latest_snapshot().await {
            Ok(Some(snapshot)) => {
                info!(snapshot_id = snapshot.id, "Rule router answering from rate snapshot");
                Some(render_rate_message(&snapshot))
            }
            Ok(None) => {
                info!("Rate question matched but no snapshot configured");
                Some(self.apology.clone())
            }
            Err(error) => {
                warn!("Rate snapshot lookup failed, replying with apology: {}", error);
                Some(self.apology.clone())
            }
        }
    }
}
