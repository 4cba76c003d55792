//! Exchange-rate snapshots
//!
//! The rates table is maintained by operators from the admin dashboard;
//! the rule router reads the latest snapshot to answer rate questions
//! without a model call.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One pricing snapshot (₦ per $1). Fields are optional because operators
/// may quote only a subset of channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub id: u64,
    pub deriv_deposit: Option<f64>,
    pub deriv_withdraw: Option<f64>,
    pub crypto_deposit: Option<f64>,
    pub crypto_withdraw: Option<f64>,
    pub cash_dollar: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// Operator-supplied fields for a new snapshot; id and timestamp are
/// assigned on save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRateSnapshot {
    pub deriv_deposit: Option<f64>,
    pub deriv_withdraw: Option<f64>,
    pub crypto_deposit: Option<f64>,
    pub crypto_withdraw: Option<f64>,
    pub cash_dollar: Option<f64>,
}

/// Trait for the pricing source consumed by the rule router and admin API
#[async_trait::async_trait]
pub trait RatesSource: Send + Sync {
    /// Most recently saved snapshot, or None if nothing is configured yet.
    async fn latest_snapshot(&self) -> Result<Option<RateSnapshot>>;

    /// Save a new snapshot, stamped with a fresh `updated_at`.
    async fn save_snapshot(&self, new: NewRateSnapshot) -> Result<RateSnapshot>;

    /// Full snapshot history, newest-first.
    async fn history(&self) -> Result<Vec<RateSnapshot>>;
}

/// In-memory rates source for development and tests
pub struct InMemoryRatesSource {
    inner: Arc<RwLock<Vec<RateSnapshot>>>,
}

impl InMemoryRatesSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryRatesSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RatesSource for InMemoryRatesSource {
    async fn latest_snapshot(&self) -> Result<Option<RateSnapshot>> {
        let snapshots = self.inner.read().await;
        Ok(snapshots.last().cloned())
    }

    async fn save_snapshot(&self, new: NewRateSnapshot) -> Result<RateSnapshot> {
        let mut snapshots = self.inner.write().await;

        let snapshot = RateSnapshot {
            id: snapshots.len() as u64 + 1,
            deriv_deposit: new.deriv_deposit,
            deriv_withdraw: new.deriv_withdraw,
            crypto_deposit: new.crypto_deposit,
            crypto_withdraw: new.crypto_withdraw,
            cash_dollar: new.cash_dollar,
            updated_at: Utc::now(),
        };

        snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn history(&self) -> Result<Vec<RateSnapshot>> {
        let snapshots = self.inner.read().await;
        let mut history: Vec<RateSnapshot> = snapshots.clone();
        history.reverse();
        Ok(history)
    }
}

/// Format a naira amount with thousands separators and no decimals;
/// missing values render as "-".
pub fn format_naira(value: Option<f64>) -> String {
    let Some(value) = value else {
        return "-".to_string();
    };

    let rounded = value.round().abs() as u64;
    let digits = rounded.to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if value < 0.0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

/// Render the fixed quote template for chat replies.
pub fn render_rate_message(snapshot: &RateSnapshot) -> String {
    format!(
        "Here are our current live quotes (₦ per $1, subject to change):\n\
         \n\
         Deriv USD:\n\
         Deposit (Buy): ₦{} per $1\n\
         Withdraw (Sell): ₦{} per $1\n\
         \n\
         Crypto (USDT, BTC, ETH…):\n\
         Deposit (Buy): ₦{} per $1\n\
         Withdraw (Sell): ₦{} per $1\n\
         \n\
         Cash dollar (physical USD):\n\
         Spot rate: ₦{} per $1\n\
         \n\
         Note: Below $5 attracts ₦100 service fees.\n\
         \n\
         Please note that rates may adjust slightly based on liquidity and market movement.",
        format_naira(snapshot.deriv_deposit),
        format_naira(snapshot.deriv_withdraw),
        format_naira(snapshot.crypto_deposit),
        format_naira(snapshot.crypto_withdraw),
        format_naira(snapshot.cash_dollar),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_naira_grouping() {
        assert_eq!(format_naira(Some(1470.0)), "1,470");
        assert_eq!(format_naira(Some(150.0)), "150");
        assert_eq!(format_naira(Some(1_234_567.4)), "1,234,567");
        assert_eq!(format_naira(None), "-");
    }

    #[test]
    fn test_format_naira_rounds() {
        assert_eq!(format_naira(Some(1469.7)), "1,470");
    }

    #[tokio::test]
    async fn test_latest_snapshot_is_most_recent_save() {
        let source = InMemoryRatesSource::new();
        assert!(source.latest_snapshot().await.unwrap().is_none());

        source
            .save_snapshot(NewRateSnapshot {
                deriv_deposit: Some(1470.0),
                deriv_withdraw: Some(1430.0),
                crypto_deposit: None,
                crypto_withdraw: None,
                cash_dollar: None,
            })
            .await
            .unwrap();
        let second = source
            .save_snapshot(NewRateSnapshot {
                deriv_deposit: Some(1480.0),
                deriv_withdraw: Some(1440.0),
                crypto_deposit: Some(1490.0),
                crypto_withdraw: Some(1450.0),
                cash_dollar: Some(1430.0),
            })
            .await
            .unwrap();

        let latest = source.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.deriv_deposit, Some(1480.0));

        let history = source.history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].id > history[1].id);
    }

    #[test]
    fn test_render_rate_message_includes_quotes() {
        let snapshot = RateSnapshot {
            id: 1,
            deriv_deposit: Some(1470.0),
            deriv_withdraw: Some(1430.0),
            crypto_deposit: Some(1490.0),
            crypto_withdraw: Some(1450.0),
            cash_dollar: None,
            updated_at: Utc::now(),
        };

        let rendered = render_rate_message(&snapshot);
        assert!(rendered.contains("₦1,470 per $1"));
        assert!(rendered.contains("₦1,430 per $1"));
        assert!(rendered.contains("Spot rate: ₦- per $1"));
    }
}
