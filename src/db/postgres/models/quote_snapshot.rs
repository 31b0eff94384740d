use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Latest known quote for a symbol, one row per symbol in `stock_quotes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSnapshot {
    /// Upper-case ticker, primary key
    pub symbol: String,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: i64,
    pub latest_trading_day: NaiveDate,
    pub previous_close: f64,
    pub change: f64,
    /// Provider formatted percentage, e.g. "-1.2500%"
    pub change_percent: String,
    /// When this snapshot was written; the only freshness signal
    pub last_updated: DateTime<Utc>,
}

impl QuoteSnapshot {
    /// Age relative to `now`. Negative ages (clock skew) count as zero.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.last_updated).max(chrono::Duration::zero())
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        self.age(now) < max_age
    }
}
