use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Aggregate view over `stock_quotes`
#[derive(Debug, Clone, Default, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_symbols: i64,
    pub fresh_quotes: i64,
    pub stale_quotes: i64,
    pub oldest_quote: Option<DateTime<Utc>>,
    pub newest_quote: Option<DateTime<Utc>>,
    pub avg_age_minutes: Option<f64>,
}
