use crate::db::postgres::connection::PostgresConnection;
use crate::db::postgres::models::cache_stats::CacheStats;
use crate::db::postgres::models::quote_snapshot::QuoteSnapshot;
use async_trait::async_trait;
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::{Error as SqlxError, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

#[async_trait]
pub trait TraitQuoteRepository {
    /// Inserts or updates snapshots keyed by symbol. A stored row with a newer
    /// `last_updated` is left untouched. Returns rows written.
    async fn upsert_quotes(&self, quotes: &[QuoteSnapshot]) -> Result<u64, SqlxError>;

    /// Stored snapshots for the given upper-case symbols, in no particular order
    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<QuoteSnapshot>, SqlxError>;

    /// Aggregates over the whole cache; quotes older than `stale_cutoff` count as stale
    async fn get_cache_stats(
        &self,
        now: DateTime<Utc>,
        stale_cutoff: DateTime<Utc>,
    ) -> Result<CacheStats, SqlxError>;
}

pub struct StructQuoteRepository {
    connection: Arc<PostgresConnection>,
}

impl StructQuoteRepository {
    pub fn new(connection: Arc<PostgresConnection>) -> Self {
        Self { connection }
    }
}

/// Postgres rejects an upsert that touches the same key twice, so keep only the
/// newest snapshot per symbol. Order of first appearance is preserved.
pub fn dedupe_by_symbol(quotes: &[QuoteSnapshot]) -> Vec<&QuoteSnapshot> {
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(quotes.len());
    let mut unique: Vec<&QuoteSnapshot> = Vec::with_capacity(quotes.len());

    for quote in quotes {
        match positions.get(quote.symbol.as_str()) {
            Some(&idx) => {
                if quote.last_updated >= unique[idx].last_updated {
                    unique[idx] = quote;
                }
            }
            None => {
                positions.insert(quote.symbol.as_str(), unique.len());
                unique.push(quote);
            }
        }
    }

    unique
}

#[async_trait]
impl TraitQuoteRepository for StructQuoteRepository {
    async fn upsert_quotes(&self, quotes: &[QuoteSnapshot]) -> Result<u64, SqlxError> {
        if quotes.is_empty() {
            return Ok(0);
        }

        let pool = self.connection.get_pool();
        let unique = dedupe_by_symbol(quotes);

        debug!("Upserting {} quotes", unique.len());

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO stock_quotes (symbol, price, open, high, low, volume, \
             latest_trading_day, previous_close, change, change_percent, last_updated) ",
        );

        builder.push_values(unique, |mut row, quote| {
            row.push_bind(&quote.symbol)
                .push_bind(quote.price)
                .push_bind(quote.open)
                .push_bind(quote.high)
                .push_bind(quote.low)
                .push_bind(quote.volume)
                .push_bind(quote.latest_trading_day)
                .push_bind(quote.previous_close)
                .push_bind(quote.change)
                .push_bind(&quote.change_percent)
                .push_bind(quote.last_updated);
        });

        builder.push(
            " ON CONFLICT (symbol) DO UPDATE SET \
             price = EXCLUDED.price, \
             open = EXCLUDED.open, \
             high = EXCLUDED.high, \
             low = EXCLUDED.low, \
             volume = EXCLUDED.volume, \
             latest_trading_day = EXCLUDED.latest_trading_day, \
             previous_close = EXCLUDED.previous_close, \
             change = EXCLUDED.change, \
             change_percent = EXCLUDED.change_percent, \
             last_updated = EXCLUDED.last_updated \
             WHERE stock_quotes.last_updated <= EXCLUDED.last_updated",
        );

        let result = builder.build().execute(pool).await;

        match &result {
            Ok(pg_result) => debug!("Upserted quotes, rows affected: {}", pg_result.rows_affected()),
            Err(e) => error!("Error upserting {} quotes: {}", quotes.len(), e),
        }

        result.map(|pg_result| pg_result.rows_affected())
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<QuoteSnapshot>, SqlxError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let pool = self.connection.get_pool();

        let result = sqlx::query_as::<_, QuoteSnapshot>(
            "SELECT symbol, price, open, high, low, volume, latest_trading_day,
                    previous_close, change, change_percent, last_updated
             FROM stock_quotes
             WHERE symbol = ANY($1)",
        )
        .bind(symbols)
        .fetch_all(pool)
        .await;

        match &result {
            Ok(rows) => debug!("Found {} of {} requested quotes", rows.len(), symbols.len()),
            Err(e) => error!("Error fetching quotes: {}", e),
        }

        result
    }

    async fn get_cache_stats(
        &self,
        now: DateTime<Utc>,
        stale_cutoff: DateTime<Utc>,
    ) -> Result<CacheStats, SqlxError> {
        let pool = self.connection.get_pool();

        sqlx::query_as::<_, CacheStats>(
            "SELECT COUNT(*)::BIGINT AS total_symbols,
                    COUNT(*) FILTER (WHERE last_updated >= $2)::BIGINT AS fresh_quotes,
                    COUNT(*) FILTER (WHERE last_updated < $2)::BIGINT AS stale_quotes,
                    MIN(last_updated) AS oldest_quote,
                    MAX(last_updated) AS newest_quote,
                    (EXTRACT(EPOCH FROM AVG($1 - last_updated)) / 60)::FLOAT8 AS avg_age_minutes
             FROM stock_quotes",
        )
        .bind(now)
        .bind(stale_cutoff)
        .fetch_one(pool)
        .await
    }
}
