use crate::db::postgres::connection::PostgresConnection;
use async_trait::async_trait;
use sqlx::Error as SqlxError;
use sqlx::types::chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error};

#[async_trait]
pub trait TraitSymbolRepository {
    /// Distinct upper-case symbols held in any active portfolio
    async fn get_active_symbols(&self) -> Result<Vec<String>, SqlxError>;

    /// Active symbols with no cached quote or one last updated before `cutoff`
    async fn get_stale_symbols(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, SqlxError>;
}

pub struct StructSymbolRepository {
    connection: Arc<PostgresConnection>,
}

impl StructSymbolRepository {
    pub fn new(connection: Arc<PostgresConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl TraitSymbolRepository for StructSymbolRepository {
    async fn get_active_symbols(&self) -> Result<Vec<String>, SqlxError> {
        let pool = self.connection.get_pool();

        let result = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT UPPER(TRIM(h.symbol))
             FROM portfolio_holdings h
             JOIN portfolios p ON p.id = h.portfolio_id
             WHERE p.is_active AND TRIM(h.symbol) <> ''
             ORDER BY 1",
        )
        .fetch_all(pool)
        .await;

        match &result {
            Ok(symbols) => debug!("Fetched {} active symbols", symbols.len()),
            Err(e) => error!("Error fetching active symbols: {}", e),
        }

        result
    }

    async fn get_stale_symbols(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, SqlxError> {
        let pool = self.connection.get_pool();

        let result = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT UPPER(TRIM(h.symbol))
             FROM portfolio_holdings h
             JOIN portfolios p ON p.id = h.portfolio_id
             LEFT JOIN stock_quotes q ON q.symbol = UPPER(TRIM(h.symbol))
             WHERE p.is_active
               AND TRIM(h.symbol) <> ''
               AND (q.symbol IS NULL OR q.last_updated < $1)
             ORDER BY 1",
        )
        .bind(cutoff)
        .fetch_all(pool)
        .await;

        match &result {
            Ok(symbols) => debug!("Fetched {} stale symbols (cutoff {})", symbols.len(), cutoff),
            Err(e) => error!("Error fetching stale symbols: {}", e),
        }

        result
    }
}
