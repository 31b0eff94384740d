use crate::db::postgres::connection::PostgresConnection;
use async_trait::async_trait;
use sqlx::Error as SqlxError;
use std::sync::Arc;
use tracing::warn;

#[async_trait]
pub trait TraitHealthCheckRepository {
    /// True when the pool answers and the quote cache table exists
    async fn check(&self) -> Result<bool, SqlxError>;
}

pub struct StructHealthCheckRepository {
    connection: Arc<PostgresConnection>,
}

impl StructHealthCheckRepository {
    pub fn new(connection: Arc<PostgresConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl TraitHealthCheckRepository for StructHealthCheckRepository {
    async fn check(&self) -> Result<bool, SqlxError> {
        let pool = self.connection.get_pool();

        let has_quote_table = sqlx::query_scalar::<_, bool>(
            "SELECT to_regclass('public.stock_quotes') IS NOT NULL",
        )
        .fetch_one(pool)
        .await?;

        if !has_quote_table {
            warn!("Health check: stock_quotes table is missing");
        }

        Ok(has_quote_table)
    }
}
