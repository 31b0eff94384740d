use crate::db::postgres::connection::PostgresConnection;
use crate::db::postgres::models::refresh_run::{RefreshRun, RunCompletion, RunStatus};
use async_trait::async_trait;
use sqlx::Error as SqlxError;
use sqlx::types::chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

#[async_trait]
pub trait TraitRefreshRunRepository {
    /// Records a new run in `running` state
    async fn start_run(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
        symbols_requested: i32,
    ) -> Result<(), SqlxError>;

    /// Moves a running run to its terminal state
    async fn complete_run(&self, id: Uuid, completion: &RunCompletion) -> Result<(), SqlxError>;

    /// Most recent runs, newest first
    async fn get_recent_runs(&self, limit: i64) -> Result<Vec<RefreshRun>, SqlxError>;
}

pub struct StructRefreshRunRepository {
    connection: Arc<PostgresConnection>,
}

impl StructRefreshRunRepository {
    pub fn new(connection: Arc<PostgresConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl TraitRefreshRunRepository for StructRefreshRunRepository {
    async fn start_run(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
        symbols_requested: i32,
    ) -> Result<(), SqlxError> {
        let pool = self.connection.get_pool();

        sqlx::query(
            "INSERT INTO quote_refresh_log (id, started_at, status, symbols_requested)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(started_at)
        .bind(RunStatus::Running.as_str())
        .bind(symbols_requested)
        .execute(pool)
        .await?;

        debug!("Started refresh run {} for {} symbols", id, symbols_requested);

        Ok(())
    }

    async fn complete_run(&self, id: Uuid, completion: &RunCompletion) -> Result<(), SqlxError> {
        let pool = self.connection.get_pool();

        let result = sqlx::query(
            "UPDATE quote_refresh_log
             SET status = $2, completed_at = $3, symbols_processed = $4,
                 api_calls_made = $5, error_summary = $6
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .bind(completion.status.as_str())
        .bind(completion.completed_at)
        .bind(completion.symbols_processed)
        .bind(completion.api_calls_made)
        .bind(&completion.error_summary)
        .execute(pool)
        .await;

        match &result {
            Ok(pg_result) if pg_result.rows_affected() == 0 => {
                warn!("Refresh run {} was not in running state, nothing updated", id)
            }
            Ok(_) => debug!("Completed refresh run {} as {}", id, completion.status),
            Err(e) => error!("Error completing refresh run {}: {}", id, e),
        }

        result.map(|_| ())
    }

    async fn get_recent_runs(&self, limit: i64) -> Result<Vec<RefreshRun>, SqlxError> {
        let pool = self.connection.get_pool();

        sqlx::query_as::<_, RefreshRun>(
            "SELECT id, started_at, completed_at, status, symbols_requested,
                    symbols_processed, api_calls_made, error_summary
             FROM quote_refresh_log
             ORDER BY started_at DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
