use super::error::QuoteError;
use crate::db::postgres::models::cache_stats::CacheStats;
use crate::db::postgres::models::refresh_run::RefreshRun;
use crate::db::postgres::repository::quote_repository::TraitQuoteRepository;
use crate::db::postgres::repository::refresh_run_repository::TraitRefreshRunRepository;
use crate::utils::clock::Clock;
use std::sync::Arc;
use tracing::error;

pub struct CacheStatsService {
    quotes: Arc<dyn TraitQuoteRepository + Send + Sync>,
    runs: Arc<dyn TraitRefreshRunRepository + Send + Sync>,
    clock: Arc<dyn Clock>,
}

impl CacheStatsService {
    pub fn new(
        quotes: Arc<dyn TraitQuoteRepository + Send + Sync>,
        runs: Arc<dyn TraitRefreshRunRepository + Send + Sync>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            quotes,
            runs,
            clock,
        }
    }

    /// Quotes updated less than `stale_after_minutes` ago count as fresh
    pub async fn cache_stats(&self, stale_after_minutes: u32) -> Result<CacheStats, QuoteError> {
        let now = self.clock.now();
        let cutoff = now - chrono::Duration::minutes(i64::from(stale_after_minutes));

        self.quotes.get_cache_stats(now, cutoff).await.map_err(|e| {
            error!("Failed to compute cache stats: {}", e);
            QuoteError::from(e)
        })
    }

    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RefreshRun>, QuoteError> {
        self.runs
            .get_recent_runs(i64::from(limit))
            .await
            .map_err(|e| {
                error!("Failed to load recent refresh runs: {}", e);
                QuoteError::from(e)
            })
    }
}
