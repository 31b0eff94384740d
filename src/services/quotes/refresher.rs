use super::error::{MAX_SYMBOLS_PER_BATCH, QuoteError};
use super::provider::TraitQuoteProvider;
use super::resolver::SymbolResolver;
use crate::db::postgres::models::quote_snapshot::QuoteSnapshot;
use crate::db::postgres::models::refresh_run::{RunCompletion, RunStatus};
use crate::db::postgres::repository::quote_repository::TraitQuoteRepository;
use crate::db::postgres::repository::refresh_run_repository::TraitRefreshRunRepository;
use crate::env_config::models::app_config::QuotesRefresherConfig;
use crate::utils::clock::Clock;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub batch_size: usize,
    /// Fixed pause between provider calls, sized to the provider's per-minute quota
    pub inter_batch_delay: Duration,
    pub persist_attempts: u32,
    pub persist_retry_delay: Duration,
}

impl RefreshSettings {
    pub fn from_config(config: &QuotesRefresherConfig) -> Self {
        Self {
            batch_size: config.batch_size.clamp(1, MAX_SYMBOLS_PER_BATCH),
            inter_batch_delay: Duration::from_millis(config.inter_batch_delay_ms),
            persist_attempts: config.persist_attempts.max(1),
            persist_retry_delay: Duration::from_millis(config.persist_retry_delay_ms),
        }
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            batch_size: MAX_SYMBOLS_PER_BATCH,
            inter_batch_delay: Duration::from_secs(12),
            persist_attempts: 2,
            persist_retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailureKind {
    Transport,
    Provider,
    RateLimited,
    MalformedResponse,
    /// Quotes were fetched but could not be written to the store
    PersistFailed,
    Cancelled,
    Other,
}

impl From<&QuoteError> for BatchFailureKind {
    fn from(err: &QuoteError) -> Self {
        match err {
            QuoteError::Transport(_) => BatchFailureKind::Transport,
            QuoteError::Provider(_) => BatchFailureKind::Provider,
            QuoteError::RateLimited(_) => BatchFailureKind::RateLimited,
            QuoteError::MalformedResponse(_) => BatchFailureKind::MalformedResponse,
            QuoteError::StorageUnavailable(_) => BatchFailureKind::PersistFailed,
            QuoteError::BatchTooLarge { .. } | QuoteError::EmptyRequest => BatchFailureKind::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    /// 1-based batch number
    pub batch: usize,
    pub kind: BatchFailureKind,
    pub message: String,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub run_id: Option<Uuid>,
    pub symbols_requested: usize,
    pub symbols_processed: usize,
    pub api_calls_made: usize,
    pub batches: usize,
    #[serde(rename = "durationSeconds", serialize_with = "serialize_secs")]
    pub duration: Duration,
    pub status: RunStatus,
    pub errors: Vec<BatchFailure>,
}

impl RefreshSummary {
    fn nothing_to_do(duration: Duration) -> Self {
        Self {
            run_id: None,
            symbols_requested: 0,
            symbols_processed: 0,
            api_calls_made: 0,
            batches: 0,
            duration,
            status: RunStatus::Completed,
            errors: Vec::new(),
        }
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Consecutive batches of at most `batch_size` symbols, in input order.
pub fn partition_batches(symbols: &[String], batch_size: usize) -> Vec<&[String]> {
    symbols
        .chunks(batch_size.clamp(1, MAX_SYMBOLS_PER_BATCH))
        .collect()
}

/// Drives scheduled refreshes of the quote cache under the provider's rate limit.
pub struct QuoteRefresher {
    resolver: SymbolResolver,
    provider: Arc<dyn TraitQuoteProvider + Send + Sync>,
    quotes: Arc<dyn TraitQuoteRepository + Send + Sync>,
    runs: Arc<dyn TraitRefreshRunRepository + Send + Sync>,
    clock: Arc<dyn Clock>,
    settings: RefreshSettings,
}

impl QuoteRefresher {
    pub fn new(
        resolver: SymbolResolver,
        provider: Arc<dyn TraitQuoteProvider + Send + Sync>,
        quotes: Arc<dyn TraitQuoteRepository + Send + Sync>,
        runs: Arc<dyn TraitRefreshRunRepository + Send + Sync>,
        clock: Arc<dyn Clock>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            resolver,
            provider,
            quotes,
            runs,
            clock,
            settings,
        }
    }

    /// Refreshes every symbol held in an active portfolio.
    pub async fn refresh_all_quotes(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RefreshSummary, QuoteError> {
        let started = Instant::now();
        let symbols = self.resolver.active_symbols().await?;
        self.run(symbols, started, cancel).await
    }

    /// Refreshes only active symbols whose cached quote is missing or older
    /// than `max_age_minutes`.
    pub async fn refresh_stale_quotes(
        &self,
        max_age_minutes: u32,
        cancel: &CancellationToken,
    ) -> Result<RefreshSummary, QuoteError> {
        let started = Instant::now();
        let symbols = self.resolver.stale_symbols(max_age_minutes).await?;
        if !symbols.is_empty() {
            info!(
                "Found {} stale quotes (older than {} minutes)",
                symbols.len(),
                max_age_minutes
            );
        }
        self.run(symbols, started, cancel).await
    }

    async fn run(
        &self,
        symbols: BTreeSet<String>,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<RefreshSummary, QuoteError> {
        if symbols.is_empty() {
            info!("No symbols to refresh");
            return Ok(RefreshSummary::nothing_to_do(started.elapsed()));
        }

        let symbols: Vec<String> = symbols.into_iter().collect();
        let run_id = Uuid::new_v4();

        self.runs
            .start_run(run_id, self.clock.now(), count_i32(symbols.len()))
            .await
            .map_err(|e| {
                error!("Failed to record start of refresh run: {}", e);
                QuoteError::from(e)
            })?;

        let batches = partition_batches(&symbols, self.settings.batch_size);
        let total = batches.len();

        info!(
            "Refresh run {}: {} symbols in {} batches",
            run_id,
            symbols.len(),
            total
        );

        let mut symbols_processed = 0usize;
        let mut api_calls_made = 0usize;
        let mut errors: Vec<BatchFailure> = Vec::new();
        let mut attempted = 0usize;
        let mut cancelled = false;

        for (idx, batch) in batches.iter().enumerate() {
            let number = idx + 1;

            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            info!("Processing batch {}/{} ({} symbols)", number, total, batch.len());

            attempted += 1;
            api_calls_made += 1;

            match self.provider.fetch_bulk_quotes(batch).await {
                Ok(quotes) => match self.persist(&quotes).await {
                    Ok(()) => {
                        symbols_processed += quotes.len();
                        info!("Batch {} completed: {} quotes updated", number, quotes.len());
                    }
                    Err(e) => {
                        let message = format!(
                            "Batch {} fetched {} quotes but failed to persist them: {}",
                            number,
                            quotes.len(),
                            e
                        );
                        error!("{}", message);
                        errors.push(BatchFailure {
                            batch: number,
                            kind: BatchFailureKind::PersistFailed,
                            message,
                        });
                    }
                },
                Err(e) => {
                    let rate_limited = e.is_rate_limited();
                    let message = format!("Batch {} failed: {}", number, e);
                    error!("{}", message);
                    errors.push(BatchFailure {
                        batch: number,
                        kind: BatchFailureKind::from(&e),
                        message,
                    });

                    if rate_limited {
                        warn!(
                            "Provider rate limit hit, skipping remaining {} batches",
                            total - number
                        );
                        break;
                    }
                }
            }

            if number < total {
                info!(
                    "Waiting {}ms before next batch",
                    self.settings.inter_batch_delay.as_millis()
                );
                let interrupted = tokio::select! {
                    _ = cancel.cancelled() => true,
                    _ = sleep(self.settings.inter_batch_delay) => false,
                };
                if interrupted {
                    cancelled = true;
                    break;
                }
            }
        }

        if cancelled {
            let message = format!("Run cancelled after {} of {} batches", attempted, total);
            warn!("Refresh run {}: {}", run_id, message);
            errors.push(BatchFailure {
                batch: attempted + 1,
                kind: BatchFailureKind::Cancelled,
                message,
            });
        }

        let status = if cancelled {
            RunStatus::Partial
        } else {
            RunStatus::from_outcome(symbols_processed, errors.len())
        };

        let completion = RunCompletion {
            status,
            completed_at: self.clock.now(),
            symbols_processed: count_i32(symbols_processed),
            api_calls_made: count_i32(api_calls_made),
            error_summary: if errors.is_empty() {
                None
            } else {
                Some(
                    errors
                        .iter()
                        .map(|e| e.message.as_str())
                        .collect::<Vec<_>>()
                        .join("; "),
                )
            },
        };

        // Quotes are already persisted; a lost log update only affects observability
        if let Err(e) = self.runs.complete_run(run_id, &completion).await {
            error!("Failed to finalize refresh run {}: {}", run_id, e);
        }

        let summary = RefreshSummary {
            run_id: Some(run_id),
            symbols_requested: symbols.len(),
            symbols_processed,
            api_calls_made,
            batches: total,
            duration: started.elapsed(),
            status,
            errors,
        };

        info!(
            "Refresh run {} finished as {}: {}/{} symbols, {} API calls, {:.1}s",
            run_id,
            summary.status,
            summary.symbols_processed,
            summary.symbols_requested,
            summary.api_calls_made,
            summary.duration.as_secs_f64()
        );

        Ok(summary)
    }

    /// Writes one batch, retrying transient storage failures.
    async fn persist(&self, quotes: &[QuoteSnapshot]) -> Result<(), QuoteError> {
        if quotes.is_empty() {
            return Ok(());
        }

        let attempts = self.settings.persist_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.quotes.upsert_quotes(quotes).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(
                        "Persist attempt {}/{} for {} quotes failed: {}, retrying",
                        attempt,
                        attempts,
                        quotes.len(),
                        e
                    );
                    sleep(self.settings.persist_retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(QuoteError::from(e)),
            }
        }
    }
}

fn count_i32(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::quotes::cache_reader::{QuoteCacheReader, StalePolicy};
    use crate::services::quotes::test_support::{
        InMemoryQuoteStore, InMemoryRunRepository, InMemorySymbolRepository, ScriptedProvider,
        symbols,
    };
    use crate::utils::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    struct Harness {
        clock: Arc<ManualClock>,
        symbols: Arc<InMemorySymbolRepository>,
        provider: Arc<ScriptedProvider>,
        store: Arc<InMemoryQuoteStore>,
        runs: Arc<InMemoryRunRepository>,
        refresher: QuoteRefresher,
    }

    fn harness(active: Vec<String>) -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 4, 15, 0, 0).unwrap(),
        ));
        let symbol_repo = Arc::new(InMemorySymbolRepository::new(active));
        let provider = Arc::new(ScriptedProvider::new(clock.clone()));
        let store = Arc::new(InMemoryQuoteStore::new());
        let runs = Arc::new(InMemoryRunRepository::new());

        let refresher = QuoteRefresher::new(
            SymbolResolver::new(symbol_repo.clone(), clock.clone()),
            provider.clone(),
            store.clone(),
            runs.clone(),
            clock.clone(),
            RefreshSettings::default(),
        );

        Harness {
            clock,
            symbols: symbol_repo,
            provider,
            store,
            runs,
            refresher,
        }
    }

    #[test]
    fn test_partition_preserves_order_and_sizes() {
        for n in [0usize, 1, 99, 100, 101, 250, 1000] {
            let input = symbols(n);
            let batches = partition_batches(&input, 100);

            assert_eq!(batches.len(), n.div_ceil(100));
            assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 100));
            assert_eq!(batches.concat(), input);
        }
    }

    #[test]
    fn test_partition_clamps_batch_size() {
        let input = symbols(250);
        assert_eq!(partition_batches(&input, 500).len(), 3);
        assert_eq!(partition_batches(&input, 0).len(), 250);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_refresh_of_250_symbols() {
        let h = harness(symbols(250));
        let started = Instant::now();

        let summary = h.refresher.refresh_all_quotes(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.symbols_requested, 250);
        assert_eq!(summary.symbols_processed, 250);
        assert_eq!(summary.api_calls_made, 3);
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.status, RunStatus::Completed);
        assert!(summary.errors.is_empty());

        let sizes: Vec<usize> = h.provider.calls().iter().map(|c| c.symbols.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);

        // Two inter-batch delays, between calls 1->2 and 2->3
        let at: Vec<Duration> = h.provider.calls().iter().map(|c| c.at - started).collect();
        assert_eq!(at, vec![Duration::ZERO, Duration::from_secs(12), Duration::from_secs(24)]);
        assert_eq!(summary.duration, Duration::from_secs(24));

        assert_eq!(h.store.len(), 250);

        let runs = h.runs.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "completed");
        assert_eq!(runs[0].symbols_requested, 250);
        assert_eq!(runs[0].symbols_processed, 250);
        assert_eq!(runs[0].api_calls_made, 3);
        assert!(runs[0].completed_at.is_some());
        assert_eq!(runs[0].error_summary, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_symbol_set_is_a_noop() {
        let h = harness(Vec::new());

        let summary = h.refresher.refresh_all_quotes(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.run_id, None);
        assert_eq!(summary.symbols_requested, 0);
        assert_eq!(summary.symbols_processed, 0);
        assert_eq!(summary.api_calls_made, 0);
        assert_eq!(summary.batches, 0);
        assert!(h.runs.runs().is_empty());
        assert!(h.provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_middle_batch_is_isolated() {
        let h = harness(symbols(250));
        h.provider.script(vec![
            Ok(()),
            Err(QuoteError::Provider("Invalid API call".to_string())),
            Ok(()),
        ]);

        let summary = h.refresher.refresh_all_quotes(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.symbols_processed, 150);
        assert_eq!(summary.api_calls_made, 3);
        assert_eq!(summary.status, RunStatus::Partial);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].batch, 2);
        assert_eq!(summary.errors[0].kind, BatchFailureKind::Provider);

        // Batch 2's symbols never reached the store
        assert_eq!(h.store.len(), 150);
        assert!(h.store.get("S0100").is_none());

        let runs = h.runs.runs();
        assert_eq!(runs[0].status, "partial");
        assert_eq!(
            runs[0].error_summary.as_deref(),
            Some("Batch 2 failed: provider error: Invalid API call")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_on_first_batch_stops_run() {
        let h = harness(symbols(250));
        h.provider.script(vec![Err(QuoteError::RateLimited(
            "5 calls per minute".to_string(),
        ))]);

        let summary = h.refresher.refresh_all_quotes(&CancellationToken::new()).await.unwrap();

        assert_eq!(h.provider.calls().len(), 1);
        assert_eq!(summary.api_calls_made, 1);
        assert_eq!(summary.symbols_processed, 0);
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].kind, BatchFailureKind::RateLimited);
        assert_eq!(h.runs.runs()[0].status, "failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_after_progress_keeps_prior_batches() {
        let h = harness(symbols(250));
        h.provider.script(vec![
            Ok(()),
            Err(QuoteError::RateLimited("quota".to_string())),
        ]);

        let summary = h.refresher.refresh_all_quotes(&CancellationToken::new()).await.unwrap();

        assert_eq!(h.provider.calls().len(), 2);
        assert_eq!(summary.symbols_processed, 100);
        assert_eq!(summary.status, RunStatus::Partial);
        assert_eq!(h.store.len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_symbols_are_not_counted() {
        let h = harness(vec!["AAPL".into(), "BOGUS".into(), "MSFT".into()]);
        h.provider.mark_unknown("BOGUS");

        let summary = h.refresher.refresh_all_quotes(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.symbols_requested, 3);
        assert_eq!(summary.symbols_processed, 2);
        assert_eq!(summary.status, RunStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_retry_recovers() {
        let h = harness(symbols(10));
        h.store.fail_next_upserts(1);

        let summary = h.refresher.refresh_all_quotes(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.symbols_processed, 10);
        assert_eq!(h.store.upsert_calls(), 2);
        assert_eq!(h.store.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_failure_is_reported_separately() {
        let h = harness(symbols(150));
        // Both attempts for batch 1 fail, batch 2 succeeds
        h.store.fail_next_upserts(2);

        let summary = h.refresher.refresh_all_quotes(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.status, RunStatus::Partial);
        assert_eq!(summary.symbols_processed, 50);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].kind, BatchFailureKind::PersistFailed);
        assert!(summary.errors[0].message.contains("fetched 100 quotes"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_delay_finalizes_partial() {
        let h = harness(symbols(250));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let summary = h.refresher.refresh_all_quotes(&cancel).await.unwrap();

        assert_eq!(h.provider.calls().len(), 1);
        assert_eq!(summary.symbols_processed, 100);
        assert_eq!(summary.status, RunStatus::Partial);
        assert_eq!(summary.errors.last().map(|e| e.kind), Some(BatchFailureKind::Cancelled));
        assert_eq!(h.store.len(), 100);
        assert_eq!(h.runs.runs()[0].status, "partial");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_reads_proceed_during_inter_batch_delay() {
        let h = harness(symbols(150));
        let reader = QuoteCacheReader::new(h.store.clone(), h.clock.clone());
        let cancel = CancellationToken::new();

        let read = async {
            sleep(Duration::from_secs(1)).await;
            reader
                .get_quotes(
                    &["S0000".to_string(), "S0120".to_string()],
                    Duration::from_secs(600),
                    StalePolicy::FreshOnly,
                )
                .await
                .unwrap()
        };

        let (summary, quotes) = futures::join!(h.refresher.refresh_all_quotes(&cancel), read);

        assert_eq!(summary.unwrap().status, RunStatus::Completed);
        // Read happened while the refresher slept between batches 1 and 2
        assert!(quotes["S0000"].is_some());
        assert!(quotes["S0120"].is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshing_twice_keeps_one_row_with_latest_timestamp() {
        let h = harness(vec!["AAPL".into()]);

        h.refresher.refresh_all_quotes(&CancellationToken::new()).await.unwrap();
        let first = h.store.get("AAPL").unwrap().last_updated;

        h.clock.advance(chrono::Duration::minutes(5));
        h.refresher.refresh_all_quotes(&CancellationToken::new()).await.unwrap();

        assert_eq!(h.store.len(), 1);
        let second = h.store.get("AAPL").unwrap().last_updated;
        assert_eq!(second, first + chrono::Duration::minutes(5));
        assert_eq!(second, h.clock.now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_refresh_only_touches_stale_symbols() {
        let h = harness(vec!["AAPL".into(), "MSFT".into(), "IBM".into()]);
        let now = h.clock.now();
        h.symbols.set_last_updated("AAPL", now - chrono::Duration::minutes(5));
        h.symbols.set_last_updated("MSFT", now - chrono::Duration::minutes(120));

        let summary = h
            .refresher
            .refresh_stale_quotes(60, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.symbols_requested, 2);
        assert_eq!(h.provider.calls()[0].symbols, vec!["IBM".to_string(), "MSFT".to_string()]);
    }

    #[tokio::test]
    async fn test_resolver_failure_aborts_before_run() {
        let h = harness(symbols(10));
        h.symbols.fail_next();

        let result = h.refresher.refresh_all_quotes(&CancellationToken::new()).await;

        assert!(matches!(result, Err(QuoteError::StorageUnavailable(_))));
        assert!(h.runs.runs().is_empty());
        assert!(h.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_log_failure_aborts_before_provider_calls() {
        let h = harness(symbols(10));
        h.runs.fail_start();

        let result = h.refresher.refresh_all_quotes(&CancellationToken::new()).await;

        assert!(matches!(result, Err(QuoteError::StorageUnavailable(_))));
        assert!(h.provider.calls().is_empty());
    }

    #[test]
    fn test_summary_json_shape() {
        let summary = RefreshSummary {
            run_id: None,
            symbols_requested: 3,
            symbols_processed: 2,
            api_calls_made: 1,
            batches: 1,
            duration: Duration::from_millis(1_500),
            status: RunStatus::Partial,
            errors: vec![BatchFailure {
                batch: 1,
                kind: BatchFailureKind::PersistFailed,
                message: "boom".to_string(),
            }],
        };

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["symbolsRequested"], 3);
        assert_eq!(json["durationSeconds"], 1.5);
        assert_eq!(json["status"], "partial");
        assert_eq!(json["errors"][0]["kind"], "persist_failed");
    }
}
