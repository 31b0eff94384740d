//! In-memory stand-ins for the Postgres repositories and the quote provider.

use super::error::QuoteError;
use super::provider::TraitQuoteProvider;
use crate::db::postgres::models::cache_stats::CacheStats;
use crate::db::postgres::models::quote_snapshot::QuoteSnapshot;
use crate::db::postgres::models::refresh_run::{RefreshRun, RunCompletion, RunStatus};
use crate::db::postgres::repository::quote_repository::{TraitQuoteRepository, dedupe_by_symbol};
use crate::db::postgres::repository::refresh_run_repository::TraitRefreshRunRepository;
use crate::db::postgres::repository::symbol_repository::TraitSymbolRepository;
use crate::utils::clock::{Clock, ManualClock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::Error as SqlxError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::time::Instant;
use uuid::Uuid;

/// `n` zero-padded symbols whose sorted order matches their numeric order
pub fn symbols(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("S{:04}", i)).collect()
}

pub fn quote_at(symbol: &str, price: f64, last_updated: DateTime<Utc>) -> QuoteSnapshot {
    QuoteSnapshot {
        symbol: symbol.to_string(),
        price,
        open: price,
        high: price,
        low: price,
        volume: 100,
        latest_trading_day: last_updated.date_naive(),
        previous_close: price,
        change: 0.0,
        change_percent: "0.0000%".to_string(),
        last_updated,
    }
}

fn storage_down() -> SqlxError {
    SqlxError::PoolTimedOut
}

#[derive(Default)]
pub struct InMemoryQuoteStore {
    rows: Mutex<HashMap<String, QuoteSnapshot>>,
    failures_left: AtomicU32,
    upsert_calls: AtomicU32,
    fail_reads: AtomicBool,
}

impl InMemoryQuoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, quote: QuoteSnapshot) {
        self.rows.lock().insert(quote.symbol.clone(), quote);
    }

    pub fn get(&self, symbol: &str) -> Option<QuoteSnapshot> {
        self.rows.lock().get(symbol).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn fail_next_upserts(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn upsert_calls(&self) -> u32 {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TraitQuoteRepository for InMemoryQuoteStore {
    async fn upsert_quotes(&self, quotes: &[QuoteSnapshot]) -> Result<u64, SqlxError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(storage_down());
        }

        let mut rows = self.rows.lock();
        let mut written = 0;
        for quote in dedupe_by_symbol(quotes) {
            let newer = rows
                .get(&quote.symbol)
                .is_none_or(|existing| existing.last_updated <= quote.last_updated);
            if newer {
                rows.insert(quote.symbol.clone(), quote.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<QuoteSnapshot>, SqlxError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(storage_down());
        }
        let rows = self.rows.lock();
        Ok(symbols.iter().filter_map(|s| rows.get(s).cloned()).collect())
    }

    async fn get_cache_stats(
        &self,
        now: DateTime<Utc>,
        stale_cutoff: DateTime<Utc>,
    ) -> Result<CacheStats, SqlxError> {
        let rows = self.rows.lock();
        let total = rows.len() as i64;
        let fresh = rows.values().filter(|q| q.last_updated >= stale_cutoff).count() as i64;
        let avg_age_minutes = (total > 0).then(|| {
            rows.values()
                .map(|q| (now - q.last_updated).num_milliseconds() as f64 / 60_000.0)
                .sum::<f64>()
                / total as f64
        });

        Ok(CacheStats {
            total_symbols: total,
            fresh_quotes: fresh,
            stale_quotes: total - fresh,
            oldest_quote: rows.values().map(|q| q.last_updated).min(),
            newest_quote: rows.values().map(|q| q.last_updated).max(),
            avg_age_minutes,
        })
    }
}

pub struct InMemorySymbolRepository {
    active: Vec<String>,
    last_updated: Mutex<HashMap<String, DateTime<Utc>>>,
    last_cutoff: Mutex<Option<DateTime<Utc>>>,
    fail_next: AtomicBool,
}

impl InMemorySymbolRepository {
    pub fn new<S: Into<String>>(active: Vec<S>) -> Self {
        Self {
            active: active.into_iter().map(Into::into).collect(),
            last_updated: Mutex::new(HashMap::new()),
            last_cutoff: Mutex::new(None),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn set_last_updated(&self, symbol: &str, at: DateTime<Utc>) {
        self.last_updated.lock().insert(symbol.to_string(), at);
    }

    pub fn last_cutoff(&self) -> Option<DateTime<Utc>> {
        *self.last_cutoff.lock()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn check_failure(&self) -> Result<(), SqlxError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            Err(storage_down())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TraitSymbolRepository for InMemorySymbolRepository {
    async fn get_active_symbols(&self) -> Result<Vec<String>, SqlxError> {
        self.check_failure()?;
        Ok(self.active.clone())
    }

    async fn get_stale_symbols(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, SqlxError> {
        self.check_failure()?;
        *self.last_cutoff.lock() = Some(cutoff);
        let last_updated = self.last_updated.lock();
        Ok(self
            .active
            .iter()
            .filter(|s| last_updated.get(*s).is_none_or(|at| *at < cutoff))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryRunRepository {
    runs: Mutex<Vec<RefreshRun>>,
    fail_start: AtomicBool,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> Vec<RefreshRun> {
        self.runs.lock().clone()
    }

    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TraitRefreshRunRepository for InMemoryRunRepository {
    async fn start_run(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
        symbols_requested: i32,
    ) -> Result<(), SqlxError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(storage_down());
        }
        self.runs.lock().push(RefreshRun {
            id,
            started_at,
            completed_at: None,
            status: RunStatus::Running.as_str().to_string(),
            symbols_requested,
            symbols_processed: 0,
            api_calls_made: 0,
            error_summary: None,
        });
        Ok(())
    }

    async fn complete_run(&self, id: Uuid, completion: &RunCompletion) -> Result<(), SqlxError> {
        let mut runs = self.runs.lock();
        let run = runs
            .iter_mut()
            .find(|r| r.id == id && r.status == RunStatus::Running.as_str())
            .ok_or(SqlxError::RowNotFound)?;
        run.status = completion.status.as_str().to_string();
        run.completed_at = Some(completion.completed_at);
        run.symbols_processed = completion.symbols_processed;
        run.api_calls_made = completion.api_calls_made;
        run.error_summary = completion.error_summary.clone();
        Ok(())
    }

    async fn get_recent_runs(&self, limit: i64) -> Result<Vec<RefreshRun>, SqlxError> {
        let mut runs = self.runs.lock().clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(runs)
    }
}

#[derive(Debug, Clone)]
pub struct ProviderCall {
    pub symbols: Vec<String>,
    pub at: Instant,
}

/// Provider that answers from a script of per-call outcomes; once the script
/// runs out every call succeeds. Successful calls quote every requested
/// symbol except the ones marked unknown, stamped with the shared clock.
pub struct ScriptedProvider {
    clock: Arc<ManualClock>,
    script: Mutex<VecDeque<Result<(), QuoteError>>>,
    unknown: Mutex<HashSet<String>>,
    calls: Mutex<Vec<ProviderCall>>,
}

impl ScriptedProvider {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            script: Mutex::new(VecDeque::new()),
            unknown: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, outcomes: Vec<Result<(), QuoteError>>) {
        self.script.lock().extend(outcomes);
    }

    pub fn mark_unknown(&self, symbol: &str) {
        self.unknown.lock().insert(symbol.to_string());
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TraitQuoteProvider for ScriptedProvider {
    async fn fetch_bulk_quotes(&self, symbols: &[String]) -> Result<Vec<QuoteSnapshot>, QuoteError> {
        self.calls.lock().push(ProviderCall {
            symbols: symbols.to_vec(),
            at: Instant::now(),
        });

        let outcome = self.script.lock().pop_front().unwrap_or(Ok(()));
        outcome?;

        let now = self.clock.now();
        let unknown = self.unknown.lock();
        Ok(symbols
            .iter()
            .filter(|s| !unknown.contains(*s))
            .enumerate()
            .map(|(i, s)| quote_at(s, 10.0 + i as f64, now))
            .collect())
    }
}
