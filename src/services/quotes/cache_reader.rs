use super::error::QuoteError;
use crate::db::postgres::models::quote_snapshot::QuoteSnapshot;
use crate::db::postgres::repository::quote_repository::TraitQuoteRepository;
use crate::utils::clock::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Stale and missing quotes are both reported as `None`
    FreshOnly,
    /// Any stored snapshot is returned regardless of age
    AllowStale,
}

/// Serves cached quotes straight from storage. Never calls the provider, so
/// readers are never held up by a refresh in progress.
pub struct QuoteCacheReader {
    quotes: Arc<dyn TraitQuoteRepository + Send + Sync>,
    clock: Arc<dyn Clock>,
}

impl QuoteCacheReader {
    pub fn new(quotes: Arc<dyn TraitQuoteRepository + Send + Sync>, clock: Arc<dyn Clock>) -> Self {
        Self { quotes, clock }
    }

    /// Looks up `symbols` (case-insensitive). Every requested symbol gets an
    /// entry in the result keyed by its upper-case form.
    pub async fn get_quotes(
        &self,
        symbols: &[String],
        max_age: Duration,
        policy: StalePolicy,
    ) -> Result<HashMap<String, Option<QuoteSnapshot>>, QuoteError> {
        let mut wanted: Vec<String> = symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        wanted.sort();
        wanted.dedup();

        let mut result: HashMap<String, Option<QuoteSnapshot>> =
            wanted.iter().map(|s| (s.clone(), None)).collect();
        if wanted.is_empty() {
            return Ok(result);
        }

        let stored = self.quotes.get_quotes(&wanted).await.map_err(|e| {
            error!("Cache read failed: {}", e);
            QuoteError::from(e)
        })?;

        let now = self.clock.now();
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);

        for quote in stored {
            let usable = match policy {
                StalePolicy::AllowStale => true,
                StalePolicy::FreshOnly => quote.is_fresh(now, max_age),
            };
            if usable {
                if let Some(slot) = result.get_mut(&quote.symbol) {
                    *slot = Some(quote);
                }
            }
        }

        debug!(
            "Cache read: {} of {} symbols served",
            result.values().filter(|q| q.is_some()).count(),
            result.len()
        );

        Ok(result)
    }
}
