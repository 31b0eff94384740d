use super::error::{MAX_SYMBOLS_PER_BATCH, QuoteError};
use super::provider::TraitQuoteProvider;
use crate::db::postgres::models::quote_snapshot::QuoteSnapshot;
use crate::db::postgres::repository::quote_repository::TraitQuoteRepository;
use crate::utils::clock::Clock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkQuotes {
    /// Quotes in request order
    pub quotes: Vec<QuoteSnapshot>,
    pub from_cache: usize,
    pub fetched: usize,
    /// Requested symbols with no quote at all
    pub missing: Vec<String>,
    /// Set when the provider failed and cached data was served instead
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Answers a single caller's bulk request: fresh cache hits are served as is,
/// everything else goes to the provider in one call and is written back.
pub struct OnDemandQuoteService {
    provider: Arc<dyn TraitQuoteProvider + Send + Sync>,
    quotes: Arc<dyn TraitQuoteRepository + Send + Sync>,
    clock: Arc<dyn Clock>,
    max_age: chrono::Duration,
}

impl OnDemandQuoteService {
    pub fn new(
        provider: Arc<dyn TraitQuoteProvider + Send + Sync>,
        quotes: Arc<dyn TraitQuoteRepository + Send + Sync>,
        clock: Arc<dyn Clock>,
        max_age: Duration,
    ) -> Self {
        Self {
            provider,
            quotes,
            clock,
            max_age: chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX),
        }
    }

    pub async fn fetch(&self, symbols: &[String]) -> Result<BulkQuotes, QuoteError> {
        let wanted = normalize_request(symbols)?;

        let cached: HashMap<String, QuoteSnapshot> = match self.quotes.get_quotes(&wanted).await {
            Ok(rows) => rows.into_iter().map(|q| (q.symbol.clone(), q)).collect(),
            Err(e) => {
                warn!("Cache lookup failed, fetching everything from provider: {}", e);
                HashMap::new()
            }
        };

        let now = self.clock.now();
        let to_fetch: Vec<String> = wanted
            .iter()
            .filter(|s| !cached.get(*s).is_some_and(|q| q.is_fresh(now, self.max_age)))
            .cloned()
            .collect();

        let from_cache = wanted.len() - to_fetch.len();
        debug!(
            "Bulk request for {} symbols: {} fresh in cache, {} to fetch",
            wanted.len(),
            from_cache,
            to_fetch.len()
        );

        let mut resolved: HashMap<String, QuoteSnapshot> = cached
            .into_iter()
            .filter(|(symbol, _)| !to_fetch.contains(symbol))
            .collect();
        let mut fetched = 0;
        let mut warning = None;

        if !to_fetch.is_empty() {
            match self.provider.fetch_bulk_quotes(&to_fetch).await {
                Ok(quotes) => {
                    if let Err(e) = self.quotes.upsert_quotes(&quotes).await {
                        error!("Failed to cache {} fetched quotes: {}", quotes.len(), e);
                    }
                    fetched = quotes.len();
                    info!("Fetched {} of {} requested quotes from provider", fetched, to_fetch.len());
                    resolved.extend(quotes.into_iter().map(|q| (q.symbol.clone(), q)));
                }
                Err(e) => {
                    let stale = self.stale_fallback(&to_fetch).await;
                    if resolved.is_empty() && stale.is_empty() {
                        error!("Bulk quote fetch failed with nothing cached: {}", e);
                        return Err(e);
                    }
                    warn!("Bulk quote fetch failed, serving cached data: {}", e);
                    warning = Some(format!("Serving cached data, provider unavailable: {}", e));
                    resolved.extend(stale.into_iter().map(|q| (q.symbol.clone(), q)));
                }
            }
        }

        let mut quotes = Vec::with_capacity(wanted.len());
        let mut missing = Vec::new();
        for symbol in wanted {
            match resolved.remove(&symbol) {
                Some(quote) => quotes.push(quote),
                None => missing.push(symbol),
            }
        }

        Ok(BulkQuotes {
            quotes,
            from_cache,
            fetched,
            missing,
            warning,
        })
    }

    async fn stale_fallback(&self, symbols: &[String]) -> Vec<QuoteSnapshot> {
        self.quotes.get_quotes(symbols).await.unwrap_or_else(|e| {
            warn!("Stale cache fallback read failed: {}", e);
            Vec::new()
        })
    }
}

/// Trimmed, upper-case, de-duplicated symbols in first-seen order.
fn normalize_request(symbols: &[String]) -> Result<Vec<String>, QuoteError> {
    let mut wanted: Vec<String> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let symbol = symbol.trim().to_uppercase();
        if !symbol.is_empty() && !wanted.contains(&symbol) {
            wanted.push(symbol);
        }
    }

    if wanted.is_empty() {
        return Err(QuoteError::EmptyRequest);
    }
    if wanted.len() > MAX_SYMBOLS_PER_BATCH {
        return Err(QuoteError::BatchTooLarge {
            size: wanted.len(),
            limit: MAX_SYMBOLS_PER_BATCH,
        });
    }

    Ok(wanted)
}
