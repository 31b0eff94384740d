use super::error::QuoteError;
use crate::db::postgres::repository::symbol_repository::TraitSymbolRepository;
use crate::utils::clock::Clock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error};

/// Works out which symbols a refresh run should price.
pub struct SymbolResolver {
    repository: Arc<dyn TraitSymbolRepository + Send + Sync>,
    clock: Arc<dyn Clock>,
}

impl SymbolResolver {
    pub fn new(repository: Arc<dyn TraitSymbolRepository + Send + Sync>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    pub async fn active_symbols(&self) -> Result<BTreeSet<String>, QuoteError> {
        let raw = self.repository.get_active_symbols().await.map_err(|e| {
            error!("Symbol resolution failed: {}", e);
            QuoteError::from(e)
        })?;

        let symbols = normalize_symbols(raw);
        debug!("Resolved {} active symbols", symbols.len());
        Ok(symbols)
    }

    /// Active symbols without a quote newer than `max_age_minutes`
    pub async fn stale_symbols(&self, max_age_minutes: u32) -> Result<BTreeSet<String>, QuoteError> {
        let cutoff = self.clock.now() - chrono::Duration::minutes(i64::from(max_age_minutes));

        let raw = self.repository.get_stale_symbols(cutoff).await.map_err(|e| {
            error!("Stale symbol resolution failed: {}", e);
            QuoteError::from(e)
        })?;

        let symbols = normalize_symbols(raw);
        debug!(
            "Resolved {} symbols older than {} minutes",
            symbols.len(),
            max_age_minutes
        );
        Ok(symbols)
    }
}

fn normalize_symbols(raw: Vec<String>) -> BTreeSet<String> {
    raw.into_iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
