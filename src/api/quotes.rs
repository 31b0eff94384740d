use super::error::ApiError;
use crate::app_state::models::AppState;
use crate::db::postgres::models::quote_snapshot::QuoteSnapshot;
use crate::services::quotes::cache_reader::StalePolicy;
use crate::services::quotes::error::{MAX_SYMBOLS_PER_BATCH, QuoteError};
use crate::services::quotes::on_demand::BulkQuotes;
use crate::utils::clock::Clock;
use axum::{
    Json,
    extract::{Extension, Query},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct QuotesQuery {
    /// Comma separated symbols
    pub symbols: String,
    pub max_age_ms: Option<u64>,
    #[serde(default)]
    pub allow_stale: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotesResponse {
    pub quotes: HashMap<String, Option<QuoteSnapshot>>,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct BulkQuotesRequest {
    pub symbols: Vec<String>,
}

/// Cache-only read, never calls the provider
pub async fn get_quotes(
    Extension(app_state): Extension<Arc<AppState>>,
    Query(query): Query<QuotesQuery>,
) -> Result<Json<QuotesResponse>, ApiError> {
    let symbols = split_symbols(&query.symbols)?;

    let max_age = Duration::from_millis(
        query
            .max_age_ms
            .unwrap_or(app_state.settings.app_config.quote_cache.read_max_age_ms),
    );
    let policy = if query.allow_stale {
        StalePolicy::AllowStale
    } else {
        StalePolicy::FreshOnly
    };

    let quotes = app_state
        .cache_reader
        .get_quotes(&symbols, max_age, policy)
        .await?;

    Ok(Json(QuotesResponse {
        quotes,
        as_of: app_state.clock.now(),
    }))
}

pub async fn bulk_quotes(
    Extension(app_state): Extension<Arc<AppState>>,
    Json(request): Json<BulkQuotesRequest>,
) -> Result<Json<BulkQuotes>, ApiError> {
    let result = app_state.on_demand.fetch(&request.symbols).await?;
    Ok(Json(result))
}

fn split_symbols(raw: &str) -> Result<Vec<String>, QuoteError> {
    let symbols: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if symbols.is_empty() {
        return Err(QuoteError::EmptyRequest);
    }
    if symbols.len() > MAX_SYMBOLS_PER_BATCH {
        return Err(QuoteError::BatchTooLarge {
            size: symbols.len(),
            limit: MAX_SYMBOLS_PER_BATCH,
        });
    }

    Ok(symbols)
}
