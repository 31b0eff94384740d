use super::error::ApiError;
use crate::app_state::models::AppState;
use crate::db::postgres::models::cache_stats::CacheStats;
use crate::db::postgres::models::refresh_run::{RefreshRun, RunStatus};
use crate::services::quotes::rate_limiter::RequestUsage;
use crate::services::quotes::refresher::RefreshSummary;
use axum::{
    Json,
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const API_KEY_HEADER: &str = "x-api-key";
const RECENT_RUNS_LIMIT: u32 = 10;

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    /// Overrides the configured scheduler policy
    pub stale_only: Option<bool>,
    pub age_minutes: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUsage {
    pub refresh: RequestUsage,
    pub on_demand: RequestUsage,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatusResponse {
    pub cache: CacheStats,
    pub recent_runs: Vec<RefreshRun>,
    pub provider_usage: ProviderUsage,
}

pub async fn refresh_status(
    Extension(app_state): Extension<Arc<AppState>>,
) -> Result<Json<RefreshStatusResponse>, ApiError> {
    let stale_after = app_state
        .settings
        .app_config
        .quote_cache
        .stats_stale_after_minutes;

    let cache = app_state.stats.cache_stats(stale_after).await?;
    let recent_runs = app_state.stats.recent_runs(RECENT_RUNS_LIMIT).await?;

    Ok(Json(RefreshStatusResponse {
        cache,
        recent_runs,
        provider_usage: ProviderUsage {
            refresh: app_state.refresh_provider.usage(),
            on_demand: app_state.on_demand_provider.usage(),
        },
    }))
}

/// External cron entry point. Runs a refresh to completion and reports its summary.
pub async fn trigger_refresh(
    Extension(app_state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<RefreshSummary>), ApiError> {
    if !is_authorized(&headers, &app_state.settings.app_env.cron_secret) {
        warn!("Rejected refresh trigger with missing or invalid API key");
        return Err(ApiError::Unauthorized);
    }

    let request = parse_request(&body);
    let refresher_config = &app_state.settings.app_config.quotes_refresher;
    let stale_only = request.stale_only.unwrap_or(refresher_config.stale_only);
    let age_minutes = request
        .age_minutes
        .unwrap_or(refresher_config.stale_age_minutes);

    info!(
        "Refresh triggered over HTTP (stale_only: {}, age_minutes: {})",
        stale_only, age_minutes
    );

    let cancel = app_state.shutdown.child_token();
    let summary = if stale_only {
        app_state
            .refresher
            .refresh_stale_quotes(age_minutes, &cancel)
            .await?
    } else {
        app_state.refresher.refresh_all_quotes(&cancel).await?
    };

    let status = if summary.status == RunStatus::Failed {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };

    Ok((status, Json(summary)))
}

fn is_authorized(headers: &HeaderMap, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|key| key == secret)
}

/// An empty or unparseable body falls back to the configured policy
fn parse_request(body: &[u8]) -> RefreshRequest {
    if body.iter().all(u8::is_ascii_whitespace) {
        return RefreshRequest::default();
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        warn!("Ignoring invalid refresh request body: {}", e);
        RefreshRequest::default()
    })
}
