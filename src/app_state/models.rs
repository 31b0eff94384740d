use crate::db::postgres::postgres_service::PostgresService;
use crate::env_config::models::app_setting::AppSettings;
use crate::services::quotes::cache_reader::QuoteCacheReader;
use crate::services::quotes::on_demand::OnDemandQuoteService;
use crate::services::quotes::provider::AlphaVantageClient;
use crate::services::quotes::refresher::QuoteRefresher;
use crate::services::quotes::stats::CacheStatsService;
use crate::utils::clock::Clock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct AppState {
    pub settings: Arc<AppSettings>,
    pub postgres_service: Arc<PostgresService>,
    pub clock: Arc<dyn Clock>,

    // Quote services
    pub refresher: Arc<QuoteRefresher>,
    pub cache_reader: Arc<QuoteCacheReader>,
    pub on_demand: Arc<OnDemandQuoteService>,
    pub stats: Arc<CacheStatsService>,

    // Provider clients, one per caller so their throttles stay independent
    pub refresh_provider: Arc<AlphaVantageClient>,
    pub on_demand_provider: Arc<AlphaVantageClient>,

    /// Cancelled on shutdown; in-flight refresh runs stop at the next batch
    pub shutdown: CancellationToken,
}
