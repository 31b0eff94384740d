use crate::db::postgres::connection::PostgresConnection;
use crate::db::postgres::repository::{
    health_check_repository::{StructHealthCheckRepository, TraitHealthCheckRepository},
    quote_repository::{StructQuoteRepository, TraitQuoteRepository},
    refresh_run_repository::{StructRefreshRunRepository, TraitRefreshRunRepository},
    symbol_repository::{StructSymbolRepository, TraitSymbolRepository},
};
use crate::env_config::models::app_setting::AppSettings;
use std::sync::Arc;
use tracing::{error, info};

pub struct PostgresService {
    // Connection
    pub connection: Arc<PostgresConnection>,

    // Repositories
    pub repository_health_check: Arc<dyn TraitHealthCheckRepository + Send + Sync>,
    pub repository_quote: Arc<dyn TraitQuoteRepository + Send + Sync>,
    pub repository_symbol: Arc<dyn TraitSymbolRepository + Send + Sync>,
    pub repository_refresh_run: Arc<dyn TraitRefreshRunRepository + Send + Sync>,
}

impl PostgresService {
    pub async fn new(settings: &Arc<AppSettings>) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Initializing PostgreSQL service components");

        let postgres_connection = match PostgresConnection::new(settings.clone()).await {
            Ok(conn) => {
                info!("PostgreSQL connection established successfully");
                Arc::new(conn)
            }
            Err(e) => {
                error!("Failed to establish PostgreSQL connection: {}", e);
                return Err(Box::new(e));
            }
        };

        info!("Initializing repositories");

        let repository_health_check =
            Arc::new(StructHealthCheckRepository::new(postgres_connection.clone()))
                as Arc<dyn TraitHealthCheckRepository + Send + Sync>;

        let repository_quote = Arc::new(StructQuoteRepository::new(postgres_connection.clone()))
            as Arc<dyn TraitQuoteRepository + Send + Sync>;

        let repository_symbol = Arc::new(StructSymbolRepository::new(postgres_connection.clone()))
            as Arc<dyn TraitSymbolRepository + Send + Sync>;

        let repository_refresh_run =
            Arc::new(StructRefreshRunRepository::new(postgres_connection.clone()))
                as Arc<dyn TraitRefreshRunRepository + Send + Sync>;

        info!("PostgreSQL service initialized successfully");
        Ok(Self {
            connection: postgres_connection,
            repository_health_check,
            repository_quote,
            repository_symbol,
            repository_refresh_run,
        })
    }
}
