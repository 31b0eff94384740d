mod api;
mod app_state;
mod db;
mod env_config;
mod layers;
mod logger;
mod services;
mod utils;

use app_state::models::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use db::postgres::postgres_service::PostgresService;
use env_config::models::{app_config::AppConfig, app_env::AppEnv, app_setting::AppSettings};
use layers::{create_cors, create_trace};
use services::quotes::{
    cache_reader::QuoteCacheReader,
    on_demand::OnDemandQuoteService,
    provider::AlphaVantageClient,
    refresher::{QuoteRefresher, RefreshSettings},
    resolver::SymbolResolver,
    scheduler::QuotesScheduler,
    stats::CacheStatsService,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use utils::clock::{Clock, SystemClock};

#[tokio::main]
async fn main() {
    // Settings and logging
    let settings: Arc<AppSettings> = Arc::new(initialize_application());

    // Database
    let postgres_service = initialize_database_connection(settings.clone()).await;

    let server_address: SocketAddr = format!(
        "{}:{}",
        settings.app_env.server_address, settings.app_env.server_port,
    )
    .parse()
    .expect("Invalid server address configuration");

    info!("Server will listen on: {}", server_address);

    let shutdown = CancellationToken::new();

    // Global application state
    let app_state: Arc<AppState> =
        Arc::new(build_app_state(settings.clone(), postgres_service, shutdown.clone()));

    // Background refresh
    let scheduler_handle = initialize_background_services(app_state.clone());

    let app_router = create_application_router(app_state.clone());

    start_http_server(app_router, server_address, shutdown.clone()).await;

    // Stop the scheduler and any refresh still running
    shutdown.cancel();
    if let Some(handle) = scheduler_handle {
        if let Err(err) = handle.await {
            error!("Quotes scheduler task ended abnormally: {}", err);
        }
    }

    info!("Application stopped");
}

/// Loads settings and initializes logging
fn initialize_application() -> AppSettings {
    let environment = AppEnv::new();
    let config = AppConfig::new(&environment.env);
    let app_settings = AppSettings {
        app_config: config,
        app_env: environment,
    };

    logger::init_logger(
        &app_settings.app_config.log.level,
        &app_settings.app_config.log.format,
        app_settings.is_local(),
    )
    .expect("Failed to initialize logger");

    info!("Starting Quotes Service application...");
    info!("Current environment: {}", app_settings.app_env.env);

    if app_settings.is_local() {
        info!("Running in local development mode");
        debug!("Configuration details: {:#?}", app_settings.app_config);
    } else {
        info!("Running in production mode");
    }

    app_settings
}

async fn initialize_database_connection(settings: Arc<AppSettings>) -> PostgresService {
    info!("Initializing database connection...");

    match PostgresService::new(&settings).await {
        Ok(service) => {
            info!("PostgreSQL connection established successfully");
            service
        }
        Err(err) => {
            error!("Failed to connect to PostgreSQL: {}", err);
            panic!("Cannot continue without PostgreSQL connection");
        }
    }
}

/// Wires repositories, provider clients and quote services together
fn build_app_state(
    settings: Arc<AppSettings>,
    postgres_service: PostgresService,
    shutdown: CancellationToken,
) -> AppState {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let config = &settings.app_config;
    let api_key = &settings.app_env.alpha_vantage_api_key;

    let create_client = || {
        match AlphaVantageClient::new(&config.provider, api_key.as_str(), clock.clone()) {
            Ok(client) => Arc::new(client),
            Err(err) => {
                error!("Failed to build quote provider client: {}", err);
                panic!("Cannot continue without a quote provider client");
            }
        }
    };

    let refresh_provider = create_client();
    let on_demand_provider = create_client();

    let refresher = Arc::new(QuoteRefresher::new(
        SymbolResolver::new(postgres_service.repository_symbol.clone(), clock.clone()),
        refresh_provider.clone(),
        postgres_service.repository_quote.clone(),
        postgres_service.repository_refresh_run.clone(),
        clock.clone(),
        RefreshSettings::from_config(&config.quotes_refresher),
    ));

    let cache_reader = Arc::new(QuoteCacheReader::new(
        postgres_service.repository_quote.clone(),
        clock.clone(),
    ));

    let on_demand = Arc::new(OnDemandQuoteService::new(
        on_demand_provider.clone(),
        postgres_service.repository_quote.clone(),
        clock.clone(),
        Duration::from_millis(config.quote_cache.on_demand_max_age_ms),
    ));

    let stats = Arc::new(CacheStatsService::new(
        postgres_service.repository_quote.clone(),
        postgres_service.repository_refresh_run.clone(),
        clock.clone(),
    ));

    AppState {
        settings,
        postgres_service: Arc::new(postgres_service),
        clock,
        refresher,
        cache_reader,
        on_demand,
        stats,
        refresh_provider,
        on_demand_provider,
        shutdown,
    }
}

fn create_application_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api-health", get(api::health_api))
        .route("/db-health", get(api::health_db))
        .route("/quotes", get(api::get_quotes))
        .route("/quotes/bulk", post(api::bulk_quotes))
        .route(
            "/quotes/refresh",
            get(api::refresh_status).post(api::trigger_refresh),
        )
        .layer(axum::Extension(app_state))
        .layer(create_cors())
        .layer(create_trace())
}

async fn start_http_server(app: Router, addr: SocketAddr, shutdown: CancellationToken) {
    info!("Starting HTTP server on {}", addr);

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("Failed to bind to address {}: {}", addr, err);
            panic!("Cannot start server: {}", err);
        }
    };

    info!("Server started successfully, now accepting connections");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
    {
        error!("Server error: {}", err);
        panic!("Server failed: {}", err);
    }
}

/// Resolves on Ctrl+C or SIGTERM and cancels `shutdown` so running refreshes
/// stop before the server drains
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                error!("Failed to install signal handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    shutdown.cancel();
}

fn initialize_background_services(app_state: Arc<AppState>) -> Option<JoinHandle<()>> {
    let scheduler = Arc::new(QuotesScheduler::new(
        app_state.refresher.clone(),
        app_state.settings.app_config.quotes_refresher.clone(),
        app_state.clock.clone(),
    ));

    let handle = scheduler.start(app_state.shutdown.clone());

    info!("Background services initialized successfully");
    handle
}
