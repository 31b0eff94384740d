use crate::env_config::models::app_setting::AppSettings;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct PostgresConnection {
    pool: Pool<Postgres>,
}

impl PostgresConnection {
    pub async fn new(settings: Arc<AppSettings>) -> Result<Self, sqlx::Error> {
        info!("Initializing PostgreSQL connection...");

        let env = &settings.app_env;
        let pg_config = &settings.app_config.postgres;

        let connection_string = format!(
            "postgres://{}:{}@{}/{}",
            env.postgres_user, env.postgres_password, env.postgres_host, env.postgres_database
        );

        let pool = PgPoolOptions::new()
            .max_connections(pg_config.max_connections)
            .min_connections(pg_config.min_connections)
            .max_lifetime(Duration::from_secs(pg_config.max_lifetime))
            .idle_timeout(Duration::from_secs(pg_config.idle_timeout))
            .acquire_timeout(Duration::from_secs(pg_config.timeout))
            .connect(&connection_string)
            .await?;

        debug!("Executing test query on PostgreSQL");
        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            error!("Failed to connect to PostgreSQL: {}", e);
            return Err(e);
        }
        info!("PostgreSQL connection successful");

        if pg_config.run_migrations {
            info!("Applying quote cache migrations");
            sqlx::migrate!("./migrations").run(&pool).await?;
        }

        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}
