use axum::{extract::Extension, http::StatusCode};
use std::sync::Arc;
use tracing::error;

use crate::app_state::models::AppState;

pub async fn health_db(
    Extension(app_state): Extension<Arc<AppState>>,
) -> Result<StatusCode, StatusCode> {
    // Pool must answer and the quote cache table must exist
    let pg_health_check = match app_state
        .postgres_service
        .repository_health_check
        .check()
        .await
    {
        Ok(healthy) => healthy,
        Err(e) => {
            error!("PostgreSQL health check failed: {}", e);
            false
        }
    };

    if pg_health_check {
        Ok(StatusCode::OK)
    } else {
        Err(StatusCode::INTERNAL_SERVER_ERROR)
    }
}
