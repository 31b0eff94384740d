mod error;
mod health_api;
mod health_db;
mod quotes;
mod refresh;

pub use health_api::health_api;
pub use health_db::health_db;
pub use quotes::{bulk_quotes, get_quotes};
pub use refresh::{refresh_status, trigger_refresh};
