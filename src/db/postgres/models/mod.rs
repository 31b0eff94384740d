pub mod cache_stats;
pub mod quote_snapshot;
pub mod refresh_run;
