use chrono::NaiveTime;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub log: LogConfig,
    pub postgres: PostgresConfig,
    pub provider: ProviderConfig,
    pub quotes_refresher: QuotesRefresherConfig,
    pub quote_cache: QuoteCacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotesRefresherConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    #[serde(default)]
    pub start_time: Option<String>, // UTC, "HH:MM:SS"
    #[serde(default)]
    pub end_time: Option<String>, // UTC, "HH:MM:SS"
    #[serde(default)]
    pub stale_only: bool,
    #[serde(default = "default_stale_age_minutes")]
    pub stale_age_minutes: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
    #[serde(default = "default_persist_attempts")]
    pub persist_attempts: u32,
    #[serde(default = "default_persist_retry_delay_ms")]
    pub persist_retry_delay_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    #[serde(default = "default_min_call_interval_ms")]
    pub min_call_interval_ms: u64,
    #[serde(default)]
    pub daily_request_limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct QuoteCacheConfig {
    /// Freshness window for `GET /quotes` when the caller does not pass one.
    pub read_max_age_ms: u64,
    /// Freshness window used by the on-demand bulk fetch before calling the provider.
    pub on_demand_max_age_ms: u64,
    /// Age after which a quote counts as stale in cache statistics.
    pub stats_stale_after_minutes: u32,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Deserialize)]
pub struct PostgresConfig {
    pub timeout: u64,
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime: u64,
    pub idle_timeout: u64,
    #[serde(default)]
    pub run_migrations: bool,
}

fn default_stale_age_minutes() -> u32 {
    60
}

fn default_batch_size() -> usize {
    100
}

fn default_inter_batch_delay_ms() -> u64 {
    12_000
}

fn default_persist_attempts() -> u32 {
    2
}

fn default_persist_retry_delay_ms() -> u64 {
    500
}

fn default_min_call_interval_ms() -> u64 {
    1_500
}

impl QuotesRefresherConfig {
    /// Checks if `now` (UTC time of day) is within the allowed operation window
    pub fn is_operation_allowed_at(&self, now: NaiveTime) -> bool {
        // If no time window is configured, always allow operation
        let (Some(start_str), Some(end_str)) = (&self.start_time, &self.end_time) else {
            return true;
        };

        if let (Ok(start), Ok(end)) = (
            NaiveTime::parse_from_str(start_str, "%H:%M:%S"),
            NaiveTime::parse_from_str(end_str, "%H:%M:%S"),
        ) {
            if start <= end {
                return start <= now && now <= end;
            } else {
                // Window crosses midnight, e.g. start=21:00:00, end=04:00:00
                return start <= now || now <= end;
            }
        }

        // If parsing fails, default to allowing operation
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [log]
        level = "info"
        format = "plain"

        [postgres]
        timeout = 5
        max_connections = 10
        min_connections = 1
        max_lifetime = 1800
        idle_timeout = 600

        [provider]
        base_url = "https://www.alphavantage.co"
        timeout_seconds = 30

        [quotes_refresher]
        enabled = true
        interval_seconds = 3600
        start_time = "21:00:00"
        end_time = "04:00:00"

        [quote_cache]
        read_max_age_ms = 600000
        on_demand_max_age_ms = 600000
        stats_stale_after_minutes = 60
    "#;

    fn time(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M:%S").unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let refresher = &config.quotes_refresher;

        assert_eq!(refresher.batch_size, 100);
        assert_eq!(refresher.inter_batch_delay_ms, 12_000);
        assert_eq!(refresher.persist_attempts, 2);
        assert_eq!(refresher.stale_age_minutes, 60);
        assert!(!refresher.stale_only);
        assert_eq!(config.provider.min_call_interval_ms, 1_500);
        assert_eq!(config.provider.daily_request_limit, None);
        assert!(!config.postgres.run_migrations);
    }

    #[test]
    fn test_operation_window_across_midnight() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let refresher = &config.quotes_refresher;

        assert!(refresher.is_operation_allowed_at(time("22:15:00")));
        assert!(refresher.is_operation_allowed_at(time("03:59:59")));
        assert!(!refresher.is_operation_allowed_at(time("12:00:00")));
    }

    #[test]
    fn test_operation_window_unset_or_invalid() {
        let mut config = AppConfig::from_toml(SAMPLE).unwrap();
        config.quotes_refresher.end_time = None;
        assert!(config.quotes_refresher.is_operation_allowed_at(time("12:00:00")));

        config.quotes_refresher.end_time = Some("not a time".to_string());
        assert!(config.quotes_refresher.is_operation_allowed_at(time("12:00:00")));
    }
}
