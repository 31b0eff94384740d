use super::{app_config::AppConfig, app_env::AppEnv};

/// Environment variables plus the per-environment TOML config.
#[derive(Debug)]
pub struct AppSettings {
    pub app_config: AppConfig,
    pub app_env: AppEnv,
}

impl AppSettings {
    pub fn is_local(&self) -> bool {
        self.app_env.is_local()
    }
}
