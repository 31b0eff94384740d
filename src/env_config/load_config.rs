use super::models::{app_config::AppConfig, app_env::Env};
use std::fs;

impl AppConfig {
    /// Loads `config/<env>.toml`, or the file named by `CONFIG_PATH` when set.
    pub fn new(env: &Env) -> AppConfig {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| format!("config/{}.toml", env));

        let raw = fs::read_to_string(&path)
            .unwrap_or_else(|err| panic!("Failed to read config file {}: {}", path, err));

        AppConfig::from_toml(&raw)
            .unwrap_or_else(|err| panic!("Failed to parse config file {}: {}", path, err))
    }

    pub fn from_toml(raw: &str) -> Result<AppConfig, toml::de::Error> {
        toml::from_str(raw)
    }
}
