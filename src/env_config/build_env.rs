use super::models::app_env::{AppEnv, Env};
use std::env;
use std::str::FromStr;

impl AppEnv {
    /// Reads the process environment. Panics on a missing required variable.
    pub fn new() -> AppEnv {
        let env =
            Env::from_str(&get_env_var("ENV")).unwrap_or_else(|err| panic!("ENV -> {}", err));

        AppEnv {
            env,
            server_port: get_env_var("SERVER_PORT")
                .parse()
                .expect("SERVER_PORT must be a number"),
            server_address: get_env_var_or("SERVER_ADDRESS", "0.0.0.0"),
            postgres_host: get_env_var("POSTGRES_HOST"),
            postgres_user: get_env_var("POSTGRES_USER"),
            postgres_password: get_env_var("POSTGRES_PASSWORD"),
            postgres_database: get_env_var("POSTGRES_DATABASE"),
            alpha_vantage_api_key: get_env_var("ALPHA_VANTAGE_API_KEY"),
            // Empty disables the HTTP refresh trigger
            cron_secret: get_env_var_or("CRON_SECRET", ""),
        }
    }
}

fn get_env_var(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| panic!("ENV -> {} is not set", name))
}

fn get_env_var_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
