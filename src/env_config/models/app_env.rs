use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum Env {
    Local,
    Dev,
    Prod,
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Env::Local => write!(f, "local"),
            Env::Dev => write!(f, "dev"),
            Env::Prod => write!(f, "prod"),
        }
    }
}

impl FromStr for Env {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Env::Local),
            "dev" => Ok(Env::Dev),
            "prod" => Ok(Env::Prod),
            other => Err(format!("Unknown environment: {}", other)),
        }
    }
}

#[derive(Debug)]
pub struct AppEnv {
    pub env: Env,
    pub server_port: u16,
    pub server_address: String,
    pub postgres_host: String,
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_database: String,
    pub alpha_vantage_api_key: String,
    pub cron_secret: String,
}

impl AppEnv {
    pub fn is_local(&self) -> bool {
        self.env == Env::Local
    }
}
