use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of a refresh run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    /// Terminal status of a run that attempted every batch it was going to attempt.
    pub fn from_outcome(symbols_processed: usize, error_count: usize) -> RunStatus {
        if error_count == 0 {
            RunStatus::Completed
        } else if symbols_processed > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// Row of `quote_refresh_log`
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: String,
    pub symbols_requested: i32,
    pub symbols_processed: i32,
    pub api_calls_made: i32,
    pub error_summary: Option<String>,
}

/// Values written when a run reaches its terminal status
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub completed_at: DateTime<Utc>,
    pub symbols_processed: i32,
    pub api_calls_made: i32,
    pub error_summary: Option<String>,
}
