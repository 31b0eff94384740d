use thiserror::Error;

/// Largest symbol list the provider accepts in one bulk request
pub const MAX_SYMBOLS_PER_BATCH: usize = 100;

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("batch of {size} symbols exceeds the provider limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("no symbols requested")]
    EmptyRequest,
}

impl From<sqlx::Error> for QuoteError {
    fn from(err: sqlx::Error) -> Self {
        QuoteError::StorageUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for QuoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            QuoteError::Transport(format!("request timed out: {}", err))
        } else {
            QuoteError::Transport(err.to_string())
        }
    }
}

impl QuoteError {
    /// The provider asked us to stop calling it for now.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, QuoteError::RateLimited(_))
    }
}
