use crate::services::quotes::error::QuoteError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    Quote(QuoteError),
    Unauthorized,
}

impl From<QuoteError> for ApiError {
    fn from(err: QuoteError) -> Self {
        ApiError::Quote(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Quote(QuoteError::BatchTooLarge { .. } | QuoteError::EmptyRequest) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Quote(QuoteError::RateLimited(_)) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Quote(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Quote(err) => err.to_string(),
            ApiError::Unauthorized => "unauthorized".to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
