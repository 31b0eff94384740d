use super::error::{MAX_SYMBOLS_PER_BATCH, QuoteError};
use super::rate_limiter::{RequestRateLimiter, RequestUsage};
use crate::db::postgres::models::quote_snapshot::QuoteSnapshot;
use crate::env_config::models::app_config::ProviderConfig;
use crate::utils::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait TraitQuoteProvider {
    /// One bulk request for up to 100 symbols. Symbols the provider does not
    /// know are missing from the result.
    async fn fetch_bulk_quotes(&self, symbols: &[String]) -> Result<Vec<QuoteSnapshot>, QuoteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteField {
    Symbol,
    Open,
    High,
    Low,
    Price,
    Volume,
    LatestTradingDay,
    PreviousClose,
    Change,
    ChangePercent,
}

/// Provider keys for each normalized field. The numbered keys are the bulk
/// endpoint's documented scheme; the flat keys are its alternate payload.
const FIELD_KEYS: [(QuoteField, &[&str]); 10] = [
    (QuoteField::Symbol, &["01. symbol", "symbol"]),
    (QuoteField::Open, &["02. open", "open"]),
    (QuoteField::High, &["03. high", "high"]),
    (QuoteField::Low, &["04. low", "low"]),
    (QuoteField::Price, &["05. price", "close", "price"]),
    (QuoteField::Volume, &["06. volume", "volume"]),
    (
        QuoteField::LatestTradingDay,
        &["07. latest trading day", "latest_trading_day", "timestamp"],
    ),
    (QuoteField::PreviousClose, &["08. previous close", "previous_close"]),
    (QuoteField::Change, &["09. change", "change"]),
    (QuoteField::ChangePercent, &["10. change percent", "change_percent"]),
];

const ERROR_MESSAGE_KEY: &str = "Error Message";
const RATE_LIMIT_KEYS: [&str; 2] = ["Note", "Information"];

pub struct AlphaVantageClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: RequestRateLimiter,
    clock: Arc<dyn Clock>,
}

impl AlphaVantageClient {
    pub fn new(
        config: &ProviderConfig,
        api_key: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QuoteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        let limiter = RequestRateLimiter::new(
            clock.clone(),
            Duration::from_millis(config.min_call_interval_ms),
            config.daily_request_limit,
        );

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            limiter,
            clock,
        })
    }

    pub fn usage(&self) -> RequestUsage {
        self.limiter.usage()
    }

    fn build_request(&self, symbols: &[String]) -> Result<reqwest::Request, QuoteError> {
        let joined = symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .collect::<Vec<_>>()
            .join(",");

        let request = self
            .http
            .get(format!("{}/query", self.base_url))
            .query(&[
                ("function", "REALTIME_BULK_QUOTES"),
                ("symbol", joined.as_str()),
                ("apikey", self.api_key.as_str()),
                ("datatype", "json"),
            ])
            .build()?;

        Ok(request)
    }
}

#[async_trait]
impl TraitQuoteProvider for AlphaVantageClient {
    async fn fetch_bulk_quotes(&self, symbols: &[String]) -> Result<Vec<QuoteSnapshot>, QuoteError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        if symbols.len() > MAX_SYMBOLS_PER_BATCH {
            return Err(QuoteError::BatchTooLarge {
                size: symbols.len(),
                limit: MAX_SYMBOLS_PER_BATCH,
            });
        }

        let wait = self.limiter.reserve()?;
        if !wait.is_zero() {
            debug!("Provider throttle: waiting {}ms before next call", wait.as_millis());
            tokio::time::sleep(wait).await;
        }

        let request = self.build_request(symbols)?;
        debug!("Requesting bulk quotes for {} symbols", symbols.len());

        let response = self.http.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;

        parse_bulk_response(status, &body, self.clock.now())
    }
}

/// Classifies a provider response and normalizes its quotes.
pub fn parse_bulk_response(
    status: StatusCode,
    body: &str,
    now: DateTime<Utc>,
) -> Result<Vec<QuoteSnapshot>, QuoteError> {
    if !status.is_success() {
        return Err(QuoteError::Transport(format!("provider returned HTTP {}", status)));
    }

    let payload: Value = serde_json::from_str(body)
        .map_err(|e| QuoteError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    let Some(object) = payload.as_object() else {
        return Err(QuoteError::MalformedResponse(
            "payload is not a JSON object".to_string(),
        ));
    };

    if let Some(message) = object.get(ERROR_MESSAGE_KEY) {
        return Err(QuoteError::Provider(message_text(message)));
    }

    if let Some(message) = RATE_LIMIT_KEYS.iter().find_map(|key| object.get(*key)) {
        return Err(QuoteError::RateLimited(message_text(message)));
    }

    match object.get("data") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(entries)) => {
            let quotes: Vec<QuoteSnapshot> = entries
                .iter()
                .filter_map(|entry| entry.as_object())
                .filter_map(|entry| normalize_quote(entry, now))
                .collect();

            if quotes.len() < entries.len() {
                warn!(
                    "Dropped {} provider entries without a usable symbol",
                    entries.len() - quotes.len()
                );
            }

            Ok(quotes)
        }
        Some(_) => Err(QuoteError::MalformedResponse(
            "\"data\" is not an array".to_string(),
        )),
    }
}

/// Maps one provider entry to a snapshot stamped at `now`. Numeric fields
/// that are blank or malformed become zero; entries without a symbol yield `None`.
pub fn normalize_quote(entry: &Map<String, Value>, now: DateTime<Utc>) -> Option<QuoteSnapshot> {
    let symbol = field(entry, QuoteField::Symbol)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())?;

    Some(QuoteSnapshot {
        symbol,
        price: parse_price(field(entry, QuoteField::Price)),
        open: parse_price(field(entry, QuoteField::Open)),
        high: parse_price(field(entry, QuoteField::High)),
        low: parse_price(field(entry, QuoteField::Low)),
        volume: parse_volume(field(entry, QuoteField::Volume)),
        latest_trading_day: parse_trading_day(field(entry, QuoteField::LatestTradingDay))
            .unwrap_or_else(|| now.date_naive()),
        previous_close: parse_price(field(entry, QuoteField::PreviousClose)),
        change: parse_decimal(field(entry, QuoteField::Change)),
        change_percent: parse_change_percent(field(entry, QuoteField::ChangePercent)),
        last_updated: now,
    })
}

fn field(entry: &Map<String, Value>, wanted: QuoteField) -> Option<&Value> {
    FIELD_KEYS
        .iter()
        .find(|(f, _)| *f == wanted)
        .and_then(|(_, keys)| keys.iter().find_map(|key| entry.get(*key)))
}

fn message_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_decimal(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn parse_price(value: Option<&Value>) -> f64 {
    parse_decimal(value).max(0.0)
}

fn parse_volume(value: Option<&Value>) -> i64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    };
    parsed.unwrap_or(0).max(0)
}

fn parse_change_percent(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => format!("{}%", n),
        _ => "0%".to_string(),
    }
}

fn parse_trading_day(value: Option<&Value>) -> Option<NaiveDate> {
    let raw = value?.as_str()?.trim();
    // "2025-03-03" or a timestamp such as "2025-03-03 16:00:00"
    let date_part = raw.split([' ', 'T']).next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}
