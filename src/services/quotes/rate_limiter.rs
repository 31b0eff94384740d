use super::error::QuoteError;
use crate::utils::clock::Clock;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Per-client request budget: minimum spacing between calls plus an optional
/// daily allowance that resets at the UTC date boundary.
pub struct RequestRateLimiter {
    clock: Arc<dyn Clock>,
    min_interval: chrono::Duration,
    daily_limit: Option<u32>,
    state: Mutex<LimiterState>,
}

#[derive(Debug)]
struct LimiterState {
    /// Start time of the most recently reserved call slot
    last_slot: Option<DateTime<Utc>>,
    day: NaiveDate,
    used: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestUsage {
    pub used: u32,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_date: NaiveDate,
}

impl RequestRateLimiter {
    pub fn new(clock: Arc<dyn Clock>, min_interval: Duration, daily_limit: Option<u32>) -> Self {
        let today = clock.now().date_naive();
        Self {
            clock,
            min_interval: chrono::Duration::from_std(min_interval)
                .unwrap_or_else(|_| chrono::Duration::zero()),
            daily_limit,
            state: Mutex::new(LimiterState {
                last_slot: None,
                day: today,
                used: 0,
            }),
        }
    }

    /// Reserves the next call slot and returns how long the caller must wait
    /// before issuing the request. Fails without reserving anything when the
    /// daily allowance is spent.
    pub fn reserve(&self) -> Result<Duration, QuoteError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        roll_day(&mut state, now);

        if let Some(limit) = self.daily_limit {
            if state.used >= limit {
                warn!("Daily provider request budget of {} exhausted", limit);
                return Err(QuoteError::RateLimited(format!(
                    "daily request budget of {} exhausted, resets after {}",
                    limit, state.day
                )));
            }
        }

        let slot = match state.last_slot {
            Some(last) if last + self.min_interval > now => last + self.min_interval,
            _ => now,
        };

        state.last_slot = Some(slot);
        state.used += 1;

        Ok((slot - now).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn usage(&self) -> RequestUsage {
        let now = self.clock.now();
        let mut state = self.state.lock();
        roll_day(&mut state, now);

        RequestUsage {
            used: state.used,
            limit: self.daily_limit,
            remaining: self.daily_limit.map(|limit| limit.saturating_sub(state.used)),
            reset_date: state.day,
        }
    }
}

fn roll_day(state: &mut LimiterState, now: DateTime<Utc>) {
    let today = now.date_naive();
    if today != state.day {
        state.day = today;
        state.used = 0;
    }
}
