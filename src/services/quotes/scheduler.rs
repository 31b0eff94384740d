use super::error::QuoteError;
use super::refresher::{QuoteRefresher, RefreshSummary};
use crate::env_config::models::app_config::QuotesRefresherConfig;
use crate::utils::clock::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct QuotesScheduler {
    refresher: Arc<QuoteRefresher>,
    config: QuotesRefresherConfig,
    clock: Arc<dyn Clock>,
}

impl QuotesScheduler {
    pub fn new(
        refresher: Arc<QuoteRefresher>,
        config: QuotesRefresherConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            refresher,
            config,
            clock,
        }
    }

    /// Runs one refresh using the configured policy
    pub async fn trigger_update(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RefreshSummary, QuoteError> {
        if self.config.stale_only {
            self.refresher
                .refresh_stale_quotes(self.config.stale_age_minutes, cancel)
                .await
        } else {
            self.refresher.refresh_all_quotes(cancel).await
        }
    }

    /// Spawns the interval loop. Returns `None` when the scheduler is disabled.
    /// Cancelling `cancel` stops the loop and interrupts a run in progress.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            info!("Quotes scheduler is disabled in configuration");
            return None;
        }

        if let (Some(start), Some(end)) = (&self.config.start_time, &self.config.end_time) {
            info!("Scheduler operation window configured: {} to {} UTC", start, end);
        }

        info!(
            "Starting quotes scheduler with {} second interval ({})",
            self.config.interval_seconds,
            if self.config.stale_only {
                format!("stale only, older than {} minutes", self.config.stale_age_minutes)
            } else {
                "all active symbols".to_string()
            }
        );

        let mut interval = time::interval(Duration::from_secs(self.config.interval_seconds.max(1)));
        // A run longer than the interval pushes the next tick back instead of bursting
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let now = self.clock.now();
                if !self.config.is_operation_allowed_at(now.time()) {
                    debug!(
                        "Scheduler: skipping update - outside operation window (current time: {})",
                        now.format("%H:%M:%S")
                    );
                    continue;
                }

                info!("Scheduler: triggering quotes refresh");

                match self.trigger_update(&cancel).await {
                    Ok(summary) => info!(
                        "Scheduler: refresh finished as {}, {}/{} symbols updated",
                        summary.status, summary.symbols_processed, summary.symbols_requested
                    ),
                    Err(e) => error!("Scheduler: failed to refresh quotes: {}", e),
                }
            }

            info!("Quotes scheduler stopped");
        }))
    }
}
