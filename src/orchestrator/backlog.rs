use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppResult;
use crate::metrics::compute_backlog;
use crate::worker::Worker;

const BYTES_PER_GB: u128 = 1_073_741_824;
/// Backlog, in messages, at which a drain counts as complete.
pub const DRAINED_BACKLOG: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    /// The drain budget ran out with `backlog` messages outstanding.
    TimedOut { backlog: i64 },
    Cancelled,
}

/// Builds a consumer backlog of the requested size by pausing consumers, then
/// drains it with producers paused. `draining` stays set from the start of
/// the build until the drain finishes.
pub struct BacklogManager {
    pub(crate) worker: Arc<dyn Worker>,
    pub(crate) subscriptions_per_topic: u32,
    pub(crate) message_size: usize,
    pub(crate) backlog_size_gb: u64,
    pub(crate) build_poll: Duration,
    pub(crate) drain_poll: Duration,
    pub(crate) drain_budget: Duration,
    pub(crate) draining: Arc<AtomicBool>,
    pub(crate) cancel: CancellationToken,
}

impl BacklogManager {
    fn target_bytes(&self) -> u128 {
        u128::from(self.backlog_size_gb).saturating_mul(BYTES_PER_GB)
    }

    async fn backlog(&self) -> Option<i64> {
        match self.worker.counters_stats().await {
            Ok(counters) => Some(compute_backlog(
                self.subscriptions_per_topic,
                counters.messages_sent,
                counters.messages_received,
            )),
            Err(err) => {
                warn!("Backlog poll failed: {}", err);
                None
            }
        }
    }

    async fn sleep(&self, period: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(period) => true,
        }
    }

    /// Runs the build phase followed by the drain phase. `draining` is
    /// cleared whenever this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if pausing or resuming workers fails.
    pub async fn run(self) -> AppResult<DrainOutcome> {
        let outcome = self.build_and_drain().await;
        self.draining.store(false, Ordering::Release);
        outcome
    }

    async fn build_and_drain(&self) -> AppResult<DrainOutcome> {
        info!(
            "Pausing consumers to build a {} GB backlog",
            self.backlog_size_gb
        );
        self.worker.pause_consumers().await?;
        self.draining.store(true, Ordering::Release);

        let target = self.target_bytes();
        let message_size = u128::try_from(self.message_size).unwrap_or(u128::MAX);
        loop {
            if let Some(backlog) = self.backlog().await {
                let messages = u128::try_from(backlog.max(0)).unwrap_or(0);
                if messages.saturating_mul(message_size) >= target {
                    info!("Backlog reached {} messages", backlog);
                    break;
                }
            }
            if !self.sleep(self.build_poll).await {
                return Ok(DrainOutcome::Cancelled);
            }
        }

        self.drain().await
    }

    async fn drain(&self) -> AppResult<DrainOutcome> {
        info!("Draining backlog");
        self.worker.pause_producers().await?;
        self.worker.resume_consumers().await?;

        let started = Instant::now();
        let mut last_backlog = None;
        while started.elapsed() < self.drain_budget {
            if let Some(backlog) = self.backlog().await {
                if backlog <= DRAINED_BACKLOG {
                    info!("Backlog drained in {} ms", started.elapsed().as_millis());
                    self.draining.store(false, Ordering::Release);
                    self.worker.resume_producers().await?;
                    return Ok(DrainOutcome::Drained);
                }
                last_backlog = Some(backlog);
            }
            if !self.sleep(self.drain_poll).await {
                return Ok(DrainOutcome::Cancelled);
            }
        }

        // Producers resume although the target was missed; measurements that
        // follow still carry the leftover backlog.
        let backlog = last_backlog.unwrap_or_default();
        warn!(
            "Backlog drain budget of {} ms exhausted with {} messages outstanding",
            self.drain_budget.as_millis(),
            backlog
        );
        self.draining.store(false, Ordering::Release);
        self.worker.resume_producers().await?;
        Ok(DrainOutcome::TimedOut { backlog })
    }
}
