use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::metrics::{CountersStats, compute_backlog};
use crate::worker::Worker;

/// Rate the search starts from when no fixed rate is configured.
pub const INITIAL_PROBE_RATE: f64 = 10_000.0;
pub const MIN_SEARCH_RATE: f64 = 0.1;

const PUBLISH_SHORTFALL: f64 = 0.95;
const RECEIVE_SHORTFALL: f64 = 0.98;
const PUBLISH_HEADROOM: f64 = 1.1;
const STABLE_WINDOW: f64 = 0.05;
const STABLE_PERIODS: u32 = 3;
const RECOVERED_BACKLOG: i64 = 1_000;

/// Branch taken by one [`RateSearch::evaluate`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Producers missed the requested rate; bisect down.
    PublisherShortfall,
    /// Consumers fell behind; bisect down and let them catch up.
    ConsumerLag,
    /// No bottleneck; double towards the ceiling.
    Increase,
    /// At the ceiling and keeping pace.
    Stable,
    /// Stable long enough; window narrowed around the current rate.
    Narrow,
}

/// Exponential-increase, bisection-decrease search for the highest publish
/// rate consumers can sustain. Always keeps `min <= current <= max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSearch {
    current: f64,
    min: f64,
    max: f64,
    stable_periods: u32,
}

impl RateSearch {
    #[must_use]
    pub fn new(initial_rate: f64) -> Self {
        let current = if initial_rate.is_finite() {
            initial_rate.max(MIN_SEARCH_RATE)
        } else {
            INITIAL_PROBE_RATE
        };
        Self {
            current,
            min: MIN_SEARCH_RATE,
            max: f64::INFINITY,
            stable_periods: 0,
        }
    }

    #[must_use]
    pub const fn current(&self) -> f64 {
        self.current
    }

    #[must_use]
    pub const fn min(&self) -> f64 {
        self.min
    }

    #[must_use]
    pub const fn max(&self) -> f64 {
        self.max
    }

    /// Applies one control period's observed rates.
    pub fn evaluate(&mut self, publish_rate: f64, receive_rate: f64) -> RateDecision {
        if publish_rate < self.current * PUBLISH_SHORTFALL {
            self.max = self.current * PUBLISH_HEADROOM;
            self.current = self.midpoint();
            self.stable_periods = 0;
            RateDecision::PublisherShortfall
        } else if receive_rate < publish_rate * RECEIVE_SHORTFALL {
            self.max = self.current;
            self.current = self.midpoint();
            self.stable_periods = 0;
            RateDecision::ConsumerLag
        } else if self.current < self.max {
            self.min = self.current;
            self.current = (self.current * 2.0).min(self.max);
            self.stable_periods = 0;
            RateDecision::Increase
        } else {
            self.stable_periods = self.stable_periods.saturating_add(1);
            if self.stable_periods > STABLE_PERIODS {
                self.min = self.current * (1.0 - STABLE_WINDOW);
                self.max = self.current * (1.0 + STABLE_WINDOW);
                self.stable_periods = 0;
                RateDecision::Narrow
            } else {
                RateDecision::Stable
            }
        }
    }

    fn midpoint(&self) -> f64 {
        self.min + (self.current - self.min) / 2.0
    }
}

/// Background task driving [`RateSearch`] against live counters until the
/// run is cancelled.
pub(crate) struct RateController {
    pub(crate) worker: Arc<dyn Worker>,
    pub(crate) subscriptions_per_topic: u32,
    pub(crate) control_period: Duration,
    pub(crate) recovery_poll: Duration,
    pub(crate) catch_up: Duration,
    pub(crate) cancel: CancellationToken,
}

struct Baseline {
    counters: CountersStats,
    at: Instant,
}

impl RateController {
    pub(crate) async fn run(self, initial_rate: f64) -> AppResult<()> {
        let mut search = RateSearch::new(initial_rate);
        let Some(mut baseline) = self.baseline().await else {
            return Ok(());
        };
        info!("Searching for the sustainable rate from {:.1} msg/s", search.current());

        loop {
            if !self.sleep(self.control_period).await {
                return Ok(());
            }
            let counters = match self.worker.counters_stats().await {
                Ok(counters) => counters,
                Err(err) => {
                    warn!("Rate control skipped a period: {}", err);
                    continue;
                }
            };
            let now = Instant::now();
            if counters.messages_sent < baseline.counters.messages_sent
                || counters.messages_received < baseline.counters.messages_received
            {
                debug!("Counters were reset; re-baselining rate control");
                baseline = Baseline { counters, at: now };
                continue;
            }
            let elapsed = now.duration_since(baseline.at).as_secs_f64().max(f64::EPSILON);
            let publish_rate = counters
                .messages_sent
                .saturating_sub(baseline.counters.messages_sent) as f64
                / elapsed;
            let receive_rate = counters
                .messages_received
                .saturating_sub(baseline.counters.messages_received) as f64
                / elapsed;
            baseline = Baseline { counters, at: now };

            let decision = search.evaluate(publish_rate, receive_rate);
            debug!(
                "Rate control: publish {:.1} receive {:.1} -> {:?} current {:.1} window [{:.1}, {:.1}]",
                publish_rate,
                receive_rate,
                decision,
                search.current(),
                search.min(),
                search.max()
            );

            if decision == RateDecision::ConsumerLag {
                self.worker
                    .adjust_publish_rate(search.min() / 10.0)
                    .await?;
                if !self.wait_for_recovery().await {
                    return Ok(());
                }
                debug!("Resuming load at {:.1} msg/s", search.current());
                self.worker.adjust_publish_rate(search.current()).await?;
                if !self.sleep(self.catch_up).await {
                    return Ok(());
                }
                let Some(rebaselined) = self.baseline().await else {
                    return Ok(());
                };
                baseline = rebaselined;
            }

            self.worker.adjust_publish_rate(search.current()).await?;
        }
    }

    /// Reads counters until they arrive or the run ends.
    async fn baseline(&self) -> Option<Baseline> {
        loop {
            match self.worker.counters_stats().await {
                Ok(counters) => {
                    return Some(Baseline {
                        counters,
                        at: Instant::now(),
                    });
                }
                Err(err) => warn!("Rate control could not read counters: {}", err),
            }
            if !self.sleep(self.recovery_poll).await {
                return None;
            }
        }
    }

    async fn wait_for_recovery(&self) -> bool {
        loop {
            match self.worker.counters_stats().await {
                Ok(counters) => {
                    let backlog = compute_backlog(
                        self.subscriptions_per_topic,
                        counters.messages_sent,
                        counters.messages_received,
                    );
                    if backlog < RECOVERED_BACKLOG {
                        return true;
                    }
                }
                Err(err) => warn!("Rate control could not read counters: {}", err),
            }
            if !self.sleep(self.recovery_poll).await {
                return false;
            }
        }
    }

    async fn sleep(&self, period: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(period) => true,
        }
    }
}
