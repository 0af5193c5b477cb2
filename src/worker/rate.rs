use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// The limiter cannot express rates below one message per second; lower
/// rates are achieved by pausing producers instead.
pub const MIN_PUBLISH_RATE: f64 = 1.0;
const REFILL_TICK: Duration = Duration::from_millis(50);

/// Token bucket shared by every send loop of one worker. A refill task tops
/// the semaphore up each tick, carrying the fractional remainder, and never
/// lets stored permits exceed one tick's worth.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    rate_bits: Arc<AtomicU64>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(MIN_PUBLISH_RATE)
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(rate: f64) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
            rate_bits: Arc::new(AtomicU64::new(clamp_rate(rate).to_bits())),
        }
    }

    #[must_use]
    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    /// Sets the target rate, clamped to [`MIN_PUBLISH_RATE`], and drops
    /// stored permits above the new burst size.
    pub fn set_rate(&self, rate: f64) -> f64 {
        let rate = clamp_rate(rate);
        self.rate_bits.store(rate.to_bits(), Ordering::Relaxed);
        let cap = burst_cap(rate, REFILL_TICK);
        let excess = self.permits.available_permits().saturating_sub(cap);
        self.forget(excess);
        rate
    }

    /// Waits for one permit. Returns `false` if `cancel` fired first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            () = cancel.cancelled() => false,
            permit = self.permits.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    true
                }
                Err(_) => false,
            },
        }
    }

    /// Drops every stored permit.
    pub fn drain(&self) {
        self.forget(self.permits.available_permits());
    }

    fn forget(&self, count: usize) {
        let Ok(count) = u32::try_from(count) else {
            return;
        };
        if count == 0 {
            return;
        }
        if let Ok(permits) = self.permits.try_acquire_many(count) {
            permits.forget();
        }
    }

    /// Spawns the refill task; it exits when `cancel` fires.
    pub fn spawn_refill(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut refill = Refill::default();
            let mut tick = interval(REFILL_TICK);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let rate = limiter.rate();
                        let tokens = refill.next_tokens(rate, REFILL_TICK);
                        let cap = burst_cap(rate, REFILL_TICK);
                        let available = limiter.permits.available_permits();
                        if available < cap {
                            limiter
                                .permits
                                .add_permits(tokens.min(cap.saturating_sub(available)));
                        }
                    }
                }
            }
        })
    }
}

#[must_use]
pub fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() || rate < MIN_PUBLISH_RATE {
        MIN_PUBLISH_RATE
    } else {
        rate
    }
}

fn burst_cap(rate: f64, tick: Duration) -> usize {
    let per_tick = (rate * tick.as_secs_f64()).ceil();
    if !per_tick.is_finite() {
        return Semaphore::MAX_PERMITS;
    }
    (per_tick.max(1.0) as usize).min(Semaphore::MAX_PERMITS)
}

/// Fractional token carry between ticks.
#[derive(Debug, Default)]
pub(crate) struct Refill {
    remainder: f64,
}

impl Refill {
    pub(crate) fn next_tokens(&mut self, rate: f64, tick: Duration) -> usize {
        let budget = self.remainder + rate * tick.as_secs_f64();
        if !budget.is_finite() {
            self.remainder = 0.0;
            return usize::MAX;
        }
        let whole = budget.floor();
        self.remainder = budget - whole;
        whole as usize
    }
}
