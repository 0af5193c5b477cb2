use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::clock::unix_time_us;
use crate::driver::ConsumerCallback;
use crate::metrics::WorkerStats;

pub(super) const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
pub(super) struct PauseFlags {
    consumers: AtomicBool,
    producers: AtomicBool,
}

impl PauseFlags {
    pub(super) fn set_consumers(&self, paused: bool) {
        self.consumers.store(paused, Ordering::Release);
    }

    pub(super) fn set_producers(&self, paused: bool) {
        self.producers.store(paused, Ordering::Release);
    }

    pub(super) fn consumers_paused(&self) -> bool {
        self.consumers.load(Ordering::Acquire)
    }

    pub(super) fn producers_paused(&self) -> bool {
        self.producers.load(Ordering::Acquire)
    }

    pub(super) fn clear(&self) {
        self.set_consumers(false);
        self.set_producers(false);
    }
}

/// Sleeps one pause-poll interval. Returns `false` if `cancel` fired.
pub(super) async fn pause_tick(cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(PAUSE_POLL_INTERVAL) => true,
    }
}

/// Consumer callback installed on every consumer of a worker.
pub(super) struct ReceiveHandler {
    pub(super) stats: Arc<WorkerStats>,
    pub(super) flags: Arc<PauseFlags>,
    pub(super) cancel: CancellationToken,
}

#[async_trait]
impl ConsumerCallback for ReceiveHandler {
    async fn message_received(&self, payload_len: usize, publish_timestamp_us: u64) {
        let latency_us = unix_time_us().saturating_sub(publish_timestamp_us);
        self.stats
            .record_message_received(u64::try_from(payload_len).unwrap_or(u64::MAX), latency_us);

        // Holding the delivery while paused keeps the backlog on the broker.
        while self.flags.consumers_paused() {
            if !pause_tick(&self.cancel).await {
                break;
            }
        }
    }
}
