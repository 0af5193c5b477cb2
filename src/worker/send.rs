use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::keys::KeyDistributor;
use super::rate::RateLimiter;
use super::receive::{PauseFlags, pause_tick};
use crate::clock::duration_to_us;
use crate::driver::BenchmarkProducer;
use crate::metrics::WorkerStats;

/// One execution context of the publish load: a fixed subset of the worker's
/// producers paced by the shared limiter.
pub(super) struct SendLoop {
    pub(super) producers: Vec<Arc<dyn BenchmarkProducer>>,
    pub(super) limiter: RateLimiter,
    pub(super) stats: Arc<WorkerStats>,
    pub(super) flags: Arc<PauseFlags>,
    pub(super) payload: Bytes,
    pub(super) keys: KeyDistributor,
    pub(super) cancel: CancellationToken,
}

impl SendLoop {
    pub(super) async fn run(self) {
        let SendLoop {
            producers,
            limiter,
            stats,
            flags,
            payload,
            mut keys,
            cancel,
        } = self;

        while !cancel.is_cancelled() {
            if flags.producers_paused() {
                if !pause_tick(&cancel).await {
                    break;
                }
                continue;
            }

            for producer in &producers {
                if !limiter.acquire(&cancel).await {
                    return;
                }
                let producer = Arc::clone(producer);
                let stats = Arc::clone(&stats);
                let payload = payload.clone();
                let key = keys.next_key();
                tokio::spawn(async move {
                    let started = Instant::now();
                    match producer.send(key, payload).await {
                        Ok(bytes) => stats.record_message_produced(
                            u64::try_from(bytes).unwrap_or(u64::MAX),
                            duration_to_us(started.elapsed()),
                        ),
                        Err(err) => {
                            stats.record_producer_failure();
                            debug!("Send failed: {}", err);
                        }
                    }
                });
            }
        }
    }
}
