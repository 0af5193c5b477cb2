use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use super::histogram::LatencyHistogram;
use super::types::{CountersStats, CumulativeLatencies, PeriodStats};
use crate::error::MetricsError;

#[derive(Debug)]
struct HistogramWindows {
    period_publish: LatencyHistogram,
    period_end_to_end: LatencyHistogram,
    cumulative_publish: LatencyHistogram,
    cumulative_end_to_end: LatencyHistogram,
}

impl HistogramWindows {
    fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            period_publish: LatencyHistogram::new()?,
            period_end_to_end: LatencyHistogram::new()?,
            cumulative_publish: LatencyHistogram::new()?,
            cumulative_end_to_end: LatencyHistogram::new()?,
        })
    }

    fn reset(&mut self) {
        self.period_publish.reset();
        self.period_end_to_end.reset();
        self.cumulative_publish.reset();
        self.cumulative_end_to_end.reset();
    }
}

/// Per-endpoint statistics, written concurrently by send loops and consumer
/// callbacks and read by the polling path.
///
/// Counters come in two generations: period counters are swapped to zero on
/// every [`WorkerStats::take_period_stats`], totals only on
/// [`WorkerStats::reset`]. Histograms sit behind one mutex that is never held
/// across an await.
#[derive(Debug)]
pub struct WorkerStats {
    messages_sent: AtomicU64,
    message_send_errors: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
    total_messages_sent: AtomicU64,
    total_message_send_errors: AtomicU64,
    total_messages_received: AtomicU64,
    windows: Mutex<HistogramWindows>,
}

impl WorkerStats {
    /// # Errors
    ///
    /// Returns an error if the histograms cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            messages_sent: AtomicU64::new(0),
            message_send_errors: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            total_messages_sent: AtomicU64::new(0),
            total_message_send_errors: AtomicU64::new(0),
            total_messages_received: AtomicU64::new(0),
            windows: Mutex::new(HistogramWindows::new()?),
        })
    }

    /// Count a message that was sent outside the measured load, e.g. a probe.
    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.total_messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_produced(&self, payload_len: u64, publish_latency_us: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(payload_len, Ordering::Relaxed);
        self.total_messages_sent.fetch_add(1, Ordering::Relaxed);

        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.period_publish.record(publish_latency_us);
        windows.cumulative_publish.record(publish_latency_us);
    }

    pub fn record_producer_failure(&self) {
        self.message_send_errors.fetch_add(1, Ordering::Relaxed);
        self.total_message_send_errors
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_received(&self, payload_len: u64, end_to_end_latency_us: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(payload_len, Ordering::Relaxed);
        self.total_messages_received.fetch_add(1, Ordering::Relaxed);

        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.period_end_to_end.record(end_to_end_latency_us);
        windows.cumulative_end_to_end.record(end_to_end_latency_us);
    }

    #[must_use]
    pub fn counters(&self) -> CountersStats {
        CountersStats {
            messages_sent: self.total_messages_sent.load(Ordering::Relaxed),
            messages_received: self.total_messages_received.load(Ordering::Relaxed),
            message_send_errors: self.total_message_send_errors.load(Ordering::Relaxed),
        }
    }

    /// Read and reset the period window.
    #[must_use]
    pub fn take_period_stats(&self) -> PeriodStats {
        let (publish_latency, end_to_end_latency) = {
            let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
            let publish = windows.period_publish.clone();
            let end_to_end = windows.period_end_to_end.clone();
            windows.period_publish.reset();
            windows.period_end_to_end.reset();
            (publish, end_to_end)
        };

        PeriodStats {
            messages_sent: self.messages_sent.swap(0, Ordering::Relaxed),
            message_send_errors: self.message_send_errors.swap(0, Ordering::Relaxed),
            bytes_sent: self.bytes_sent.swap(0, Ordering::Relaxed),
            messages_received: self.messages_received.swap(0, Ordering::Relaxed),
            bytes_received: self.bytes_received.swap(0, Ordering::Relaxed),
            total_messages_sent: self.total_messages_sent.load(Ordering::Relaxed),
            total_messages_received: self.total_messages_received.load(Ordering::Relaxed),
            total_message_send_errors: self
                .total_message_send_errors
                .load(Ordering::Relaxed),
            publish_latency,
            end_to_end_latency,
        }
    }

    #[must_use]
    pub fn cumulative_latencies(&self) -> CumulativeLatencies {
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        CumulativeLatencies {
            publish_latency: windows.cumulative_publish.clone(),
            end_to_end_latency: windows.cumulative_end_to_end.clone(),
        }
    }

    /// Zero every counter and histogram.
    pub fn reset(&self) {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.reset();
        for counter in [
            &self.messages_sent,
            &self.message_send_errors,
            &self.bytes_sent,
            &self.messages_received,
            &self.bytes_received,
            &self.total_messages_sent,
            &self.total_message_send_errors,
            &self.total_messages_received,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
