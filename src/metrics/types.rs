use serde::{Deserialize, Serialize};

use super::histogram::LatencyHistogram;
use crate::error::MetricsError;

/// Monotonic counters since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountersStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub message_send_errors: u64,
}

impl CountersStats {
    pub fn merge(&mut self, other: &CountersStats) {
        self.messages_sent = self.messages_sent.saturating_add(other.messages_sent);
        self.messages_received = self
            .messages_received
            .saturating_add(other.messages_received);
        self.message_send_errors = self
            .message_send_errors
            .saturating_add(other.message_send_errors);
    }
}

/// Stats for the window since the previous poll, plus running totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStats {
    pub messages_sent: u64,
    pub message_send_errors: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub total_messages_sent: u64,
    pub total_messages_received: u64,
    pub total_message_send_errors: u64,
    pub publish_latency: LatencyHistogram,
    pub end_to_end_latency: LatencyHistogram,
}

impl PeriodStats {
    /// Zeroed stats, the identity element for [`PeriodStats::merge`].
    ///
    /// # Errors
    ///
    /// Returns an error if the histograms cannot be created.
    pub fn empty() -> Result<Self, MetricsError> {
        Ok(Self {
            messages_sent: 0,
            message_send_errors: 0,
            bytes_sent: 0,
            messages_received: 0,
            bytes_received: 0,
            total_messages_sent: 0,
            total_messages_received: 0,
            total_message_send_errors: 0,
            publish_latency: LatencyHistogram::new()?,
            end_to_end_latency: LatencyHistogram::new()?,
        })
    }

    /// Sum counters and add histogram bins.
    ///
    /// # Errors
    ///
    /// Returns an error if a histogram merge fails.
    pub fn merge(&mut self, other: &PeriodStats) -> Result<(), MetricsError> {
        self.messages_sent = self.messages_sent.saturating_add(other.messages_sent);
        self.message_send_errors = self
            .message_send_errors
            .saturating_add(other.message_send_errors);
        self.bytes_sent = self.bytes_sent.saturating_add(other.bytes_sent);
        self.messages_received = self
            .messages_received
            .saturating_add(other.messages_received);
        self.bytes_received = self.bytes_received.saturating_add(other.bytes_received);
        self.total_messages_sent = self
            .total_messages_sent
            .saturating_add(other.total_messages_sent);
        self.total_messages_received = self
            .total_messages_received
            .saturating_add(other.total_messages_received);
        self.total_message_send_errors = self
            .total_message_send_errors
            .saturating_add(other.total_message_send_errors);
        self.publish_latency.merge(&other.publish_latency)?;
        self.end_to_end_latency.merge(&other.end_to_end_latency)?;
        Ok(())
    }
}

/// Latency histograms accumulated since the last reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeLatencies {
    pub publish_latency: LatencyHistogram,
    pub end_to_end_latency: LatencyHistogram,
}

impl CumulativeLatencies {
    /// # Errors
    ///
    /// Returns an error if the histograms cannot be created.
    pub fn empty() -> Result<Self, MetricsError> {
        Ok(Self {
            publish_latency: LatencyHistogram::new()?,
            end_to_end_latency: LatencyHistogram::new()?,
        })
    }

    /// # Errors
    ///
    /// Returns an error if a histogram merge fails.
    pub fn merge(&mut self, other: &CumulativeLatencies) -> Result<(), MetricsError> {
        self.publish_latency.merge(&other.publish_latency)?;
        self.end_to_end_latency.merge(&other.end_to_end_latency)
    }
}

/// Messages sent but not yet received, scaled by subscription fan-out.
///
/// Negative only when deliveries were counted before their sends, which the
/// caller may observe briefly around a reset.
#[must_use]
pub fn compute_backlog(subscriptions_per_topic: u32, sent: u64, received: u64) -> i64 {
    let expected = i128::from(subscriptions_per_topic).saturating_mul(i128::from(sent));
    let backlog = expected.saturating_sub(i128::from(received));
    let clamped = backlog.clamp(i128::from(i64::MIN), i128::from(i64::MAX));
    i64::try_from(clamped).unwrap_or_default()
}
