use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use hdrhistogram::Histogram;
use hdrhistogram::serialization::{Deserializer, Serializer, V2Serializer};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::MetricsError;

const LOWEST_TRACKABLE_US: u64 = 1;
/// Latencies above one minute are clamped into the top bucket.
const HIGHEST_TRACKABLE_US: u64 = 60_000_000;
const SIGNIFICANT_DIGITS: u8 = 3;

/// Microsecond latency histogram with a fixed value range, so that any two
/// instances can be merged bin by bin.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    hist: Histogram<u64>,
}

impl LatencyHistogram {
    /// Create an empty latency histogram.
    ///
    /// # Errors
    ///
    /// Returns an error if the histogram cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let hist = Histogram::<u64>::new_with_bounds(
            LOWEST_TRACKABLE_US,
            HIGHEST_TRACKABLE_US,
            SIGNIFICANT_DIGITS,
        )
        .map_err(|err| histogram_error("create", err))?;
        Ok(Self { hist })
    }

    /// Record one latency sample in microseconds. Out-of-range values are
    /// clamped, so recording never fails.
    pub fn record(&mut self, latency_us: u64) {
        self.hist.saturating_record(latency_us.max(LOWEST_TRACKABLE_US));
    }

    /// Merge another histogram into this one by adding equivalent bins.
    ///
    /// # Errors
    ///
    /// Returns an error if the other histogram holds values outside this
    /// histogram's range.
    pub fn merge(&mut self, other: &LatencyHistogram) -> Result<(), MetricsError> {
        self.hist
            .add(&other.hist)
            .map_err(|err| histogram_error("merge", err))
    }

    pub fn reset(&mut self) {
        self.hist.reset();
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.hist.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hist.is_empty()
    }

    #[must_use]
    pub fn mean_us(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.hist.mean()
    }

    #[must_use]
    pub fn max_us(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        self.hist.max()
    }

    /// Value at `percentile` (0..=100), or zero for an empty histogram.
    #[must_use]
    pub fn value_at_percentile_us(&self, percentile: f64) -> u64 {
        if self.is_empty() {
            return 0;
        }
        self.hist.value_at_percentile(percentile)
    }

    /// Encode the histogram as base64 of its V2 serialization.
    ///
    /// # Errors
    ///
    /// Returns an error if the histogram cannot be serialized.
    pub fn encode_base64(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        V2Serializer::new()
            .serialize(&self.hist, &mut buffer)
            .map_err(|err| histogram_error("serialize", err))?;
        Ok(B64.encode(buffer))
    }

    /// Decode a base64 histogram payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be decoded or deserialized.
    pub fn decode_base64(encoded: &str) -> Result<Self, MetricsError> {
        let bytes = B64
            .decode(encoded.as_bytes())
            .map_err(|err| histogram_error("decode", err))?;
        let mut cursor = Cursor::new(bytes);
        let decoded: Histogram<u64> = Deserializer::new()
            .deserialize(&mut cursor)
            .map_err(|err| histogram_error("deserialize", err))?;
        // Re-home the decoded bins into our fixed range so later merges
        // behave the same regardless of where the payload came from.
        let mut histogram = Self::new()?;
        histogram
            .hist
            .add(&decoded)
            .map_err(|err| histogram_error("deserialize", err))?;
        Ok(histogram)
    }
}

impl Serialize for LatencyHistogram {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let encoded = self
            .encode_base64()
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&encoded)
    }
}

impl<'de> Deserialize<'de> for LatencyHistogram {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        Self::decode_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

fn histogram_error<E>(context: &'static str, err: E) -> MetricsError
where
    E: std::error::Error + Send + Sync + 'static,
{
    MetricsError::Histogram {
        context,
        source: Box::new(err),
    }
}
