use serde::{Deserialize, Serialize};

use super::histogram::LatencyHistogram;

/// Percentile summary of publish and end-to-end latency in milliseconds,
/// rounded to two decimals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyMetric {
    pub publish_latency_avg: f64,
    pub publish_latency_50pct: f64,
    pub publish_latency_95pct: f64,
    pub publish_latency_99pct: f64,
    pub publish_latency_999pct: f64,
    pub publish_latency_9999pct: f64,
    pub publish_latency_max: f64,
    pub end_to_end_latency_avg: f64,
    pub end_to_end_latency_50pct: f64,
    pub end_to_end_latency_95pct: f64,
    pub end_to_end_latency_99pct: f64,
    pub end_to_end_latency_999pct: f64,
    pub end_to_end_latency_9999pct: f64,
    pub end_to_end_latency_max: f64,
}

/// A metric that regressed past the allowed threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub metric_name: String,
    pub current_value: f64,
    pub expected_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Publish,
    EndToEnd,
}

#[derive(Debug, Clone, Copy)]
enum Stat {
    Avg,
    Percentile(f64),
    Max,
}

impl Stat {
    fn extract_us(self, histogram: &LatencyHistogram) -> f64 {
        match self {
            Stat::Avg => histogram.mean_us(),
            Stat::Percentile(percentile) => {
                histogram.value_at_percentile_us(percentile) as f64
            }
            Stat::Max => histogram.max_us() as f64,
        }
    }
}

struct MetricField {
    name: &'static str,
    source: Source,
    stat: Stat,
    get: fn(&LatencyMetric) -> f64,
    set: fn(&mut LatencyMetric, f64),
}

macro_rules! metric_field {
    ($name:literal, $field:ident, $source:expr, $stat:expr) => {
        MetricField {
            name: $name,
            source: $source,
            stat: $stat,
            get: |metric| metric.$field,
            set: |metric, value| metric.$field = value,
        }
    };
}

fn metric_table() -> [MetricField; 14] {
    [
        metric_field!("publishLatencyAvg", publish_latency_avg, Source::Publish, Stat::Avg),
        metric_field!("publishLatency50pct", publish_latency_50pct, Source::Publish, Stat::Percentile(50.0)),
        metric_field!("publishLatency95pct", publish_latency_95pct, Source::Publish, Stat::Percentile(95.0)),
        metric_field!("publishLatency99pct", publish_latency_99pct, Source::Publish, Stat::Percentile(99.0)),
        metric_field!("publishLatency999pct", publish_latency_999pct, Source::Publish, Stat::Percentile(99.9)),
        metric_field!("publishLatency9999pct", publish_latency_9999pct, Source::Publish, Stat::Percentile(99.99)),
        metric_field!("publishLatencyMax", publish_latency_max, Source::Publish, Stat::Max),
        metric_field!("endToEndLatencyAvg", end_to_end_latency_avg, Source::EndToEnd, Stat::Avg),
        metric_field!("endToEndLatency50pct", end_to_end_latency_50pct, Source::EndToEnd, Stat::Percentile(50.0)),
        metric_field!("endToEndLatency95pct", end_to_end_latency_95pct, Source::EndToEnd, Stat::Percentile(95.0)),
        metric_field!("endToEndLatency99pct", end_to_end_latency_99pct, Source::EndToEnd, Stat::Percentile(99.0)),
        metric_field!("endToEndLatency999pct", end_to_end_latency_999pct, Source::EndToEnd, Stat::Percentile(99.9)),
        metric_field!("endToEndLatency9999pct", end_to_end_latency_9999pct, Source::EndToEnd, Stat::Percentile(99.99)),
        metric_field!("endToEndLatencyMax", end_to_end_latency_max, Source::EndToEnd, Stat::Max),
    ]
}

impl LatencyMetric {
    #[must_use]
    pub fn from_histograms(publish: &LatencyHistogram, end_to_end: &LatencyHistogram) -> Self {
        let mut metric = LatencyMetric::default();
        metric.populate_publish(publish);
        metric.populate_end_to_end(end_to_end);
        metric
    }

    pub fn populate_publish(&mut self, histogram: &LatencyHistogram) {
        self.populate(Source::Publish, histogram);
    }

    pub fn populate_end_to_end(&mut self, histogram: &LatencyHistogram) {
        self.populate(Source::EndToEnd, histogram);
    }

    fn populate(&mut self, source: Source, histogram: &LatencyHistogram) {
        for field in metric_table().iter().filter(|field| field.source == source) {
            (field.set)(self, micros_to_millis(field.stat.extract_us(histogram)));
        }
    }

    /// Metrics where `self` exceeds `expected` by more than
    /// `threshold_percent` percent.
    #[must_use]
    pub fn compare(&self, expected: &LatencyMetric, threshold_percent: f64) -> Vec<ComparisonResult> {
        let factor = 1.0 + threshold_percent / 100.0;
        metric_table()
            .iter()
            .filter_map(|field| {
                let current_value = (field.get)(self);
                let expected_value = (field.get)(expected);
                (current_value > factor * expected_value).then(|| ComparisonResult {
                    metric_name: field.name.to_owned(),
                    current_value,
                    expected_value,
                })
            })
            .collect()
    }
}

#[must_use]
pub fn micros_to_millis(micros: f64) -> f64 {
    round2(micros / 1000.0)
}

#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
