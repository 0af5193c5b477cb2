use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::workload::Workload;
use crate::driver::DriverConfig;
use crate::error::AppResult;
use crate::metrics::{CumulativeLatencies, LatencyMetric, PeriodStats, compute_backlog, round2};

const BYTES_PER_MB: f64 = 1_048_576.0;
const DEFAULT_BATCH_SIZE_BYTES: u64 = 1_048_576;
const DEFAULT_BATCH_COUNT: u32 = 1;

/// Timestamp format shared by every result document.
#[must_use]
pub fn result_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// One measurement interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResult {
    pub run_id: String,
    pub timestamp: String,
    pub elapsed_seconds: u64,
    pub publish_rate: f64,
    pub consume_rate: f64,
    pub publish_error_rate: f64,
    pub publish_throughput_mb: f64,
    pub consume_throughput_mb: f64,
    pub backlog: i64,
    pub latency_metric: LatencyMetric,
}

impl SnapshotResult {
    /// Summarises `stats` gathered over `interval`, `since_start` into the
    /// measurement window.
    #[must_use]
    pub fn from_period(
        run_id: &str,
        stats: &PeriodStats,
        interval: Duration,
        since_start: Duration,
        subscriptions_per_topic: u32,
    ) -> Self {
        let seconds = interval.as_secs_f64().max(f64::EPSILON);
        let per_second = |count: u64| round2(count as f64 / seconds);
        let mb_per_second = |bytes: u64| round2(bytes as f64 / seconds / BYTES_PER_MB);
        Self {
            run_id: run_id.to_owned(),
            timestamp: result_timestamp(Utc::now()),
            elapsed_seconds: since_start.as_secs(),
            publish_rate: per_second(stats.messages_sent),
            consume_rate: per_second(stats.messages_received),
            publish_error_rate: per_second(stats.message_send_errors),
            publish_throughput_mb: mb_per_second(stats.bytes_sent),
            consume_throughput_mb: mb_per_second(stats.bytes_received),
            backlog: compute_backlog(
                subscriptions_per_topic,
                stats.total_messages_sent,
                stats.total_messages_received,
            ),
            latency_metric: LatencyMetric::from_histograms(
                &stats.publish_latency,
                &stats.end_to_end_latency,
            ),
        }
    }

    pub fn log(&self) {
        info!(
            "Pub rate {:.2} msg/s / {:.2} MB/s | Pub err {:.2} err/s | Cons rate {:.2} msg/s / {:.2} MB/s | Backlog: {:.1} K",
            self.publish_rate,
            self.publish_throughput_mb,
            self.publish_error_rate,
            self.consume_rate,
            self.consume_throughput_mb,
            self.backlog as f64 / 1000.0
        );
        let latency = &self.latency_metric;
        info!(
            "Pub latency (ms) avg: {:.2} - 50%: {:.2} - 99%: {:.2} - 99.9%: {:.2} - max: {:.2}",
            latency.publish_latency_avg,
            latency.publish_latency_50pct,
            latency.publish_latency_99pct,
            latency.publish_latency_999pct,
            latency.publish_latency_max
        );
        info!(
            "E2E latency (ms) avg: {:.2} - 50%: {:.2} - 99%: {:.2} - 99.9%: {:.2} - max: {:.2}",
            latency.end_to_end_latency_avg,
            latency.end_to_end_latency_50pct,
            latency.end_to_end_latency_99pct,
            latency.end_to_end_latency_999pct,
            latency.end_to_end_latency_max
        );
    }
}

/// Whole-window result: running means of the snapshot rates and the
/// latency percentiles of the cumulative histograms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub run_id: String,
    pub timestamp: String,
    pub publish_rate: f64,
    pub consume_rate: f64,
    pub publish_error_rate: f64,
    pub backlog: f64,
    pub latency_metric: LatencyMetric,
    #[serde(skip)]
    samples: u32,
}

impl AggregateResult {
    #[must_use]
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_owned(),
            timestamp: String::new(),
            publish_rate: 0.0,
            consume_rate: 0.0,
            publish_error_rate: 0.0,
            backlog: 0.0,
            latency_metric: LatencyMetric::default(),
            samples: 0,
        }
    }

    /// Folds one snapshot into the running means.
    pub fn add_snapshot(&mut self, snapshot: &SnapshotResult) {
        self.samples = self.samples.saturating_add(1);
        let count = f64::from(self.samples);
        let step = |mean: f64, value: f64| mean + (value - mean) / count;
        self.publish_rate = step(self.publish_rate, snapshot.publish_rate);
        self.consume_rate = step(self.consume_rate, snapshot.consume_rate);
        self.publish_error_rate = step(self.publish_error_rate, snapshot.publish_error_rate);
        self.backlog = step(self.backlog, snapshot.backlog as f64);
    }

    #[must_use]
    pub const fn samples(&self) -> u32 {
        self.samples
    }

    pub fn set_latencies(&mut self, latencies: &CumulativeLatencies) {
        self.timestamp = result_timestamp(Utc::now());
        self.latency_metric = LatencyMetric::from_histograms(
            &latencies.publish_latency,
            &latencies.end_to_end_latency,
        );
        let latency = &self.latency_metric;
        info!(
            "Aggregated pub latency (ms) avg: {:.2} - 50%: {:.2} - 95%: {:.2} - 99%: {:.2} - 99.9%: {:.2} - 99.99%: {:.2} - max: {:.2}",
            latency.publish_latency_avg,
            latency.publish_latency_50pct,
            latency.publish_latency_95pct,
            latency.publish_latency_99pct,
            latency.publish_latency_999pct,
            latency.publish_latency_9999pct,
            latency.publish_latency_max
        );
        info!(
            "Aggregated E2E latency (ms) avg: {:.2} - 50%: {:.2} - 95%: {:.2} - 99%: {:.2} - 99.9%: {:.2} - 99.99%: {:.2} - max: {:.2}",
            latency.end_to_end_latency_avg,
            latency.end_to_end_latency_50pct,
            latency.end_to_end_latency_95pct,
            latency.end_to_end_latency_99pct,
            latency.end_to_end_latency_999pct,
            latency.end_to_end_latency_9999pct,
            latency.end_to_end_latency_max
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub workload: String,
    pub topics: u32,
    pub partitions: u32,
    pub producer_count: u32,
    pub consumer_count: u32,
    pub consumer_groups: u32,
    pub batch_count: u32,
    pub batch_size: String,
    pub payload: Option<String>,
    pub namespace_name: Option<String>,
    pub tags: Vec<String>,
}

impl RunMetadata {
    /// Describes the run; batch settings come from the driver's producer
    /// properties.
    #[must_use]
    pub fn describe(workload: &Workload, driver: &DriverConfig, tags: &[String]) -> Self {
        Self {
            workload: workload.name.clone(),
            topics: workload.topics,
            partitions: workload.partitions_per_topic,
            producer_count: workload.producers_per_topic,
            consumer_count: workload.consumer_count(),
            consumer_groups: workload.subscriptions_per_topic,
            batch_count: batch_count(driver),
            batch_size: format!("{}KB", batch_size_bytes(driver).saturating_div(1024)),
            payload: workload.payload_file.clone(),
            namespace_name: driver
                .namespace_metadata
                .as_ref()
                .map(|metadata| metadata.namespace_name.clone()),
            tags: tags.iter().map(String::as_str).map(camel_case_tag).collect(),
        }
    }
}

fn batch_size_bytes(driver: &DriverConfig) -> u64 {
    driver
        .producer_property("batch.size")
        .map_or(DEFAULT_BATCH_SIZE_BYTES, |value| {
            value.parse().unwrap_or_else(|err| {
                warn!("Ignoring invalid batch.size '{}': {}", value, err);
                DEFAULT_BATCH_SIZE_BYTES
            })
        })
}

fn batch_count(driver: &DriverConfig) -> u32 {
    driver
        .producer_property("batch.count")
        .map_or(DEFAULT_BATCH_COUNT, |value| {
            value.parse().unwrap_or_else(|err| {
                warn!("Ignoring invalid batch.count '{}': {}", value, err);
                DEFAULT_BATCH_COUNT
            })
        })
}

/// `"high load run"` becomes `"HighLoadRun"`.
#[must_use]
pub fn camel_case_tag(tag: &str) -> String {
    tag.split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect::<String>()
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDetails {
    pub run_id: String,
    pub test_name: String,
    pub test_suite_name: Option<String>,
    pub test_start_time: String,
    pub test_run_duration_minutes: u64,
    pub product: Option<String>,
    pub sku: Option<String>,
    pub protocol: Option<String>,
    pub metadata: Option<RunMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub details: TestDetails,
    pub snapshots: Vec<SnapshotResult>,
    pub aggregate: AggregateResult,
}

/// `{workload}-{driver}-{YYYY-MM-DD-HH-MM-SS}` with path-hostile characters
/// replaced.
#[must_use]
pub fn default_output_prefix(workload: &str, driver: &str, now: DateTime<Local>) -> String {
    let stamp = format!(
        "{:04}-{:02}-{:02}-{:02}-{:02}-{:02}",
        now.year(),
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    );
    format!(
        "{}-{}-{}",
        sanitize_segment(workload),
        sanitize_segment(driver),
        stamp
    )
}

fn sanitize_segment(input: &str) -> String {
    input
        .chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => ch,
            _ => '-',
        })
        .collect()
}

/// Paths of the three result documents for `prefix`.
#[must_use]
pub fn result_paths(prefix: &Path) -> [PathBuf; 3] {
    let with_suffix = |suffix: &str| {
        let mut name = prefix.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    };
    [
        with_suffix("-details.json"),
        with_suffix("-snapshot.json"),
        with_suffix("-aggregate.json"),
    ]
}

/// Writes details, snapshots and aggregate as pretty JSON next to `prefix`.
///
/// # Errors
///
/// Returns an error if serialization or any write fails.
pub async fn write_results(result: &TestResult, prefix: &Path) -> AppResult<[PathBuf; 3]> {
    let paths = result_paths(prefix);
    let [details_path, snapshot_path, aggregate_path] = &paths;
    write_json(details_path, &result.details).await?;
    write_json(snapshot_path, &result.snapshots).await?;
    write_json(aggregate_path, &result.aggregate).await?;
    info!(
        "Wrote results to {}, {} and {}",
        details_path.display(),
        snapshot_path.display(),
        aggregate_path.display()
    );
    Ok(paths)
}

async fn write_json<T>(path: &Path, value: &T) -> AppResult<()>
where
    T: Serialize + ?Sized,
{
    let json = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
