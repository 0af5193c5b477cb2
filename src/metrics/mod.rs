//! Per-endpoint statistics, latency histograms and their merge rules.
mod histogram;
mod latency;
mod stats;
mod types;


pub use histogram::LatencyHistogram;
pub use latency::{ComparisonResult, LatencyMetric, micros_to_millis, round2};
pub use stats::WorkerStats;
pub use types::{CountersStats, CumulativeLatencies, PeriodStats, compute_backlog};
