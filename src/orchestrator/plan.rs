use std::time::Duration;

use bytes::Bytes;

use super::workload::Workload;
use crate::driver::DriverConfig;

const SECONDS_PER_MINUTE: u64 = 60;

/// Waits and poll intervals of a run. Production values come from
/// [`Timings::for_workload`]; configuration may override any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Pause between creating consumers and creating producers.
    pub settle_delay: Duration,
    pub warmup: Duration,
    pub test_duration: Duration,
    pub stats_poll_interval: Duration,
    pub rate_control_period: Duration,
    pub rate_recovery_poll: Duration,
    pub rate_catch_up: Duration,
    pub backlog_build_poll: Duration,
    pub backlog_drain_poll: Duration,
    pub backlog_drain_budget: Duration,
    pub readiness_poll: Duration,
    pub readiness_timeout: Duration,
    pub aggregate_attempts: u32,
    pub aggregate_retry_delay: Duration,
}

impl Timings {
    #[must_use]
    pub fn for_workload(workload: &Workload) -> Self {
        Self {
            settle_delay: Duration::from_secs(60),
            warmup: minutes(workload.warmup_duration_minutes),
            test_duration: minutes(workload.test_duration_minutes),
            stats_poll_interval: Duration::from_secs(10),
            rate_control_period: Duration::from_secs(3),
            rate_recovery_poll: Duration::from_millis(100),
            rate_catch_up: Duration::from_millis(500),
            backlog_build_poll: Duration::from_secs(1),
            backlog_drain_poll: Duration::from_millis(100),
            backlog_drain_budget: Duration::from_millis(1_000_000),
            readiness_poll: Duration::from_secs(2),
            readiness_timeout: Duration::from_secs(60),
            aggregate_attempts: 10,
            aggregate_retry_delay: Duration::from_secs(1),
        }
    }
}

fn minutes(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(SECONDS_PER_MINUTE))
}

/// Everything the orchestrator needs for one run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub run_id: String,
    pub test_name: String,
    pub test_suite_name: Option<String>,
    pub tags: Vec<String>,
    pub workload: Workload,
    pub driver: DriverConfig,
    pub payload: Bytes,
    pub timings: Timings,
}
