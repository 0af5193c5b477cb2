use std::time::Duration;

use serde::Deserialize;

use crate::driver::{DriverConfig, NamespaceMetadata};
use crate::error::ConfigError;
use crate::orchestrator::Workload;

/// Run configuration as read from `brokerbench.toml` or `brokerbench.json`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Defaults to the workload name.
    pub test_name: Option<String>,
    pub test_suite_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Prefix of the result files.
    pub output: Option<String>,
    pub workload: Workload,
    pub driver: DriverConfig,
    /// Copied into the driver config unless the driver table sets its own.
    pub namespace_metadata: Option<NamespaceMetadata>,
    pub workers: Option<WorkersConfig>,
    pub timings: Option<TimingsConfig>,
}

/// Remote worker endpoints. Without endpoints the run uses an in-process
/// worker.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersConfig {
    #[serde(default)]
    pub endpoints: Vec<String>,
    pub producer_workers: Option<usize>,
    pub request_timeout: Option<DurationValue>,
}

/// Overrides of the run's waits and poll intervals.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingsConfig {
    pub settle_delay: Option<DurationValue>,
    pub warmup: Option<DurationValue>,
    pub test_duration: Option<DurationValue>,
    pub stats_poll_interval: Option<DurationValue>,
    pub rate_control_period: Option<DurationValue>,
    pub backlog_drain_budget: Option<DurationValue>,
    pub readiness_timeout: Option<DurationValue>,
    pub aggregate_attempts: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self) -> Result<Duration, ConfigError> {
        match self {
            DurationValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationValue::Text(text) => super::parse_duration_value(text),
        }
    }

    pub(crate) fn to_positive_duration(&self, field: &'static str) -> Result<Duration, ConfigError> {
        let duration = self.to_duration()?;
        if duration.is_zero() {
            return Err(ConfigError::ZeroDuration { field });
        }
        Ok(duration)
    }
}
