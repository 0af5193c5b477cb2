use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use chrono::{Local, Utc};
use rand::Rng;

use crate::args::RunArgs;
use crate::error::{AppError, AppResult, ConfigError};
use crate::orchestrator::{RunPlan, Timings, Workload, default_output_prefix};
use crate::worker::{DEFAULT_REQUEST_TIMEOUT, random_token};

use super::types::{ConfigFile, TimingsConfig};

const RUN_ID_SUFFIX_LEN: usize = 6;

/// Where the run's load comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerTopology {
    /// One in-process worker.
    Local,
    /// An ensemble of remote workers.
    Remote {
        endpoints: Vec<String>,
        producer_workers: Option<usize>,
        request_timeout: Duration,
    },
}

/// A fully resolved run: the plan plus where to run it and where results go.
#[derive(Debug)]
pub struct RunSetup {
    pub plan: RunPlan,
    pub workers: WorkerTopology,
    pub output_prefix: PathBuf,
}

/// Merges the config file with `run` arguments. Command-line values win.
///
/// # Errors
///
/// Returns an error when the workload is invalid, a duration cannot be
/// parsed, or the payload file cannot be read.
pub fn apply_config(args: &RunArgs, config: ConfigFile) -> AppResult<RunSetup> {
    let ConfigFile {
        test_name,
        test_suite_name,
        tags,
        output,
        workload,
        mut driver,
        namespace_metadata,
        workers,
        timings: timing_overrides,
    } = config;

    workload.validate()?;
    if driver.namespace_metadata.is_none() {
        driver.namespace_metadata = namespace_metadata;
    }

    let mut timings = Timings::for_workload(&workload);
    if let Some(overrides) = timing_overrides.as_ref() {
        apply_timings(&mut timings, overrides)?;
    }

    let workers_config = workers.unwrap_or_default();
    let endpoints = if args.workers.is_empty() {
        workers_config.endpoints
    } else {
        args.workers.clone()
    };
    let topology = if endpoints.is_empty() {
        WorkerTopology::Local
    } else {
        let request_timeout = workers_config
            .request_timeout
            .as_ref()
            .map(|value| value.to_positive_duration("request_timeout"))
            .transpose()?
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        WorkerTopology::Remote {
            endpoints,
            producer_workers: args.producer_workers.or(workers_config.producer_workers),
            request_timeout,
        }
    };

    let output_prefix = args
        .output
        .clone()
        .or(output)
        .unwrap_or_else(|| default_output_prefix(&workload.name, &driver.name, Local::now()));

    let payload = load_payload(&workload)?;
    let plan = RunPlan {
        run_id: format!(
            "{}-{}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            random_token(RUN_ID_SUFFIX_LEN)
        ),
        test_name: test_name.unwrap_or_else(|| workload.name.clone()),
        test_suite_name,
        tags,
        workload,
        driver,
        payload,
        timings,
    };

    Ok(RunSetup {
        plan,
        workers: topology,
        output_prefix: PathBuf::from(output_prefix),
    })
}

fn apply_timings(timings: &mut Timings, overrides: &TimingsConfig) -> Result<(), ConfigError> {
    if let Some(value) = overrides.settle_delay.as_ref() {
        timings.settle_delay = value.to_duration()?;
    }
    if let Some(value) = overrides.warmup.as_ref() {
        timings.warmup = value.to_duration()?;
    }
    if let Some(value) = overrides.test_duration.as_ref() {
        timings.test_duration = value.to_positive_duration("test_duration")?;
    }
    if let Some(value) = overrides.stats_poll_interval.as_ref() {
        timings.stats_poll_interval = value.to_positive_duration("stats_poll_interval")?;
    }
    if let Some(value) = overrides.rate_control_period.as_ref() {
        timings.rate_control_period = value.to_positive_duration("rate_control_period")?;
    }
    if let Some(value) = overrides.backlog_drain_budget.as_ref() {
        timings.backlog_drain_budget = value.to_positive_duration("backlog_drain_budget")?;
    }
    if let Some(value) = overrides.readiness_timeout.as_ref() {
        timings.readiness_timeout = value.to_positive_duration("readiness_timeout")?;
    }
    if let Some(attempts) = overrides.aggregate_attempts {
        timings.aggregate_attempts = attempts.max(1);
    }
    Ok(())
}

/// Reads the payload file, or fills `message_size` random bytes.
fn load_payload(workload: &Workload) -> AppResult<Bytes> {
    workload.payload_file.as_deref().map_or_else(
        || {
            let mut payload = vec![0_u8; workload.message_size];
            rand::thread_rng().fill(payload.as_mut_slice());
            Ok(Bytes::from(payload))
        },
        |path| {
            std::fs::read(path).map(Bytes::from).map_err(|err| {
                AppError::config(ConfigError::ReadPayload {
                    path: PathBuf::from(path),
                    source: err,
                })
            })
        },
    )
}
