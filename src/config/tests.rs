use std::time::Duration;

use tempfile::tempdir;

use super::types::{ConfigFile, DurationValue};
use super::{RunSetup, WorkerTopology, apply_config, load_config_file, parse_duration_value};
use crate::args::RunArgs;
use crate::error::ConfigError;
use crate::worker::{DEFAULT_REQUEST_TIMEOUT, KeyDistributorType};

const TOML_CONFIG: &str = r#"
test_name = "smoke"
tags = ["nightly run"]

[workload]
name = "1-topic-16-partitions"
topics = 1
partitions_per_topic = 16
message_size = 32
producer_rate = 500.0
test_duration_minutes = 5
key_distributor = "KEY_ROUND_ROBIN"

[driver]
name = "loopback-local"
driver = "loopback"
producer_config = "batch.size=65536"

[namespace_metadata]
namespace_name = "bench-ns"
region = "westeurope"

[workers]
endpoints = ["http://10.0.0.1:9000", "http://10.0.0.2:9000"]
producer_workers = 1
request_timeout = "30s"

[timings]
settle_delay = 0
warmup = "0s"
stats_poll_interval = "500ms"
aggregate_attempts = 0
"#;

fn write_config(name: &str, content: &str) -> Result<(tempfile::TempDir, ConfigFile), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let path = dir.path().join(name);
    std::fs::write(&path, content).map_err(|err| format!("write failed: {}", err))?;
    let config = load_config_file(&path).map_err(|err| err.to_string())?;
    Ok((dir, config))
}

fn apply(args: &RunArgs, config: ConfigFile) -> Result<RunSetup, String> {
    apply_config(args, config).map_err(|err| err.to_string())
}

#[test]
fn parse_toml_config() -> Result<(), String> {
    let (_dir, config) = write_config("brokerbench.toml", TOML_CONFIG)?;
    if config.workload.partitions_per_topic != 16 || config.workload.message_size != 32 {
        return Err("Unexpected workload".to_owned());
    }
    if config.workload.key_distributor != KeyDistributorType::KeyRoundRobin {
        return Err("Unexpected key distributor".to_owned());
    }
    if config.workload.warmup_duration_minutes != 4 || config.workload.subscriptions_per_topic != 1 {
        return Err("Workload defaults were not applied".to_owned());
    }
    if config.driver.producer_config != "batch.size=65536" {
        return Err("Unexpected producer config".to_owned());
    }
    let Some(metadata) = config.namespace_metadata.as_ref() else {
        return Err("Expected namespace metadata".to_owned());
    };
    if metadata.namespace_name != "bench-ns" {
        return Err("Unexpected namespace".to_owned());
    }
    Ok(())
}

#[test]
fn parse_json_config() -> Result<(), String> {
    let content = r#"{
  "test_name": "json run",
  "workload": {
    "name": "json-workload",
    "topics": 2,
    "test_duration_minutes": 1
  },
  "driver": { "name": "loopback-local", "driver": "loopback", "producerConfig": "batch.count=3" }
}"#;
    let (_dir, config) = write_config("brokerbench.json", content)?;
    if config.workload.topics != 2 || config.workload.message_size != 1024 {
        return Err("Unexpected workload".to_owned());
    }
    if config.driver.producer_config != "batch.count=3" {
        return Err("Unexpected producer config".to_owned());
    }
    if config.workers.is_some() || config.timings.is_some() {
        return Err("Expected no workers or timings".to_owned());
    }
    Ok(())
}

#[test]
fn unknown_workload_keys_are_rejected() -> Result<(), String> {
    let content = r#"
[workload]
name = "typo"
test_duration_minutes = 1
topicz = 3

[driver]
driver = "loopback"
"#;
    match write_config("brokerbench.toml", content) {
        Err(message) if message.contains("topicz") => Ok(()),
        Err(message) => Err(format!("Unexpected error: {}", message)),
        Ok(_) => Err("Expected an unknown field error".to_owned()),
    }
}

#[test]
fn unsupported_extension_is_rejected() -> Result<(), String> {
    match write_config("brokerbench.yaml", "workload: {}") {
        Err(message) if message.contains("yaml") => Ok(()),
        Err(message) => Err(format!("Unexpected error: {}", message)),
        Ok(_) => Err("Expected an unsupported extension error".to_owned()),
    }
}

#[test]
fn apply_config_resolves_remote_run() -> Result<(), String> {
    let (_dir, config) = write_config("brokerbench.toml", TOML_CONFIG)?;
    let setup = apply(&RunArgs::default(), config)?;

    let expected = WorkerTopology::Remote {
        endpoints: vec![
            "http://10.0.0.1:9000".to_owned(),
            "http://10.0.0.2:9000".to_owned(),
        ],
        producer_workers: Some(1),
        request_timeout: Duration::from_secs(30),
    };
    if setup.workers != expected {
        return Err(format!("Unexpected topology: {:?}", setup.workers));
    }

    let plan = &setup.plan;
    if plan.test_name != "smoke" || plan.tags != ["nightly run"] {
        return Err("Unexpected test identity".to_owned());
    }
    if plan.payload.len() != 32 {
        return Err(format!("Unexpected payload length {}", plan.payload.len()));
    }
    let Some(metadata) = plan.driver.namespace_metadata.as_ref() else {
        return Err("Namespace metadata was not forwarded to the driver".to_owned());
    };
    if metadata.region != "westeurope" {
        return Err("Unexpected region".to_owned());
    }

    let timings = &plan.timings;
    if !timings.settle_delay.is_zero() || !timings.warmup.is_zero() {
        return Err("Zero waits were not applied".to_owned());
    }
    if timings.stats_poll_interval != Duration::from_millis(500) {
        return Err("Unexpected poll interval".to_owned());
    }
    if timings.test_duration != Duration::from_secs(300) || timings.aggregate_attempts != 1 {
        return Err("Unexpected timings".to_owned());
    }

    let prefix = setup.output_prefix.to_string_lossy().into_owned();
    if !prefix.starts_with("1-topic-16-partitions-loopback-local-") {
        return Err(format!("Unexpected output prefix {}", prefix));
    }
    Ok(())
}

#[test]
fn command_line_overrides_config() -> Result<(), String> {
    let (_dir, config) = write_config("brokerbench.toml", TOML_CONFIG)?;
    let args = RunArgs {
        config: None,
        output: Some("out/run".to_owned()),
        workers: vec!["http://127.0.0.1:9000".to_owned()],
        producer_workers: None,
    };
    let setup = apply(&args, config)?;
    match &setup.workers {
        WorkerTopology::Remote { endpoints, .. } if endpoints == &["http://127.0.0.1:9000"] => {}
        WorkerTopology::Remote { .. } | WorkerTopology::Local => {
            return Err(format!("Unexpected topology: {:?}", setup.workers));
        }
    }
    if setup.output_prefix.to_string_lossy() != "out/run" {
        return Err("Output override was ignored".to_owned());
    }
    Ok(())
}

#[test]
fn config_without_endpoints_runs_locally() -> Result<(), String> {
    let content = r#"
[workload]
name = "local"
message_size = 16
test_duration_minutes = 1

[driver]
name = "loopback"
driver = "loopback"
"#;
    let (_dir, config) = write_config("brokerbench.toml", content)?;
    let setup = apply(&RunArgs::default(), config)?;
    if setup.workers != WorkerTopology::Local {
        return Err(format!("Unexpected topology: {:?}", setup.workers));
    }
    if setup.plan.test_name != "local" {
        return Err("Test name should default to the workload name".to_owned());
    }
    if setup.plan.timings.settle_delay != Duration::from_secs(60) {
        return Err("Default settle delay not applied".to_owned());
    }
    Ok(())
}

#[test]
fn payload_file_is_read() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let payload_path = dir.path().join("payload.bin");
    std::fs::write(&payload_path, [1_u8, 2, 3, 4]).map_err(|err| err.to_string())?;
    let content = format!(
        r#"
[workload]
name = "file-payload"
message_size = 4
payload_file = "{}"
test_duration_minutes = 1

[driver]
driver = "loopback"
"#,
        payload_path.display()
    );
    let (_config_dir, config) = write_config("brokerbench.toml", &content)?;
    let setup = apply(&RunArgs::default(), config)?;
    if setup.plan.payload.as_ref() != [1_u8, 2, 3, 4] {
        return Err("Unexpected payload".to_owned());
    }
    Ok(())
}

#[test]
fn invalid_workload_is_rejected() -> Result<(), String> {
    let content = r#"
[workload]
name = "backlog"
consumer_backlog_size_gb = 1
test_duration_minutes = 1

[driver]
driver = "loopback"
"#;
    let (_dir, config) = write_config("brokerbench.toml", content)?;
    match apply_config(&RunArgs::default(), config) {
        Err(crate::error::AppError::Config(ConfigError::BacklogWithoutFixedRate)) => Ok(()),
        Err(err) => Err(format!("Unexpected error: {}", err)),
        Ok(_) => Err("Expected backlog validation to fail".to_owned()),
    }
}

#[test]
fn remote_topology_defaults_request_timeout() -> Result<(), String> {
    let content = r#"
[workload]
name = "remote"
test_duration_minutes = 1

[driver]
driver = "loopback"

[workers]
endpoints = ["http://10.0.0.1:9000"]
"#;
    let (_dir, config) = write_config("brokerbench.toml", content)?;
    let setup = apply(&RunArgs::default(), config)?;
    match setup.workers {
        WorkerTopology::Remote {
            request_timeout,
            producer_workers: None,
            ..
        } if request_timeout == DEFAULT_REQUEST_TIMEOUT => Ok(()),
        other => Err(format!("Unexpected topology: {:?}", other)),
    }
}

#[test]
fn parse_duration_value_units() -> Result<(), String> {
    let cases = [
        ("250ms", Duration::from_millis(250)),
        ("10s", Duration::from_secs(10)),
        ("7", Duration::from_secs(7)),
        ("2m", Duration::from_secs(120)),
        ("1h", Duration::from_secs(3_600)),
        ("0s", Duration::ZERO),
    ];
    for (input, expected) in cases {
        let parsed = parse_duration_value(input).map_err(|err| err.to_string())?;
        if parsed != expected {
            return Err(format!("'{}' parsed as {:?}", input, parsed));
        }
    }
    Ok(())
}

#[test]
fn parse_duration_value_rejects_bad_input() -> Result<(), String> {
    let checks: [(&str, fn(&ConfigError) -> bool); 4] = [
        ("", |err| matches!(err, ConfigError::DurationEmpty)),
        ("fast", |err| matches!(err, ConfigError::InvalidDurationFormat { .. })),
        ("5d", |err| matches!(err, ConfigError::InvalidDurationUnit { .. })),
        ("99999999999999999999s", |err| {
            matches!(err, ConfigError::InvalidDurationNumber { .. })
        }),
    ];
    for (input, expected) in checks {
        match parse_duration_value(input) {
            Err(err) if expected(&err) => {}
            other => return Err(format!("'{}' gave {:?}", input, other)),
        }
    }
    Ok(())
}

#[test]
fn zero_poll_interval_is_rejected() -> Result<(), String> {
    match DurationValue::Text("0ms".to_owned()).to_positive_duration("stats_poll_interval") {
        Err(ConfigError::ZeroDuration {
            field: "stats_poll_interval",
        }) => Ok(()),
        other => Err(format!("Unexpected result: {:?}", other)),
    }
}
