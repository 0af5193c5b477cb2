use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to parse JSON config '{path}': {source}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported config extension '{ext}'. Use .toml or .json.")]
    UnsupportedExtension { ext: String },
    #[error("Config file must have .toml or .json extension.")]
    MissingExtension,
    #[error("No config file given and no brokerbench.toml/brokerbench.json found.")]
    MissingConfig,
    #[error("Failed to read payload file '{path}': {source}")]
    ReadPayload {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Payload length mismatch. Actual is: {actual}, but expected: {expected}")]
    PayloadSizeMismatch { expected: usize, actual: usize },
    #[error("Cannot probe producer sustainable rate when building backlog.")]
    BacklogWithoutFixedRate,
    #[error("Workload must define at least one topic.")]
    NoTopics,
    #[error("Can't specify {count} topics when specifying topic name.")]
    TopicNameWithMultipleTopics { count: u32 },
    #[error("Test duration must be > 0.")]
    ZeroTestDuration,
    #[error("Producer rate must be a finite, non-negative number (got {rate}).")]
    InvalidProducerRate { rate: f64 },
    #[error("At least one worker endpoint is required.")]
    NoWorkers,
    #[error("Producer worker count {requested} is out of range for {available} workers.")]
    ProducerWorkersOutOfRange { requested: usize, available: usize },
    #[error("Duration must not be empty.")]
    DurationEmpty,
    #[error("Invalid duration '{value}'.")]
    InvalidDurationFormat { value: String },
    #[error("Invalid duration '{value}': {source}")]
    InvalidDurationNumber {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("Duration overflow.")]
    DurationOverflow,
    #[error("Invalid duration unit '{unit}'.")]
    InvalidDurationUnit { unit: String },
    #[error("Duration '{field}' must be > 0.")]
    ZeroDuration { field: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
