use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::worker::KeyDistributorType;

const fn default_one() -> u32 {
    1
}

const fn default_message_size() -> usize {
    1024
}

const fn default_warmup_minutes() -> u64 {
    4
}

/// Shape of one benchmark run: topology, payload, rate and durations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workload {
    pub name: String,
    #[serde(default = "default_one")]
    pub topics: u32,
    #[serde(default = "default_one")]
    pub partitions_per_topic: u32,
    /// Use this exact name instead of generated ones; requires `topics = 1`.
    #[serde(default)]
    pub topic_name: Option<String>,
    #[serde(default)]
    pub key_distributor: KeyDistributorType,
    #[serde(default = "default_message_size")]
    pub message_size: usize,
    #[serde(default)]
    pub payload_file: Option<String>,
    #[serde(default = "default_one")]
    pub subscriptions_per_topic: u32,
    #[serde(default = "default_one")]
    pub producers_per_topic: u32,
    #[serde(default = "default_one")]
    pub consumer_per_subscription: u32,
    /// Messages per second across all producers; 0 searches for the
    /// sustainable rate.
    #[serde(default)]
    pub producer_rate: f64,
    #[serde(default)]
    pub consumer_backlog_size_gb: u64,
    pub test_duration_minutes: u64,
    #[serde(default = "default_warmup_minutes")]
    pub warmup_duration_minutes: u64,
    /// Probe producers and wait for every subscription to see a message
    /// before measuring.
    #[serde(default)]
    pub ensure_topics_ready: bool,
}

impl Workload {
    /// Checks the combinations that cannot run.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topics == 0 {
            return Err(ConfigError::NoTopics);
        }
        if self.topic_name.is_some() && self.topics != 1 {
            return Err(ConfigError::TopicNameWithMultipleTopics { count: self.topics });
        }
        if self.test_duration_minutes == 0 {
            return Err(ConfigError::ZeroTestDuration);
        }
        if !self.producer_rate.is_finite() || self.producer_rate < 0.0 {
            return Err(ConfigError::InvalidProducerRate {
                rate: self.producer_rate,
            });
        }
        if self.consumer_backlog_size_gb > 0 && self.producer_rate <= 0.0 {
            return Err(ConfigError::BacklogWithoutFixedRate);
        }
        Ok(())
    }

    #[must_use]
    pub fn has_fixed_rate(&self) -> bool {
        self.producer_rate > 0.0
    }

    /// Every consumer of every subscription of every topic.
    #[must_use]
    pub fn consumer_count(&self) -> u32 {
        self.consumer_per_subscription
            .saturating_mul(self.subscriptions_per_topic)
    }
}
