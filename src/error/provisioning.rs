use thiserror::Error;

use super::DriverError;

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("Number of topics has to be non zero.")]
    NoTopics,
    #[error("Can't specify {count} topics when specifying topic name.")]
    TopicNameWithMultipleTopics { count: u32 },
    #[error("Failed to create topic '{topic}': {source}")]
    Topic {
        topic: String,
        #[source]
        source: DriverError,
    },
    #[error("Failed to notify topic creation for '{topic}': {source}")]
    TopicNotification {
        topic: String,
        #[source]
        source: DriverError,
    },
    #[error("Failed to create producer for topic '{topic}': {source}")]
    Producer {
        topic: String,
        #[source]
        source: DriverError,
    },
    #[error("Failed to create consumer for '{topic}'/'{subscription}': {source}")]
    Consumer {
        topic: String,
        subscription: String,
        #[source]
        source: DriverError,
    },
    #[error("Timed out waiting for consumers to be ready (received {received} of {expected}).")]
    ConsumersNotReady { expected: u64, received: u64 },
}
