use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::config::DriverConfig;
use crate::error::DriverError;

/// Messaging backend plugin. One instance serves one run on one endpoint.
#[async_trait]
pub trait BenchmarkDriver: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the driver rejects its configuration or cannot
    /// reach the backend.
    async fn initialize(&self, config: &DriverConfig) -> Result<(), DriverError>;

    /// Prefix used for generated topic names.
    fn topic_name_prefix(&self) -> String;

    /// # Errors
    ///
    /// Returns an error when the backend refuses to create the topic.
    async fn create_topic(&self, topic: &str, partitions: u32) -> Result<(), DriverError>;

    /// Tells a driver instance that did not create `topic` that it now exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the driver cannot register the topic.
    async fn notify_topic_creation(&self, topic: &str, partitions: u32) -> Result<(), DriverError> {
        let _ = (topic, partitions);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error when the producer cannot be opened.
    async fn create_producer(&self, topic: &str) -> Result<Arc<dyn BenchmarkProducer>, DriverError>;

    /// Opens a consumer that reports every delivered message to `callback`.
    ///
    /// # Errors
    ///
    /// Returns an error when the consumer cannot be opened.
    async fn create_consumer(
        &self,
        topic: &str,
        subscription: &str,
        partition: Option<u32>,
        callback: Arc<dyn ConsumerCallback>,
    ) -> Result<Box<dyn BenchmarkConsumer>, DriverError>;

    /// # Errors
    ///
    /// Returns an error when releasing backend resources fails.
    async fn close(&self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait BenchmarkProducer: Send + Sync {
    /// Send one message and resolve once the backend acknowledged it.
    /// Returns the number of payload bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error when the send fails or the producer is closed.
    async fn send(&self, key: Option<String>, payload: Bytes) -> Result<usize, DriverError>;

    /// # Errors
    ///
    /// Returns an error when the producer cannot be closed cleanly.
    async fn close(&self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait BenchmarkConsumer: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the consumer cannot be closed cleanly.
    async fn close(&self) -> Result<(), DriverError>;
}

/// Receive hook installed by the worker on every consumer.
#[async_trait]
pub trait ConsumerCallback: Send + Sync {
    async fn message_received(&self, payload_len: usize, publish_timestamp_us: u64);
}
