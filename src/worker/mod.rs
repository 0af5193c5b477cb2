//! Worker endpoints: the in-process [`LocalWorker`], the RPC-backed
//! [`HttpWorker`], the [`WorkerEnsemble`] that drives many of either as one,
//! and the HTTP server exposing a local worker to a remote controller.
mod assign;
mod commands;
mod ensemble;
mod http;
mod keys;
mod local;
mod rate;
mod receive;
mod remote;
mod send;
mod server;

#[cfg(test)]
pub(crate) mod test_support;
#[cfg(test)]
mod tests;

use async_trait::async_trait;

use crate::driver::DriverConfig;
use crate::error::AppResult;
use crate::metrics::{CountersStats, CumulativeLatencies, PeriodStats};

pub use commands::{
    ConsumerAssignment, KeyDistributorType, ProducerWorkAssignment, PublishRate, StatusResponse,
    Topic, TopicSubscription, TopicsRequest,
};
pub use ensemble::WorkerEnsemble;
pub use keys::{KeyDistributor, random_token};
pub use local::LocalWorker;
pub use rate::{MIN_PUBLISH_RATE, RateLimiter, clamp_rate};
pub use remote::{DEFAULT_REQUEST_TIMEOUT, HttpWorker};
pub use server::serve_worker;

/// Operations shared by every worker endpoint, local or remote, and by the
/// ensemble that fans them out.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable identifier used in logs.
    fn id(&self) -> &str;

    /// Activate the driver named by `config.driver`.
    ///
    /// # Errors
    ///
    /// Fails if a driver is already active, the driver is unknown, or it
    /// cannot be initialized.
    async fn initialize_driver(&self, config: &DriverConfig) -> AppResult<()>;

    /// # Errors
    ///
    /// Fails if the request is invalid or any topic cannot be created.
    async fn create_topics(&self, request: &TopicsRequest) -> AppResult<Vec<Topic>>;

    /// # Errors
    ///
    /// Fails if the driver rejects any notification.
    async fn notify_topic_creation(&self, topics: &[Topic]) -> AppResult<()>;

    /// One producer per entry; duplicates yield several producers per topic.
    ///
    /// # Errors
    ///
    /// Fails if any producer cannot be created; none are kept in that case.
    async fn create_producers(&self, topics: &[String]) -> AppResult<()>;

    /// # Errors
    ///
    /// Fails if any consumer cannot be created; none are kept in that case.
    async fn create_consumers(&self, assignment: &ConsumerAssignment) -> AppResult<()>;

    /// # Errors
    ///
    /// Fails if no driver is active.
    async fn probe_producers(&self) -> AppResult<()>;

    /// # Errors
    ///
    /// Fails if no driver is active or load is already running.
    async fn start_load(&self, assignment: &ProducerWorkAssignment) -> AppResult<()>;

    /// # Errors
    ///
    /// Fails only on transport errors for remote workers.
    async fn adjust_publish_rate(&self, rate: f64) -> AppResult<()>;

    /// # Errors
    ///
    /// Fails only on transport errors for remote workers.
    async fn pause_consumers(&self) -> AppResult<()>;

    /// # Errors
    ///
    /// Fails only on transport errors for remote workers.
    async fn resume_consumers(&self) -> AppResult<()>;

    /// # Errors
    ///
    /// Fails only on transport errors for remote workers.
    async fn pause_producers(&self) -> AppResult<()>;

    /// # Errors
    ///
    /// Fails only on transport errors for remote workers.
    async fn resume_producers(&self) -> AppResult<()>;

    /// Stats since the previous call; reading resets the period window.
    ///
    /// # Errors
    ///
    /// Fails on transport or histogram errors.
    async fn period_stats(&self) -> AppResult<PeriodStats>;

    /// # Errors
    ///
    /// Fails on transport or histogram errors.
    async fn cumulative_latencies(&self) -> AppResult<CumulativeLatencies>;

    /// # Errors
    ///
    /// Fails on transport errors.
    async fn counters_stats(&self) -> AppResult<CountersStats>;

    /// # Errors
    ///
    /// Fails on transport errors.
    async fn reset_stats(&self) -> AppResult<()>;

    /// Stop load, close every producer, consumer and the driver. Idempotent.
    ///
    /// # Errors
    ///
    /// Fails on transport errors.
    async fn stop_all(&self) -> AppResult<()>;

    /// # Errors
    ///
    /// Fails if the endpoint is unreachable.
    async fn health_check(&self) -> AppResult<()>;
}
