use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Worker;
use super::assign::deal_round_robin;
use super::commands::{ConsumerAssignment, ProducerWorkAssignment, Topic, TopicsRequest};
use super::keys::{KeyDistributor, random_token};
use super::rate::RateLimiter;
use super::receive::{PauseFlags, ReceiveHandler};
use super::send::SendLoop;
use crate::driver::{
    BenchmarkConsumer, BenchmarkDriver, BenchmarkProducer, ConsumerCallback, DriverConfig,
    DriverRegistry,
};
use crate::error::{AppError, AppResult, DriverError, ProvisioningError};
use crate::metrics::{CountersStats, CumulativeLatencies, PeriodStats, WorkerStats};

const MAX_CONCURRENT_CREATIONS: usize = 16;
const STOP_GRACE_PERIOD: Duration = Duration::from_millis(100);
const PROBE_PAYLOAD: [u8; 10] = [0; 10];
const PROBE_KEY: &str = "key";
const TOPIC_SUFFIX_LEN: usize = 7;

struct RunState {
    driver: Option<Arc<dyn BenchmarkDriver>>,
    producers: Vec<Arc<dyn BenchmarkProducer>>,
    consumers: Vec<Box<dyn BenchmarkConsumer>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunState {
    fn idle() -> Self {
        Self {
            driver: None,
            producers: Vec::new(),
            consumers: Vec::new(),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }
}

/// In-process worker endpoint. Each instance is a self-contained run context:
/// its own driver, stats, limiter and pause flags.
pub struct LocalWorker {
    id: String,
    registry: DriverRegistry,
    send_parallelism: usize,
    stats: Arc<WorkerStats>,
    limiter: RateLimiter,
    flags: Arc<PauseFlags>,
    state: Mutex<RunState>,
}

impl LocalWorker {
    /// Worker using the built-in drivers and one send context per available
    /// CPU.
    ///
    /// # Errors
    ///
    /// Returns an error if the stats histograms cannot be created.
    pub fn new(id: impl Into<String>) -> AppResult<Self> {
        Self::with_registry(id, DriverRegistry::with_builtins(), None)
    }

    /// # Errors
    ///
    /// Returns an error if the stats histograms cannot be created.
    pub fn with_registry(
        id: impl Into<String>,
        registry: DriverRegistry,
        send_parallelism: Option<NonZeroUsize>,
    ) -> AppResult<Self> {
        let send_parallelism = send_parallelism
            .or_else(|| std::thread::available_parallelism().ok())
            .map_or(1, NonZeroUsize::get);
        Ok(Self {
            id: id.into(),
            registry,
            send_parallelism,
            stats: Arc::new(WorkerStats::new()?),
            limiter: RateLimiter::default(),
            flags: Arc::new(PauseFlags::default()),
            state: Mutex::new(RunState::idle()),
        })
    }

    #[must_use]
    pub fn publish_rate(&self) -> f64 {
        self.limiter.rate()
    }

    async fn driver(&self) -> Result<Arc<dyn BenchmarkDriver>, DriverError> {
        self.state
            .lock()
            .await
            .driver
            .clone()
            .ok_or(DriverError::NotInitialized)
    }

    async fn close_producers(producers: Vec<Arc<dyn BenchmarkProducer>>) {
        for result in join_all(producers.iter().map(|producer| producer.close())).await {
            if let Err(err) = result {
                warn!("Failed to close producer: {}", err);
            }
        }
    }

    async fn close_consumers(consumers: Vec<Box<dyn BenchmarkConsumer>>) {
        for result in join_all(consumers.iter().map(|consumer| consumer.close())).await {
            if let Err(err) = result {
                warn!("Failed to close consumer: {}", err);
            }
        }
    }
}

fn topic_names(request: &TopicsRequest, prefix: &str) -> Result<Vec<String>, ProvisioningError> {
    if request.count == 0 {
        return Err(ProvisioningError::NoTopics);
    }
    match &request.topic_name {
        Some(name) if request.count == 1 => Ok(vec![name.clone()]),
        Some(_) => Err(ProvisioningError::TopicNameWithMultipleTopics {
            count: request.count,
        }),
        None => Ok((0..request.count)
            .map(|index| format!("{}-{}-{:04}", prefix, random_token(TOPIC_SUFFIX_LEN), index))
            .collect()),
    }
}

#[async_trait]
impl Worker for LocalWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize_driver(&self, config: &DriverConfig) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.driver.is_some() {
            return Err(AppError::driver(DriverError::AlreadyActive));
        }
        let driver = self.registry.create(&config.driver)?;
        driver.initialize(config).await?;
        info!("Worker {} initialized driver '{}'", self.id, config.driver);
        state.driver = Some(driver);
        Ok(())
    }

    async fn create_topics(&self, request: &TopicsRequest) -> AppResult<Vec<Topic>> {
        let driver = self.driver().await?;
        let prefix = request
            .name_prefix
            .clone()
            .unwrap_or_else(|| driver.topic_name_prefix());
        let names = topic_names(request, &prefix)?;
        let partitions = request.partitions_per_topic;

        let results: Vec<Result<Topic, ProvisioningError>> = stream::iter(names)
            .map(|name| {
                let driver = Arc::clone(&driver);
                async move {
                    match driver.create_topic(&name, partitions).await {
                        Ok(()) => Ok(Topic { name, partitions }),
                        Err(source) => Err(ProvisioningError::Topic {
                            topic: name,
                            source,
                        }),
                    }
                }
            })
            .buffered(MAX_CONCURRENT_CREATIONS)
            .collect()
            .await;
        let topics = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        info!("Worker {} created {} topics", self.id, topics.len());
        Ok(topics)
    }

    async fn notify_topic_creation(&self, topics: &[Topic]) -> AppResult<()> {
        let driver = self.driver().await?;
        for topic in topics {
            driver
                .notify_topic_creation(&topic.name, topic.partitions)
                .await
                .map_err(|source| ProvisioningError::TopicNotification {
                    topic: topic.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn create_producers(&self, topics: &[String]) -> AppResult<()> {
        let driver = self.driver().await?;
        let results: Vec<Result<Arc<dyn BenchmarkProducer>, ProvisioningError>> =
            stream::iter(topics.iter().cloned())
                .map(|topic| {
                    let driver = Arc::clone(&driver);
                    async move {
                        driver
                            .create_producer(&topic)
                            .await
                            .map_err(|source| ProvisioningError::Producer { topic, source })
                    }
                })
                .buffered(MAX_CONCURRENT_CREATIONS)
                .collect()
                .await;

        let mut created = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(producer) => created.push(producer),
                Err(err) => {
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
            }
        }
        if let Some(err) = failure {
            Self::close_producers(created).await;
            return Err(err.into());
        }

        info!("Worker {} created {} producers", self.id, created.len());
        self.state.lock().await.producers.extend(created);
        Ok(())
    }

    async fn create_consumers(&self, assignment: &ConsumerAssignment) -> AppResult<()> {
        let (driver, cancel) = {
            let state = self.state.lock().await;
            let driver = state.driver.clone().ok_or(DriverError::NotInitialized)?;
            (driver, state.cancel.clone())
        };
        let handler: Arc<dyn ConsumerCallback> = Arc::new(ReceiveHandler {
            stats: Arc::clone(&self.stats),
            flags: Arc::clone(&self.flags),
            cancel,
        });

        let results = stream::iter(assignment.topics_subscriptions.iter().cloned())
            .map(|entry| {
                let driver = Arc::clone(&driver);
                let handler = Arc::clone(&handler);
                async move {
                    driver
                        .create_consumer(&entry.topic, &entry.subscription, entry.partition, handler)
                        .await
                        .map_err(|source| ProvisioningError::Consumer {
                            topic: entry.topic,
                            subscription: entry.subscription,
                            source,
                        })
                }
            })
            .buffered(MAX_CONCURRENT_CREATIONS)
            .collect::<Vec<_>>()
            .await;

        let mut created = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(consumer) => created.push(consumer),
                Err(err) => {
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
            }
        }
        if let Some(err) = failure {
            Self::close_consumers(created).await;
            return Err(err.into());
        }

        info!("Worker {} created {} consumers", self.id, created.len());
        self.state.lock().await.consumers.extend(created);
        Ok(())
    }

    async fn probe_producers(&self) -> AppResult<()> {
        let producers = {
            let state = self.state.lock().await;
            if state.driver.is_none() {
                return Err(AppError::driver(DriverError::NotInitialized));
            }
            state.producers.clone()
        };
        let payload = Bytes::from_static(&PROBE_PAYLOAD);
        let sends = producers
            .iter()
            .map(|producer| producer.send(Some(PROBE_KEY.to_owned()), payload.clone()));
        for result in join_all(sends).await {
            match result {
                Ok(_) => self.stats.record_message_sent(),
                Err(err) => {
                    self.stats.record_producer_failure();
                    warn!("Probe send failed on worker {}: {}", self.id, err);
                }
            }
        }
        debug!("Worker {} probed {} producers", self.id, producers.len());
        Ok(())
    }

    async fn start_load(&self, assignment: &ProducerWorkAssignment) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.driver.is_none() {
            return Err(AppError::driver(DriverError::NotInitialized));
        }
        if !state.tasks.is_empty() {
            return Err(AppError::driver(DriverError::Operation {
                context: "start load",
                message: "load is already running".to_owned(),
            }));
        }

        let rate = self.limiter.set_rate(assignment.publish_rate);
        let cancel = state.cancel.clone();
        let refill = self.limiter.spawn_refill(cancel.clone());
        state.tasks.push(refill);

        let groups = deal_round_robin(&state.producers, self.send_parallelism);
        let contexts = groups.len();
        for producers in groups {
            let send_loop = SendLoop {
                producers,
                limiter: self.limiter.clone(),
                stats: Arc::clone(&self.stats),
                flags: Arc::clone(&self.flags),
                payload: assignment.payload.clone(),
                keys: KeyDistributor::build(assignment.key_distributor_type),
                cancel: cancel.clone(),
            };
            state.tasks.push(tokio::spawn(send_loop.run()));
        }
        info!(
            "Worker {} started load at {:.1} msg/s over {} send contexts",
            self.id, rate, contexts
        );
        Ok(())
    }

    async fn adjust_publish_rate(&self, rate: f64) -> AppResult<()> {
        let applied = self.limiter.set_rate(rate);
        debug!("Worker {} publish rate set to {:.1} msg/s", self.id, applied);
        Ok(())
    }

    async fn pause_consumers(&self) -> AppResult<()> {
        self.flags.set_consumers(true);
        info!("Worker {} paused consumers", self.id);
        Ok(())
    }

    async fn resume_consumers(&self) -> AppResult<()> {
        self.flags.set_consumers(false);
        info!("Worker {} resumed consumers", self.id);
        Ok(())
    }

    async fn pause_producers(&self) -> AppResult<()> {
        self.flags.set_producers(true);
        info!("Worker {} paused producers", self.id);
        Ok(())
    }

    async fn resume_producers(&self) -> AppResult<()> {
        self.flags.set_producers(false);
        info!("Worker {} resumed producers", self.id);
        Ok(())
    }

    async fn period_stats(&self) -> AppResult<PeriodStats> {
        Ok(self.stats.take_period_stats())
    }

    async fn cumulative_latencies(&self) -> AppResult<CumulativeLatencies> {
        Ok(self.stats.cumulative_latencies())
    }

    async fn counters_stats(&self) -> AppResult<CountersStats> {
        Ok(self.stats.counters())
    }

    async fn reset_stats(&self) -> AppResult<()> {
        self.stats.reset();
        Ok(())
    }

    async fn stop_all(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.cancel.cancel();
        self.flags.clear();

        for result in join_all(std::mem::take(&mut state.tasks)).await {
            if let Err(err) = result {
                warn!("Load task on worker {} ended abnormally: {}", self.id, err);
            }
        }
        self.limiter.drain();

        // In-flight sends and deliveries settle before their handles go away.
        tokio::time::sleep(STOP_GRACE_PERIOD).await;

        Self::close_producers(std::mem::take(&mut state.producers)).await;
        Self::close_consumers(std::mem::take(&mut state.consumers)).await;
        if let Some(driver) = state.driver.take() {
            if let Err(err) = driver.close().await {
                warn!("Failed to close driver on worker {}: {}", self.id, err);
            }
        }

        self.stats.reset();
        state.cancel = CancellationToken::new();
        info!("Worker {} stopped", self.id);
        Ok(())
    }

    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }
}
