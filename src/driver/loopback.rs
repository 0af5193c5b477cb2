//! In-memory broker for smoke runs and tests.
//!
//! Every subscription of a topic is a consumer group. A published message is
//! copied to each group and handed to one group member, round-robin. Messages
//! published while a group has no live member are dropped for that group.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::DriverConfig;
use super::traits::{BenchmarkConsumer, BenchmarkDriver, BenchmarkProducer, ConsumerCallback};
use crate::clock::unix_time_us;
use crate::error::DriverError;

pub const LOOPBACK_DRIVER: &str = "loopback";
const DELIVERY_DELAY_PROPERTY: &str = "delivery_delay_ms";

#[derive(Debug, Clone, Copy)]
struct Delivery {
    payload_len: usize,
    publish_timestamp_us: u64,
}

#[derive(Debug, Default)]
struct ConsumerGroup {
    members: Vec<mpsc::UnboundedSender<Delivery>>,
    next: usize,
}

impl ConsumerGroup {
    fn deliver(&mut self, delivery: Delivery) {
        while !self.members.is_empty() {
            let index = self.next.checked_rem(self.members.len()).unwrap_or(0);
            self.next = self.next.wrapping_add(1);
            let delivered = self
                .members
                .get(index)
                .map(|member| member.send(delivery).is_ok())
                .unwrap_or(false);
            if delivered {
                return;
            }
            // Receiver gone: the consumer was closed.
            self.members.remove(index);
        }
    }
}

#[derive(Debug, Default)]
struct LoopbackTopic {
    partitions: u32,
    groups: HashMap<String, ConsumerGroup>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, LoopbackTopic>,
}

/// Shared in-memory broker. Clones refer to the same topics.
#[derive(Debug, Clone, Default)]
pub struct LoopbackBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LoopbackBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn create_topic(&self, topic: &str, partitions: u32) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .topics
            .entry(topic.to_owned())
            .or_insert_with(|| LoopbackTopic {
                partitions,
                groups: HashMap::new(),
            });
    }

    #[must_use]
    pub fn topic_partitions(&self, topic: &str) -> Option<u32> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.topics.get(topic).map(|entry| entry.partitions)
    }

    fn subscribe(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, DriverError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| DriverError::UnknownTopic {
                topic: topic.to_owned(),
            })?;
        let (tx, rx) = mpsc::unbounded_channel();
        entry
            .groups
            .entry(subscription.to_owned())
            .or_default()
            .members
            .push(tx);
        Ok(rx)
    }

    fn publish(&self, topic: &str, delivery: Delivery) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| DriverError::UnknownTopic {
                topic: topic.to_owned(),
            })?;
        for group in entry.groups.values_mut() {
            group.deliver(delivery);
        }
        Ok(())
    }
}

pub struct LoopbackDriver {
    broker: LoopbackBroker,
    delivery_delay_ms: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl LoopbackDriver {
    #[must_use]
    pub fn new(broker: LoopbackBroker) -> Self {
        Self {
            broker,
            delivery_delay_ms: Arc::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl BenchmarkDriver for LoopbackDriver {
    async fn initialize(&self, config: &DriverConfig) -> Result<(), DriverError> {
        let delay = match config.properties.get(DELIVERY_DELAY_PROPERTY) {
            None => 0,
            Some(value) => value.as_u64().ok_or_else(|| DriverError::InvalidProperty {
                key: DELIVERY_DELAY_PROPERTY.to_owned(),
                message: format!("expected a non-negative integer, got {}", value),
            })?,
        };
        self.delivery_delay_ms.store(delay, Ordering::Relaxed);
        tracing::debug!("Loopback driver initialized (delivery delay {}ms)", delay);
        Ok(())
    }

    fn topic_name_prefix(&self) -> String {
        "loopback-topic".to_owned()
    }

    async fn create_topic(&self, topic: &str, partitions: u32) -> Result<(), DriverError> {
        self.ensure_open()?;
        self.broker.create_topic(topic, partitions);
        Ok(())
    }

    async fn notify_topic_creation(&self, topic: &str, partitions: u32) -> Result<(), DriverError> {
        self.ensure_open()?;
        self.broker.create_topic(topic, partitions);
        Ok(())
    }

    async fn create_producer(&self, topic: &str) -> Result<Arc<dyn BenchmarkProducer>, DriverError> {
        self.ensure_open()?;
        if self.broker.topic_partitions(topic).is_none() {
            return Err(DriverError::UnknownTopic {
                topic: topic.to_owned(),
            });
        }
        Ok(Arc::new(LoopbackProducer {
            topic: topic.to_owned(),
            broker: self.broker.clone(),
            delivery_delay_ms: Arc::clone(&self.delivery_delay_ms),
            closed: AtomicBool::new(false),
        }))
    }

    async fn create_consumer(
        &self,
        topic: &str,
        subscription: &str,
        _partition: Option<u32>,
        callback: Arc<dyn ConsumerCallback>,
    ) -> Result<Box<dyn BenchmarkConsumer>, DriverError> {
        self.ensure_open()?;
        let mut receiver = self.broker.subscribe(topic, subscription)?;
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => break,
                    delivery = receiver.recv() => match delivery {
                        Some(delivery) => {
                            callback
                                .message_received(delivery.payload_len, delivery.publish_timestamp_us)
                                .await;
                        }
                        None => break,
                    },
                }
            }
        });
        Ok(Box::new(LoopbackConsumer {
            cancel,
            task: Mutex::new(Some(task)),
        }))
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct LoopbackProducer {
    topic: String,
    broker: LoopbackBroker,
    delivery_delay_ms: Arc<AtomicU64>,
    closed: AtomicBool,
}

#[async_trait]
impl BenchmarkProducer for LoopbackProducer {
    async fn send(&self, _key: Option<String>, payload: Bytes) -> Result<usize, DriverError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }
        let publish_timestamp_us = unix_time_us();
        let delay = self.delivery_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.broker.publish(
            &self.topic,
            Delivery {
                payload_len: payload.len(),
                publish_timestamp_us,
            },
        )?;
        Ok(payload.len())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct LoopbackConsumer {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl BenchmarkConsumer for LoopbackConsumer {
    async fn close(&self) -> Result<(), DriverError> {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.await.map_err(|err| DriverError::Operation {
                context: "close loopback consumer",
                message: err.to_string(),
            })?;
        }
        Ok(())
    }
}
