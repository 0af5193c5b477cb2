use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::Worker;
use super::commands::{ConsumerAssignment, ProducerWorkAssignment, Topic, TopicsRequest};
use crate::driver::DriverConfig;
use crate::error::{AppError, AppResult, TransportError};
use crate::metrics::{CountersStats, CumulativeLatencies, PeriodStats};

/// Worker double with scripted counters. While producers run, every
/// `counters_stats` call advances `messages_sent` by `sent_per_poll`; while
/// consumers run and `acknowledges` is set, `messages_received` catches up,
/// but only from the `lag_polls`-th counters call on.
pub(crate) struct ScriptedWorker {
    id: String,
    pub(crate) sent_per_poll: u64,
    pub(crate) acknowledges: bool,
    pub(crate) lag_polls: u64,
    pub(crate) fail_period_stats: bool,
    pub(crate) fail_cumulative: bool,
    pub(crate) fail_adjust: bool,
    pub(crate) subscriptions: u64,
    counters: Mutex<CountersStats>,
    polls: AtomicU64,
    producers_paused: AtomicBool,
    consumers_paused: AtomicBool,
    calls: Mutex<Vec<&'static str>>,
    rates: Mutex<Vec<f64>>,
    topics: Mutex<Vec<String>>,
    topic_prefix: Mutex<Option<String>>,
}

impl ScriptedWorker {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            sent_per_poll: 0,
            acknowledges: true,
            lag_polls: 0,
            fail_period_stats: false,
            fail_cumulative: false,
            fail_adjust: false,
            subscriptions: 1,
            counters: Mutex::new(CountersStats::default()),
            polls: AtomicU64::new(0),
            producers_paused: AtomicBool::new(false),
            consumers_paused: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            rates: Mutex::new(Vec::new()),
            topics: Mutex::new(Vec::new()),
            topic_prefix: Mutex::new(None),
        }
    }

    pub(crate) fn with_counters(self, counters: CountersStats) -> Self {
        *self.counters.lock().unwrap_or_else(PoisonError::into_inner) = counters;
        self
    }

    pub(crate) fn call_count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| **call == name)
            .count()
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn rates(&self) -> Vec<f64> {
        self.rates.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn producer_topics(&self) -> Vec<String> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn topic_prefix(&self) -> Option<String> {
        self.topic_prefix
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, name: &'static str) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name);
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize_driver(&self, _config: &DriverConfig) -> AppResult<()> {
        self.record("initialize_driver");
        Ok(())
    }

    async fn create_topics(&self, request: &TopicsRequest) -> AppResult<Vec<Topic>> {
        self.record("create_topics");
        *self.topic_prefix.lock().unwrap_or_else(PoisonError::into_inner) =
            request.name_prefix.clone();
        Ok((0..request.count)
            .map(|index| Topic {
                name: format!("scripted-{:04}", index),
                partitions: request.partitions_per_topic,
            })
            .collect())
    }

    async fn notify_topic_creation(&self, _topics: &[Topic]) -> AppResult<()> {
        self.record("notify_topic_creation");
        Ok(())
    }

    async fn create_producers(&self, topics: &[String]) -> AppResult<()> {
        self.record("create_producers");
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(topics);
        Ok(())
    }

    async fn create_consumers(&self, _assignment: &ConsumerAssignment) -> AppResult<()> {
        self.record("create_consumers");
        Ok(())
    }

    async fn probe_producers(&self) -> AppResult<()> {
        self.record("probe_producers");
        Ok(())
    }

    async fn start_load(&self, assignment: &ProducerWorkAssignment) -> AppResult<()> {
        self.record("start_load");
        self.rates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(assignment.publish_rate);
        Ok(())
    }

    async fn adjust_publish_rate(&self, rate: f64) -> AppResult<()> {
        self.record("adjust_publish_rate");
        if self.fail_adjust {
            return Err(AppError::transport(TransportError::from("scripted rate failure")));
        }
        self.rates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rate);
        Ok(())
    }

    async fn pause_consumers(&self) -> AppResult<()> {
        self.record("pause_consumers");
        self.consumers_paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume_consumers(&self) -> AppResult<()> {
        self.record("resume_consumers");
        self.consumers_paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn pause_producers(&self) -> AppResult<()> {
        self.record("pause_producers");
        self.producers_paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume_producers(&self) -> AppResult<()> {
        self.record("resume_producers");
        self.producers_paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn period_stats(&self) -> AppResult<PeriodStats> {
        self.record("period_stats");
        if self.fail_period_stats {
            return Err(AppError::transport(TransportError::from("scripted failure")));
        }
        let counters = self.counters_stats().await?;
        let mut stats = PeriodStats::empty()?;
        stats.total_messages_sent = counters.messages_sent;
        stats.total_messages_received = counters.messages_received;
        stats.total_message_send_errors = counters.message_send_errors;
        Ok(stats)
    }

    async fn cumulative_latencies(&self) -> AppResult<CumulativeLatencies> {
        self.record("cumulative_latencies");
        if self.fail_cumulative {
            return Err(AppError::transport(TransportError::from("scripted latency failure")));
        }
        Ok(CumulativeLatencies::empty()?)
    }

    async fn counters_stats(&self) -> AppResult<CountersStats> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.producers_paused.load(Ordering::SeqCst) {
            counters.messages_sent = counters.messages_sent.saturating_add(self.sent_per_poll);
        }
        if self.acknowledges && poll >= self.lag_polls && !self.consumers_paused.load(Ordering::SeqCst) {
            counters.messages_received = counters.messages_sent.saturating_mul(self.subscriptions);
        }
        Ok(*counters)
    }

    async fn reset_stats(&self) -> AppResult<()> {
        self.record("reset_stats");
        *self.counters.lock().unwrap_or_else(PoisonError::into_inner) = CountersStats::default();
        Ok(())
    }

    async fn stop_all(&self) -> AppResult<()> {
        self.record("stop_all");
        Ok(())
    }

    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }
}
