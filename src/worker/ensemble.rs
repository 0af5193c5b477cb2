use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, join_all};
use tracing::{info, warn};

use super::Worker;
use super::commands::{ConsumerAssignment, ProducerWorkAssignment, Topic, TopicsRequest};
use super::assign::deal_round_robin;
use crate::driver::DriverConfig;
use crate::error::{AppError, AppResult, ConfigError};
use crate::metrics::{CountersStats, CumulativeLatencies, PeriodStats};

/// Drives N worker endpoints as one. Members are split into producer and
/// consumer workers; a single member plays both roles.
pub struct WorkerEnsemble {
    id: String,
    workers: Vec<Arc<dyn Worker>>,
    producer_workers: Vec<Arc<dyn Worker>>,
    consumer_workers: Vec<Arc<dyn Worker>>,
    /// Leading producer workers that were dealt at least one producer.
    loading_workers: AtomicUsize,
}

impl WorkerEnsemble {
    /// Builds the ensemble. Without an explicit `producer_workers` count the
    /// first half of the members (rounded down) produce.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty member list or a producer
    /// count that would leave either role without workers.
    pub fn new(workers: Vec<Arc<dyn Worker>>, producer_workers: Option<usize>) -> AppResult<Self> {
        let total = workers.len();
        if total == 0 {
            return Err(AppError::config(ConfigError::NoWorkers));
        }

        let (producer_workers, consumer_workers) = if total == 1 {
            (workers.clone(), workers.clone())
        } else {
            let producers = producer_workers.unwrap_or(total / 2);
            if producers == 0 || producers >= total {
                return Err(AppError::config(ConfigError::ProducerWorkersOutOfRange {
                    requested: producers,
                    available: total,
                }));
            }
            let (producing, consuming) = workers.split_at(producers);
            (producing.to_vec(), consuming.to_vec())
        };

        info!(
            "Worker ensemble: {} producer workers, {} consumer workers",
            producer_workers.len(),
            consumer_workers.len()
        );
        Ok(Self {
            id: format!("ensemble({})", total),
            workers,
            producer_workers,
            consumer_workers,
            loading_workers: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn producer_worker_count(&self) -> usize {
        self.producer_workers.len()
    }

    #[must_use]
    pub fn consumer_worker_count(&self) -> usize {
        self.consumer_workers.len()
    }

    /// Producer workers that own producers; all of them before producers
    /// are dealt.
    fn loading(&self) -> &[Arc<dyn Worker>] {
        match self.loading_workers.load(Ordering::Acquire) {
            0 => &self.producer_workers,
            count => self
                .producer_workers
                .get(..count)
                .unwrap_or(&self.producer_workers),
        }
    }

    fn per_worker_rate(&self, rate: f64) -> f64 {
        rate / self.loading().len().max(1) as f64
    }
}

/// Runs `call` on every worker, waits for all of them, then reports the first
/// failure.
async fn broadcast<'w, F>(workers: &'w [Arc<dyn Worker>], call: F) -> AppResult<()>
where
    F: Fn(&'w dyn Worker) -> BoxFuture<'w, AppResult<()>>,
{
    let results = join_all(workers.iter().map(|worker| call(worker.as_ref()))).await;
    results.into_iter().collect::<AppResult<Vec<()>>>().map(|_| ())
}

async fn gather<'w, T, F>(workers: &'w [Arc<dyn Worker>], call: F) -> Vec<(&'w str, AppResult<T>)>
where
    F: Fn(&'w dyn Worker) -> BoxFuture<'w, AppResult<T>>,
{
    let results = join_all(workers.iter().map(|worker| call(worker.as_ref()))).await;
    workers
        .iter()
        .map(|worker| worker.id())
        .zip(results)
        .collect()
}

#[async_trait]
impl Worker for WorkerEnsemble {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize_driver(&self, config: &DriverConfig) -> AppResult<()> {
        broadcast(&self.workers, |worker| worker.initialize_driver(config)).await
    }

    async fn create_topics(&self, request: &TopicsRequest) -> AppResult<Vec<Topic>> {
        // The leader creates; every member is notified afterwards.
        match self.workers.first() {
            Some(leader) => leader.create_topics(request).await,
            None => Err(AppError::config(ConfigError::NoWorkers)),
        }
    }

    async fn notify_topic_creation(&self, topics: &[Topic]) -> AppResult<()> {
        broadcast(&self.workers, |worker| worker.notify_topic_creation(topics)).await
    }

    async fn create_producers(&self, topics: &[String]) -> AppResult<()> {
        let groups = deal_round_robin(topics, self.producer_workers.len());
        let calls = self
            .producer_workers
            .iter()
            .zip(groups.iter())
            .map(|(worker, group)| worker.create_producers(group));
        join_all(calls)
            .await
            .into_iter()
            .collect::<AppResult<Vec<()>>>()?;
        let loading = groups.len().min(self.producer_workers.len());
        if loading < self.producer_workers.len() {
            info!(
                "Only {} of {} producer workers own producers",
                loading,
                self.producer_workers.len()
            );
        }
        self.loading_workers.store(loading, Ordering::Release);
        Ok(())
    }

    async fn create_consumers(&self, assignment: &ConsumerAssignment) -> AppResult<()> {
        let groups: Vec<ConsumerAssignment> =
            deal_round_robin(&assignment.topics_subscriptions, self.consumer_workers.len())
                .into_iter()
                .map(|topics_subscriptions| ConsumerAssignment {
                    topics_subscriptions,
                })
                .collect();
        let calls = self
            .consumer_workers
            .iter()
            .zip(groups.iter())
            .map(|(worker, group)| worker.create_consumers(group));
        join_all(calls)
            .await
            .into_iter()
            .collect::<AppResult<Vec<()>>>()
            .map(|_| ())
    }

    async fn probe_producers(&self) -> AppResult<()> {
        broadcast(&self.producer_workers, |worker| worker.probe_producers()).await
    }

    async fn start_load(&self, assignment: &ProducerWorkAssignment) -> AppResult<()> {
        let per_worker = ProducerWorkAssignment {
            publish_rate: self.per_worker_rate(assignment.publish_rate),
            ..assignment.clone()
        };
        let per_worker = &per_worker;
        broadcast(self.loading(), |worker| worker.start_load(per_worker)).await
    }

    async fn adjust_publish_rate(&self, rate: f64) -> AppResult<()> {
        let per_worker = self.per_worker_rate(rate);
        broadcast(self.loading(), |worker| worker.adjust_publish_rate(per_worker)).await
    }

    async fn pause_consumers(&self) -> AppResult<()> {
        broadcast(&self.consumer_workers, |worker| worker.pause_consumers()).await
    }

    async fn resume_consumers(&self) -> AppResult<()> {
        broadcast(&self.consumer_workers, |worker| worker.resume_consumers()).await
    }

    async fn pause_producers(&self) -> AppResult<()> {
        broadcast(&self.producer_workers, |worker| worker.pause_producers()).await
    }

    async fn resume_producers(&self) -> AppResult<()> {
        broadcast(&self.producer_workers, |worker| worker.resume_producers()).await
    }

    async fn period_stats(&self) -> AppResult<PeriodStats> {
        let results = gather(&self.workers, |worker| worker.period_stats()).await;
        let mut merged = PeriodStats::empty()?;
        let mut succeeded = 0usize;
        let mut first_error = None;
        for (id, result) in results {
            match result {
                Ok(stats) => {
                    merged.merge(&stats)?;
                    succeeded = succeeded.saturating_add(1);
                }
                Err(err) => {
                    warn!("Skipping period stats from worker {}: {}", id, err);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) if succeeded == 0 => {
                warn!("All {} workers failed to report period stats", self.workers.len());
                Err(err)
            }
            Some(_) | None => Ok(merged),
        }
    }

    async fn cumulative_latencies(&self) -> AppResult<CumulativeLatencies> {
        let results = gather(&self.workers, |worker| worker.cumulative_latencies()).await;
        let mut merged = CumulativeLatencies::empty()?;
        for (_, result) in results {
            merged.merge(&result?)?;
        }
        Ok(merged)
    }

    async fn counters_stats(&self) -> AppResult<CountersStats> {
        let results = gather(&self.workers, |worker| worker.counters_stats()).await;
        let mut merged = CountersStats::default();
        for (_, result) in results {
            merged.merge(&result?);
        }
        Ok(merged)
    }

    async fn reset_stats(&self) -> AppResult<()> {
        broadcast(&self.workers, |worker| worker.reset_stats()).await
    }

    async fn stop_all(&self) -> AppResult<()> {
        self.loading_workers.store(0, Ordering::Release);
        broadcast(&self.workers, |worker| worker.stop_all()).await
    }

    async fn health_check(&self) -> AppResult<()> {
        broadcast(&self.workers, |worker| worker.health_check()).await
    }
}
