use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backlog::BacklogManager;
use super::plan::RunPlan;
use super::rate_search::{INITIAL_PROBE_RATE, RateController};
use super::results::{AggregateResult, SnapshotResult, TestDetails, TestResult, result_timestamp};
use crate::error::{AggregationError, AppError, AppResult, ConfigError, ProvisioningError};
use crate::metrics::CumulativeLatencies;
use crate::worker::{
    ConsumerAssignment, ProducerWorkAssignment, Topic, TopicSubscription, TopicsRequest, Worker,
    random_token,
};

const SUBSCRIPTION_SUFFIX_LEN: usize = 7;

type BackgroundTasks = JoinSet<AppResult<()>>;

struct Measurement {
    started_at: String,
    snapshots: Vec<SnapshotResult>,
    aggregate: AggregateResult,
}

/// Drives one run through its phases against a single worker (local, remote
/// or an ensemble) and assembles the [`TestResult`].
pub struct WorkloadGenerator {
    worker: Arc<dyn Worker>,
    plan: RunPlan,
    draining: Arc<AtomicBool>,
}

impl WorkloadGenerator {
    /// # Errors
    ///
    /// Returns a configuration error for an invalid workload or a payload
    /// whose length differs from the workload's message size.
    pub fn new(worker: Arc<dyn Worker>, plan: RunPlan) -> AppResult<Self> {
        plan.workload.validate()?;
        if plan.payload.len() != plan.workload.message_size {
            return Err(AppError::config(ConfigError::PayloadSizeMismatch {
                expected: plan.workload.message_size,
                actual: plan.payload.len(),
            }));
        }
        Ok(Self {
            worker,
            plan,
            draining: Arc::new(AtomicBool::new(false)),
        })
    }

    #[must_use]
    pub const fn plan(&self) -> &RunPlan {
        &self.plan
    }

    /// Runs every phase. Background tasks are cancelled and joined and the
    /// workers are stopped whether or not the run succeeds.
    ///
    /// # Errors
    ///
    /// Returns the first phase failure; cleanup failures are only logged.
    pub async fn run(&self) -> AppResult<TestResult> {
        let cancel = CancellationToken::new();
        let mut tasks = BackgroundTasks::new();

        let outcome = self.run_phases(&cancel, &mut tasks).await;

        cancel.cancel();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("Background task failed: {}", err),
                Err(err) => warn!("Background task ended abnormally: {}", err),
            }
        }
        if let Err(err) = self.worker.stop_all().await {
            warn!("Failed to stop workers: {}", err);
        }
        outcome
    }

    async fn run_phases(
        &self,
        cancel: &CancellationToken,
        tasks: &mut BackgroundTasks,
    ) -> AppResult<TestResult> {
        let workload = &self.plan.workload;
        let timings = &self.plan.timings;

        let topics = self.create_topics().await?;
        self.worker.notify_topic_creation(&topics).await?;

        if workload.consumer_per_subscription > 0 {
            self.create_consumers(&topics).await?;
        }
        if !timings.settle_delay.is_zero() {
            info!(
                "Waiting {} s for consumer assignment to settle",
                timings.settle_delay.as_secs()
            );
            tokio::time::sleep(timings.settle_delay).await;
        }
        self.create_producers(&topics).await?;

        if workload.ensure_topics_ready && workload.consumer_per_subscription > 0 {
            self.ensure_topics_ready().await?;
        }

        let initial_rate = if workload.has_fixed_rate() {
            workload.producer_rate
        } else {
            INITIAL_PROBE_RATE
        };
        self.worker
            .start_load(&ProducerWorkAssignment {
                key_distributor_type: workload.key_distributor,
                publish_rate: initial_rate,
                payload: self.plan.payload.clone(),
            })
            .await?;

        if !workload.has_fixed_rate() {
            let controller = RateController {
                worker: Arc::clone(&self.worker),
                subscriptions_per_topic: workload.subscriptions_per_topic,
                control_period: timings.rate_control_period,
                recovery_poll: timings.rate_recovery_poll,
                catch_up: timings.rate_catch_up,
                cancel: cancel.clone(),
            };
            tasks.spawn(controller.run(initial_rate));
        }

        if workload.consumer_backlog_size_gb > 0 {
            self.draining.store(true, Ordering::Release);
            let manager = BacklogManager {
                worker: Arc::clone(&self.worker),
                subscriptions_per_topic: workload.subscriptions_per_topic,
                message_size: workload.message_size,
                backlog_size_gb: workload.consumer_backlog_size_gb,
                build_poll: timings.backlog_build_poll,
                drain_poll: timings.backlog_drain_poll,
                drain_budget: timings.backlog_drain_budget,
                draining: Arc::clone(&self.draining),
                cancel: cancel.clone(),
            };
            tasks.spawn(async move {
                let outcome = manager.run().await?;
                info!("Backlog phase finished: {:?}", outcome);
                Ok(())
            });
        }

        if !timings.warmup.is_zero() {
            info!("----- Starting warmup traffic -----");
            self.collect_stats(timings.warmup, false, tasks).await?;
            self.worker.reset_stats().await?;
        }

        info!("----- Starting benchmark traffic -----");
        let Measurement {
            started_at,
            snapshots,
            mut aggregate,
        } = self.collect_stats(timings.test_duration, true, tasks).await?;

        let latencies = self.collect_cumulative_latencies().await?;
        aggregate.set_latencies(&latencies);

        Ok(TestResult {
            details: TestDetails {
                run_id: self.plan.run_id.clone(),
                test_name: self.plan.test_name.clone(),
                test_suite_name: None,
                test_start_time: started_at,
                test_run_duration_minutes: workload.test_duration_minutes,
                product: None,
                sku: None,
                protocol: None,
                metadata: None,
            },
            snapshots,
            aggregate,
        })
    }

    async fn create_topics(&self) -> AppResult<Vec<Topic>> {
        let workload = &self.plan.workload;
        let started = Instant::now();
        let topics = self
            .worker
            .create_topics(&TopicsRequest {
                count: workload.topics,
                partitions_per_topic: workload.partitions_per_topic,
                topic_name: workload.topic_name.clone(),
                name_prefix: Some(topic_prefix(
                    &self.plan.test_name,
                    self.plan.test_suite_name.as_deref(),
                )),
            })
            .await?;
        info!(
            "Created {} topics in {} ms",
            topics.len(),
            started.elapsed().as_millis()
        );
        Ok(topics)
    }

    async fn create_consumers(&self, topics: &[Topic]) -> AppResult<()> {
        let workload = &self.plan.workload;
        let mut entries = Vec::new();
        for topic in topics {
            for slot in 0..workload.subscriptions_per_topic {
                let subscription =
                    format!("sub-{:03}-{}", slot, random_token(SUBSCRIPTION_SUFFIX_LEN));
                for consumer_index in 0..workload.consumer_per_subscription {
                    entries.push(TopicSubscription {
                        topic: topic.name.clone(),
                        subscription: subscription.clone(),
                        consumer_index,
                        partition: None,
                    });
                }
            }
        }
        entries.shuffle(&mut rand::thread_rng());

        let started = Instant::now();
        let count = entries.len();
        self.worker
            .create_consumers(&ConsumerAssignment {
                topics_subscriptions: entries,
            })
            .await?;
        info!(
            "Created {} consumers in {} ms",
            count,
            started.elapsed().as_millis()
        );
        Ok(())
    }

    async fn create_producers(&self, topics: &[Topic]) -> AppResult<()> {
        let mut names: Vec<String> = (0..self.plan.workload.producers_per_topic)
            .flat_map(|_| topics.iter().map(|topic| topic.name.clone()))
            .collect();
        names.shuffle(&mut rand::thread_rng());

        let started = Instant::now();
        self.worker.create_producers(&names).await?;
        info!(
            "Created {} producers in {} ms",
            names.len(),
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Probes every producer and waits until each subscription has seen a
    /// message, so consumer assignment is complete before measuring.
    async fn ensure_topics_ready(&self) -> AppResult<()> {
        let workload = &self.plan.workload;
        let timings = &self.plan.timings;
        let expected =
            u64::from(workload.topics).saturating_mul(u64::from(workload.subscriptions_per_topic));

        info!("Waiting for consumers to be ready");
        self.worker.probe_producers().await?;

        let started = Instant::now();
        let mut received = 0;
        loop {
            match self.worker.counters_stats().await {
                Ok(counters) => {
                    received = counters.messages_received;
                    info!(
                        "Waiting for topics to be ready -- Sent: {}, Received: {}",
                        counters.messages_sent, received
                    );
                    if received >= expected {
                        break;
                    }
                }
                Err(err) => warn!("Readiness poll failed: {}", err),
            }
            if started.elapsed() >= timings.readiness_timeout {
                return Err(AppError::provisioning(ProvisioningError::ConsumersNotReady {
                    expected,
                    received,
                }));
            }
            tokio::time::sleep(timings.readiness_poll).await;
        }

        info!("All consumers are ready");
        self.worker.reset_stats().await
    }

    /// Polls period stats every interval until `window` has elapsed. With
    /// `wait_for_drain` the window also stays open while a deliberately built
    /// backlog is still draining. A failed background task ends the window
    /// with its error.
    async fn collect_stats(
        &self,
        window: Duration,
        wait_for_drain: bool,
        tasks: &mut BackgroundTasks,
    ) -> AppResult<Measurement> {
        let timings = &self.plan.timings;
        let subscriptions = self.plan.workload.subscriptions_per_topic;
        let started = Instant::now();
        let mut measurement = Measurement {
            started_at: result_timestamp(Utc::now()),
            snapshots: Vec::new(),
            aggregate: AggregateResult::new(&self.plan.run_id),
        };
        let mut last_poll = started;

        loop {
            sleep_watching(timings.stats_poll_interval, tasks).await?;
            match self.worker.period_stats().await {
                Ok(stats) => {
                    let now = Instant::now();
                    let snapshot = SnapshotResult::from_period(
                        &self.plan.run_id,
                        &stats,
                        now.duration_since(last_poll),
                        now.duration_since(started),
                        subscriptions,
                    );
                    snapshot.log();
                    measurement.aggregate.add_snapshot(&snapshot);
                    measurement.snapshots.push(snapshot);
                    last_poll = now;
                }
                Err(err) => warn!("Skipping stats poll: {}", err),
            }

            if started.elapsed() < window {
                continue;
            }
            if wait_for_drain && self.draining.load(Ordering::Acquire) {
                debug!("Window elapsed; waiting for the backlog to drain");
                continue;
            }
            return Ok(measurement);
        }
    }

    async fn collect_cumulative_latencies(&self) -> AppResult<CumulativeLatencies> {
        let timings = &self.plan.timings;
        let attempts = timings.aggregate_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);
            match self.worker.cumulative_latencies().await {
                Ok(latencies) => return Ok(latencies),
                Err(err) if attempt < attempts => {
                    warn!(
                        "Collecting cumulative latencies failed (attempt {} of {}): {}",
                        attempt, attempts, err
                    );
                    tokio::time::sleep(timings.aggregate_retry_delay).await;
                }
                Err(err) => {
                    return Err(AppError::aggregation(AggregationError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    }));
                }
            }
        }
    }
}

/// Topic names start with the test name, then the suite name when present.
pub(super) fn topic_prefix(test_name: &str, test_suite_name: Option<&str>) -> String {
    test_suite_name.map_or_else(
        || test_name.to_owned(),
        |suite| format!("{}-{}", test_name, suite),
    )
}

/// Sleeps for `period` unless a background task fails first.
async fn sleep_watching(period: Duration, tasks: &mut BackgroundTasks) -> AppResult<()> {
    let tick = tokio::time::sleep(period);
    tokio::pin!(tick);
    loop {
        tokio::select! {
            () = &mut tick => return Ok(()),
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(err) = joined? {
                    warn!("Background task failed: {}", err);
                    return Err(err);
                }
            }
        }
    }
}
