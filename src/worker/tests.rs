use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::keys::KeyDistributor;
use super::assign::deal_round_robin;
use super::rate::Refill;
use super::server::status_for;
use super::test_support::ScriptedWorker;
use super::*;
use crate::driver::{DriverConfig, DriverRegistry, LOOPBACK_DRIVER, LoopbackBroker};
use crate::error::{AppError, AppResult, ConfigError, DriverError, ProvisioningError, TransportError};
use crate::metrics::CountersStats;

fn run_async_test<F>(future: F) -> AppResult<()>
where
    F: Future<Output = AppResult<()>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .map_err(|err| AppError::transport(format!("Failed to build runtime: {}", err)))?;
    runtime.block_on(future)
}

fn loopback_config() -> DriverConfig {
    DriverConfig {
        name: "loopback-test".to_owned(),
        driver: LOOPBACK_DRIVER.to_owned(),
        ..DriverConfig::default()
    }
}

fn local_worker(broker: &LoopbackBroker) -> AppResult<LocalWorker> {
    LocalWorker::with_registry(
        "local-test",
        DriverRegistry::with_loopback(broker.clone()),
        NonZeroUsize::new(1),
    )
}

fn as_workers(workers: &[Arc<ScriptedWorker>]) -> Vec<Arc<dyn Worker>> {
    workers
        .iter()
        .map(|worker| -> Arc<dyn Worker> { Arc::clone(worker) as Arc<dyn Worker> })
        .collect()
}

#[test]
fn initialize_twice_is_rejected_until_stopped() -> AppResult<()> {
    run_async_test(async {
        let worker = local_worker(&LoopbackBroker::new())?;
        worker.initialize_driver(&loopback_config()).await?;
        match worker.initialize_driver(&loopback_config()).await {
            Err(AppError::Driver(DriverError::AlreadyActive)) => {}
            Err(err) => {
                return Err(AppError::driver(format!("Unexpected error: {}", err)));
            }
            Ok(()) => return Err(AppError::driver("Expected second initialize to fail")),
        }
        worker.stop_all().await?;
        worker.initialize_driver(&loopback_config()).await?;
        worker.stop_all().await
    })
}

#[test]
fn unknown_driver_is_reported() -> AppResult<()> {
    run_async_test(async {
        let worker = local_worker(&LoopbackBroker::new())?;
        let config = DriverConfig {
            driver: "kafka".to_owned(),
            ..loopback_config()
        };
        match worker.initialize_driver(&config).await {
            Err(AppError::Driver(DriverError::UnknownDriver { name, .. })) if name == "kafka" => {
                Ok(())
            }
            Err(err) => Err(AppError::driver(format!("Unexpected error: {}", err))),
            Ok(()) => Err(AppError::driver("Expected unknown driver error")),
        }
    })
}

#[test]
fn stop_all_is_idempotent_without_driver() -> AppResult<()> {
    run_async_test(async {
        let worker = local_worker(&LoopbackBroker::new())?;
        worker.stop_all().await?;
        worker.stop_all().await?;
        match worker.create_topics(&TopicsRequest {
            count: 1,
            partitions_per_topic: 1,
            topic_name: None,
            name_prefix: None,
        })
        .await
        {
            Err(AppError::Driver(DriverError::NotInitialized)) => Ok(()),
            Err(err) => Err(AppError::driver(format!("Unexpected error: {}", err))),
            Ok(_) => Err(AppError::driver("Expected create_topics to need a driver")),
        }
    })
}

#[test]
fn publish_rate_is_clamped_and_survives_pause() -> AppResult<()> {
    run_async_test(async {
        let worker = local_worker(&LoopbackBroker::new())?;
        worker.adjust_publish_rate(0.1).await?;
        if (worker.publish_rate() - MIN_PUBLISH_RATE).abs() > f64::EPSILON {
            return Err(AppError::driver(format!(
                "Expected clamped rate, got {}",
                worker.publish_rate()
            )));
        }

        worker.adjust_publish_rate(250.0).await?;
        worker.pause_producers().await?;
        worker.resume_producers().await?;
        if (worker.publish_rate() - 250.0).abs() > f64::EPSILON {
            return Err(AppError::driver(format!(
                "Pause changed the rate to {}",
                worker.publish_rate()
            )));
        }
        Ok(())
    })
}

#[test]
fn create_topics_validates_and_names_topics() -> AppResult<()> {
    run_async_test(async {
        let broker = LoopbackBroker::new();
        let worker = local_worker(&broker)?;
        worker.initialize_driver(&loopback_config()).await?;

        let named = TopicsRequest {
            count: 2,
            partitions_per_topic: 1,
            topic_name: Some("orders".to_owned()),
            name_prefix: None,
        };
        match worker.create_topics(&named).await {
            Err(AppError::Provisioning(ProvisioningError::TopicNameWithMultipleTopics {
                count: 2,
            })) => {}
            Err(err) => return Err(AppError::driver(format!("Unexpected error: {}", err))),
            Ok(_) => return Err(AppError::driver("Expected named multi-topic request to fail")),
        }

        let topics = worker
            .create_topics(&TopicsRequest {
                count: 3,
                partitions_per_topic: 4,
                topic_name: None,
                name_prefix: Some("bench".to_owned()),
            })
            .await?;
        if topics.len() != 3 {
            return Err(AppError::driver(format!("Expected 3 topics, got {}", topics.len())));
        }
        for (index, topic) in topics.iter().enumerate() {
            let suffix = format!("-{:04}", index);
            let middle = topic
                .name
                .strip_prefix("bench-")
                .and_then(|rest| rest.strip_suffix(suffix.as_str()));
            let well_formed = middle.is_some_and(|token| {
                token.len() == 7 && token.chars().all(|c| c.is_ascii_alphanumeric())
            });
            if !well_formed || topic.partitions != 4 {
                return Err(AppError::driver(format!("Unexpected topic {:?}", topic)));
            }
            if broker.topic_partitions(&topic.name) != Some(4) {
                return Err(AppError::driver(format!(
                    "Topic {} missing from broker",
                    topic.name
                )));
            }
        }
        worker.stop_all().await
    })
}

#[test]
fn local_worker_moves_messages_through_loopback() -> AppResult<()> {
    run_async_test(async {
        let worker = local_worker(&LoopbackBroker::new())?;
        worker.initialize_driver(&loopback_config()).await?;
        let topics = worker
            .create_topics(&TopicsRequest {
                count: 1,
                partitions_per_topic: 1,
                topic_name: None,
                name_prefix: None,
            })
            .await?;
        let topic = topics
            .first()
            .map(|topic| topic.name.clone())
            .ok_or_else(|| AppError::driver("No topic created"))?;
        worker
            .create_consumers(&ConsumerAssignment {
                topics_subscriptions: vec![TopicSubscription {
                    topic: topic.clone(),
                    subscription: "sub-000-test".to_owned(),
                    consumer_index: 0,
                    partition: None,
                }],
            })
            .await?;
        worker.create_producers(&[topic]).await?;
        worker.probe_producers().await?;
        worker
            .start_load(&ProducerWorkAssignment {
                key_distributor_type: KeyDistributorType::KeyRoundRobin,
                publish_rate: 200.0,
                payload: Bytes::from_static(&[7u8; 64]),
            })
            .await?;

        let mut counters = CountersStats::default();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            counters = worker.counters_stats().await?;
            if counters.messages_sent > 5 && counters.messages_received > 5 {
                break;
            }
        }
        if counters.messages_sent <= 5 || counters.messages_received <= 5 {
            return Err(AppError::driver(format!("Load did not flow: {:?}", counters)));
        }

        let period = worker.period_stats().await?;
        if period.messages_sent == 0 || period.bytes_received == 0 {
            return Err(AppError::driver(format!(
                "Period stats missed traffic: sent {} bytes received {}",
                period.messages_sent, period.bytes_received
            )));
        }
        if period.publish_latency.is_empty() || period.end_to_end_latency.is_empty() {
            return Err(AppError::driver("Period histograms are empty"));
        }

        worker.reset_stats().await?;
        worker.pause_producers().await?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        worker.reset_stats().await?;
        let after_reset = worker.counters_stats().await?;
        if after_reset.messages_sent != 0 {
            return Err(AppError::driver(format!(
                "Paused producers still sent after reset: {:?}",
                after_reset
            )));
        }

        worker.stop_all().await?;
        let stopped = worker.counters_stats().await?;
        if stopped != CountersStats::default() {
            return Err(AppError::driver(format!(
                "Stop did not reset counters: {:?}",
                stopped
            )));
        }
        Ok(())
    })
}

#[test]
fn second_start_load_is_rejected() -> AppResult<()> {
    run_async_test(async {
        let worker = local_worker(&LoopbackBroker::new())?;
        worker.initialize_driver(&loopback_config()).await?;
        let assignment = ProducerWorkAssignment {
            key_distributor_type: KeyDistributorType::NoKey,
            publish_rate: 10.0,
            payload: Bytes::from_static(b"payload"),
        };
        worker.start_load(&assignment).await?;
        if worker.start_load(&assignment).await.is_ok() {
            return Err(AppError::driver("Expected second start_load to fail"));
        }
        worker.stop_all().await?;
        worker.initialize_driver(&loopback_config()).await?;
        worker.start_load(&assignment).await?;
        worker.stop_all().await
    })
}

#[test]
fn ensemble_requires_workers_in_both_roles() -> AppResult<()> {
    match WorkerEnsemble::new(Vec::new(), None) {
        Err(AppError::Config(ConfigError::NoWorkers)) => {}
        Err(err) => return Err(AppError::config(format!("Unexpected error: {}", err))),
        Ok(_) => return Err(AppError::config("Expected empty ensemble to fail")),
    }

    let members: Vec<Arc<ScriptedWorker>> = (0..4)
        .map(|index| Arc::new(ScriptedWorker::new(&format!("w{}", index))))
        .collect();
    let ensemble = WorkerEnsemble::new(as_workers(&members), None)?;
    if ensemble.producer_worker_count() != 2 || ensemble.consumer_worker_count() != 2 {
        return Err(AppError::config("Expected an even split of four workers"));
    }

    match WorkerEnsemble::new(as_workers(&members), Some(4)) {
        Err(AppError::Config(ConfigError::ProducerWorkersOutOfRange {
            requested: 4,
            available: 4,
        })) => {}
        Err(err) => return Err(AppError::config(format!("Unexpected error: {}", err))),
        Ok(_) => return Err(AppError::config("Expected out-of-range producer count")),
    }

    let leader: Vec<Arc<ScriptedWorker>> = members.iter().take(1).cloned().collect();
    let single = WorkerEnsemble::new(as_workers(&leader), None)?;
    if single.producer_worker_count() != 1 || single.consumer_worker_count() != 1 {
        return Err(AppError::config("Single worker must play both roles"));
    }
    Ok(())
}

#[test]
fn ensemble_divides_rate_and_deals_producers() -> AppResult<()> {
    run_async_test(async {
        let members: Vec<Arc<ScriptedWorker>> = (0..3)
            .map(|index| Arc::new(ScriptedWorker::new(&format!("w{}", index))))
            .collect();
        let ensemble = WorkerEnsemble::new(as_workers(&members), Some(2))?;

        let topics: Vec<String> = ["t0", "t1", "t2"].iter().map(|t| (*t).to_owned()).collect();
        ensemble.create_producers(&topics).await?;
        ensemble
            .start_load(&ProducerWorkAssignment {
                key_distributor_type: KeyDistributorType::NoKey,
                publish_rate: 100.0,
                payload: Bytes::from_static(b"x"),
            })
            .await?;
        ensemble.adjust_publish_rate(30.0).await?;

        let [first, second, third] = members.as_slice() else {
            return Err(AppError::transport("Expected three members"));
        };
        if first.producer_topics() != ["t0", "t2"] || second.producer_topics() != ["t1"] {
            return Err(AppError::transport(format!(
                "Unexpected producer deal: {:?} / {:?}",
                first.producer_topics(),
                second.producer_topics()
            )));
        }
        if first.rates() != [50.0, 15.0] || second.rates() != [50.0, 15.0] {
            return Err(AppError::transport(format!(
                "Unexpected per-worker rates: {:?}",
                first.rates()
            )));
        }
        if third.call_count("start_load") != 0 || third.call_count("create_producers") != 0 {
            return Err(AppError::transport("Consumer worker received producer calls"));
        }

        let topics = ensemble
            .create_topics(&TopicsRequest {
                count: 2,
                partitions_per_topic: 1,
                topic_name: None,
                name_prefix: None,
            })
            .await?;
        if topics.len() != 2
            || first.call_count("create_topics") != 1
            || second.call_count("create_topics") != 0
        {
            return Err(AppError::transport("Topics must be created by the leader only"));
        }
        Ok(())
    })
}

#[test]
fn ensemble_rate_skips_producer_workers_without_producers() -> AppResult<()> {
    run_async_test(async {
        let members: Vec<Arc<ScriptedWorker>> = (0..4)
            .map(|index| Arc::new(ScriptedWorker::new(&format!("w{}", index))))
            .collect();
        let ensemble = WorkerEnsemble::new(as_workers(&members), Some(3))?;

        ensemble.create_producers(&["only".to_owned()]).await?;
        ensemble
            .start_load(&ProducerWorkAssignment {
                key_distributor_type: KeyDistributorType::NoKey,
                publish_rate: 300.0,
                payload: Bytes::from_static(b"x"),
            })
            .await?;
        ensemble.adjust_publish_rate(120.0).await?;

        let [loaded, idle, also_idle, _consumer] = members.as_slice() else {
            return Err(AppError::transport("Expected four members"));
        };
        if loaded.rates() != [300.0, 120.0] {
            return Err(AppError::transport(format!(
                "The only loaded worker must carry the full rate: {:?}",
                loaded.rates()
            )));
        }
        if !idle.rates().is_empty() || !also_idle.rates().is_empty() {
            return Err(AppError::transport("Idle producer workers were given a rate"));
        }

        ensemble.stop_all().await?;
        ensemble.adjust_publish_rate(90.0).await?;
        if idle.rates() != [30.0] || also_idle.rates() != [30.0] {
            return Err(AppError::transport(format!(
                "Stopped ensemble should spread over every producer worker: {:?}",
                idle.rates()
            )));
        }
        Ok(())
    })
}

#[test]
fn error_statuses_follow_the_failing_concern() -> AppResult<()> {
    let cases = [
        (AppError::config(ConfigError::NoWorkers), 400),
        (AppError::driver(DriverError::AlreadyActive), 409),
        (AppError::driver(DriverError::NotInitialized), 500),
        (AppError::transport("unreachable"), 500),
        (AppError::from(std::io::Error::other("disk")), 500),
    ];
    for (err, expected) in cases {
        let status = status_for(&err);
        if status != expected {
            return Err(AppError::transport(format!(
                "'{}' mapped to {} instead of {}",
                err, status, expected
            )));
        }
    }
    Ok(())
}

#[test]
fn ensemble_merges_counters_and_tolerates_partial_period_failures() -> AppResult<()> {
    run_async_test(async {
        let counters = |sent, received| CountersStats {
            messages_sent: sent,
            messages_received: received,
            message_send_errors: 1,
        };
        let healthy = Arc::new(ScriptedWorker::new("a").with_counters(counters(10, 0)));
        let mut failing = ScriptedWorker::new("b").with_counters(counters(5, 0));
        failing.fail_period_stats = true;
        let failing = Arc::new(failing);
        for worker in [&healthy, &failing] {
            worker.pause_consumers().await?;
        }

        let members = vec![Arc::clone(&healthy), Arc::clone(&failing)];
        let ensemble = WorkerEnsemble::new(as_workers(&members), None)?;

        let merged = ensemble.counters_stats().await?;
        if merged.messages_sent != 15
            || merged.messages_received != 0
            || merged.message_send_errors != 2
        {
            return Err(AppError::transport(format!("Unexpected merge: {:?}", merged)));
        }

        let period = ensemble.period_stats().await?;
        if period.total_messages_sent != 10 {
            return Err(AppError::transport(format!(
                "Expected only the healthy worker's stats, got {}",
                period.total_messages_sent
            )));
        }

        let mut also_failing = ScriptedWorker::new("c");
        also_failing.fail_period_stats = true;
        let all_failing = WorkerEnsemble::new(
            as_workers(&[Arc::clone(&failing), Arc::new(also_failing)]),
            None,
        )?;
        if all_failing.period_stats().await.is_ok() {
            return Err(AppError::transport("Expected failure when every worker fails"));
        }
        Ok(())
    })
}

#[test]
fn remote_worker_round_trips_over_http() -> AppResult<()> {
    run_async_test(async {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let local: Arc<dyn Worker> = Arc::new(local_worker(&LoopbackBroker::new())?);
        let server = tokio::spawn(serve_worker(listener, local, cancel.clone()));

        let remote = HttpWorker::new(&addr.to_string(), Duration::from_secs(5))?;
        remote.health_check().await?;
        remote.initialize_driver(&loopback_config()).await?;
        match remote.initialize_driver(&loopback_config()).await {
            Err(AppError::Transport(TransportError::Status {
                status: 409,
                message,
                ..
            })) if message.contains("already active") => {}
            Err(err) => return Err(AppError::transport(format!("Unexpected error: {}", err))),
            Ok(()) => return Err(AppError::transport("Expected conflict on second initialize")),
        }

        let topics = remote
            .create_topics(&TopicsRequest {
                count: 2,
                partitions_per_topic: 1,
                topic_name: None,
                name_prefix: None,
            })
            .await?;
        if topics.len() != 2 || !topics.iter().all(|t| t.name.starts_with("loopback-topic-")) {
            return Err(AppError::transport(format!("Unexpected topics: {:?}", topics)));
        }
        remote.notify_topic_creation(&topics).await?;
        let names: Vec<String> = topics.iter().map(|topic| topic.name.clone()).collect();
        remote.create_producers(&names).await?;
        remote.adjust_publish_rate(42.0).await?;
        let counters = remote.counters_stats().await?;
        if counters != CountersStats::default() {
            return Err(AppError::transport(format!("Unexpected counters: {:?}", counters)));
        }
        let period = remote.period_stats().await?;
        if !period.publish_latency.is_empty() {
            return Err(AppError::transport("Expected empty period histogram"));
        }
        remote.cumulative_latencies().await?;

        let client = reqwest::Client::new();
        let missing = client
            .get(format!("http://{}/no-such-path", addr))
            .send()
            .await
            .map_err(|err| AppError::transport(format!("Request failed: {}", err)))?;
        let wrong_method = client
            .get(format!("http://{}/stop-all", addr))
            .send()
            .await
            .map_err(|err| AppError::transport(format!("Request failed: {}", err)))?;
        let bad_json = client
            .post(format!("http://{}/create-topics", addr))
            .body("{not json")
            .send()
            .await
            .map_err(|err| AppError::transport(format!("Request failed: {}", err)))?;
        let statuses = [
            missing.status().as_u16(),
            wrong_method.status().as_u16(),
            bad_json.status().as_u16(),
        ];
        if statuses != [404, 405, 400] {
            return Err(AppError::transport(format!("Unexpected statuses: {:?}", statuses)));
        }

        remote.stop_all().await?;
        cancel.cancel();
        server.await??;
        Ok(())
    })
}

#[test]
fn unreachable_endpoint_is_a_transport_error() -> AppResult<()> {
    run_async_test(async {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);
        let remote = HttpWorker::new(&format!("http://{}", addr), Duration::from_millis(500))?;
        match remote.health_check().await {
            Err(err) if err.is_transport() => Ok(()),
            Err(err) => Err(AppError::transport(format!("Unexpected error: {}", err))),
            Ok(()) => Err(AppError::transport("Expected closed port to fail")),
        }
    })
}

#[test]
fn deal_round_robin_spreads_items() -> AppResult<()> {
    let items = [1, 2, 3, 4, 5];
    let groups = deal_round_robin(&items, 2);
    if groups != vec![vec![1, 3, 5], vec![2, 4]] {
        return Err(AppError::transport(format!("Unexpected groups: {:?}", groups)));
    }
    let wide = deal_round_robin(&[1, 2], 8);
    if wide != vec![vec![1], vec![2]] {
        return Err(AppError::transport(format!("Unexpected wide groups: {:?}", wide)));
    }
    if !deal_round_robin::<u8>(&[], 3).is_empty() {
        return Err(AppError::transport("Empty input must yield no groups"));
    }
    Ok(())
}

#[test]
fn key_distributors_follow_their_kind() -> AppResult<()> {
    if KeyDistributor::build(KeyDistributorType::NoKey).next_key().is_some() {
        return Err(AppError::driver("NoKey produced a key"));
    }

    let mut round_robin = KeyDistributor::build(KeyDistributorType::KeyRoundRobin);
    let first = round_robin.next_key();
    let second = round_robin.next_key();
    if first.is_none() || first == second {
        return Err(AppError::driver("Round-robin keys must advance"));
    }
    for _ in 2..10_000 {
        round_robin.next_key();
    }
    if round_robin.next_key() != first {
        return Err(AppError::driver("Round-robin keys must wrap around"));
    }

    let random = KeyDistributor::build(KeyDistributorType::RandomNano).next_key();
    if random.map(|key| key.len()) != Some(7) {
        return Err(AppError::driver("Random keys must be seven characters"));
    }
    Ok(())
}

#[test]
fn refill_carries_fractional_tokens() -> AppResult<()> {
    let tick = Duration::from_millis(50);
    let mut refill = Refill::default();
    let tokens: Vec<usize> = (0..4).map(|_| refill.next_tokens(10.0, tick)).collect();
    if tokens != [0, 1, 0, 1] {
        return Err(AppError::driver(format!("Unexpected refill tokens: {:?}", tokens)));
    }
    let clamped = [clamp_rate(f64::NAN), clamp_rate(0.0), clamp_rate(-3.0)];
    if clamped
        .iter()
        .any(|rate| (rate - MIN_PUBLISH_RATE).abs() > f64::EPSILON)
    {
        return Err(AppError::driver("Rates below the floor must clamp"));
    }
    Ok(())
}

#[test]
fn rate_limiter_releases_permits_at_the_target_rate() -> AppResult<()> {
    run_async_test(async {
        let limiter = RateLimiter::new(100.0);
        let cancel = CancellationToken::new();
        let refill = limiter.spawn_refill(cancel.clone());
        let started = tokio::time::Instant::now();
        for _ in 0..20 {
            if !limiter.acquire(&cancel).await {
                return Err(AppError::driver("Acquire cancelled unexpectedly"));
            }
        }
        let elapsed = started.elapsed();
        cancel.cancel();
        refill.await?;
        if elapsed < Duration::from_millis(100) || elapsed > Duration::from_secs(2) {
            return Err(AppError::driver(format!(
                "20 permits at 100/s took {:?}",
                elapsed
            )));
        }
        if limiter.acquire(&cancel).await {
            return Err(AppError::driver("Acquire must fail once cancelled"));
        }
        Ok(())
    })
}
