use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use brokerbench::driver::{DriverConfig, DriverRegistry, LOOPBACK_DRIVER, LoopbackBroker};
use brokerbench::error::AppResult;
use brokerbench::orchestrator::{RunPlan, Timings, Workload, execute_run};
use brokerbench::worker::{
    HttpWorker, KeyDistributorType, LocalWorker, Worker, WorkerEnsemble, serve_worker,
};

fn run_async_test<F>(future: F) -> Result<(), String>
where
    F: Future<Output = Result<(), String>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .map_err(|err| format!("Failed to build runtime: {}", err))?;
    runtime.block_on(future)
}

async fn serve_local(
    name: &str,
    broker: &LoopbackBroker,
    cancel: &CancellationToken,
) -> AppResult<String> {
    let worker: Arc<dyn Worker> = Arc::new(LocalWorker::with_registry(
        name,
        DriverRegistry::with_loopback(broker.clone()),
        NonZeroUsize::new(2),
    )?);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(serve_worker(listener, worker, cancel.clone()));
    Ok(format!("http://{}", addr))
}

fn plan() -> RunPlan {
    let workload = Workload {
        name: "ensemble".to_owned(),
        topics: 3,
        partitions_per_topic: 1,
        topic_name: None,
        key_distributor: KeyDistributorType::KeyRoundRobin,
        message_size: 100,
        payload_file: None,
        subscriptions_per_topic: 2,
        producers_per_topic: 1,
        consumer_per_subscription: 1,
        producer_rate: 300.0,
        consumer_backlog_size_gb: 0,
        test_duration_minutes: 1,
        warmup_duration_minutes: 0,
        ensure_topics_ready: true,
    };
    let mut timings = Timings::for_workload(&workload);
    timings.settle_delay = Duration::ZERO;
    timings.warmup = Duration::ZERO;
    timings.test_duration = Duration::from_secs(1);
    timings.stats_poll_interval = Duration::from_millis(250);
    timings.readiness_poll = Duration::from_millis(50);
    timings.readiness_timeout = Duration::from_secs(10);
    RunPlan {
        run_id: "ensemble-run".to_owned(),
        test_name: "ensemble".to_owned(),
        test_suite_name: None,
        tags: Vec::new(),
        payload: Bytes::from(vec![1_u8; workload.message_size]),
        workload,
        driver: DriverConfig {
            name: "loopback".to_owned(),
            driver: LOOPBACK_DRIVER.to_owned(),
            ..DriverConfig::default()
        },
        timings,
    }
}

#[test]
fn ensemble_of_remote_workers_completes_a_run() -> Result<(), String> {
    run_async_test(async {
        let broker = LoopbackBroker::new();
        let cancel = CancellationToken::new();
        let producer = serve_local("producer", &broker, &cancel)
            .await
            .map_err(|err| err.to_string())?;
        let consumer = serve_local("consumer", &broker, &cancel)
            .await
            .map_err(|err| err.to_string())?;

        let members: Vec<Arc<dyn Worker>> = vec![
            Arc::new(HttpWorker::new(&producer, Duration::from_secs(10)).map_err(|err| err.to_string())?),
            Arc::new(HttpWorker::new(&consumer, Duration::from_secs(10)).map_err(|err| err.to_string())?),
        ];
        let ensemble = WorkerEnsemble::new(members, Some(1)).map_err(|err| err.to_string())?;
        ensemble.health_check().await.map_err(|err| err.to_string())?;

        let result = execute_run(Arc::new(ensemble), plan()).await;
        cancel.cancel();
        let result = result.map_err(|err| err.to_string())?;

        if result.snapshots.is_empty() {
            return Err("Expected snapshots".to_owned());
        }
        let consumed: f64 = result
            .snapshots
            .iter()
            .map(|snapshot| snapshot.consume_rate)
            .sum();
        if consumed <= 0.0 {
            return Err("Consumers on the second worker received nothing".to_owned());
        }
        let Some(metadata) = result.details.metadata.as_ref() else {
            return Err("Missing metadata".to_owned());
        };
        if metadata.topics != 3 || metadata.consumer_groups != 2 {
            return Err(format!("Unexpected metadata: {:?}", metadata));
        }
        Ok(())
    })
}
