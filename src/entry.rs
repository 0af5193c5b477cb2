use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use brokerbench::args::{CliArgs, Command, RunArgs, WorkerArgs};
use brokerbench::config::{RunSetup, WorkerTopology, apply_config, load_config};
use brokerbench::driver::DriverRegistry;
use brokerbench::error::{AppError, AppResult, ConfigError};
use brokerbench::orchestrator::{execute_run, write_results};
use brokerbench::worker::{HttpWorker, LocalWorker, Worker, WorkerEnsemble, serve_worker};

use crate::logger::init_logging;
use crate::shutdown::shutdown_token;

pub(crate) fn run() -> AppResult<()> {
    let args = CliArgs::parse();
    init_logging(args.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_async(args))
}

async fn run_async(args: CliArgs) -> AppResult<()> {
    match args.command {
        Command::Run(run) => run_benchmark(&run).await,
        Command::Worker(worker) => serve(worker).await,
    }
}

async fn run_benchmark(args: &RunArgs) -> AppResult<()> {
    let Some(config) = load_config(args.config.as_deref())? else {
        return Err(AppError::config(ConfigError::MissingConfig));
    };
    let RunSetup {
        plan,
        workers,
        output_prefix,
    } = apply_config(args, config)?;

    let worker = build_worker(workers).await?;
    let shutdown = shutdown_token();

    let result = tokio::select! {
        result = execute_run(Arc::clone(&worker), plan) => result?,
        () = shutdown.cancelled() => {
            warn!("Run interrupted; stopping workers");
            if let Err(err) = worker.stop_all().await {
                warn!("Failed to stop workers: {}", err);
            }
            return Ok(());
        }
    };

    write_results(&result, &output_prefix).await?;
    Ok(())
}

async fn build_worker(topology: WorkerTopology) -> AppResult<Arc<dyn Worker>> {
    match topology {
        WorkerTopology::Local => {
            info!("Running with an in-process worker");
            Ok(Arc::new(LocalWorker::new("local")?))
        }
        WorkerTopology::Remote {
            endpoints,
            producer_workers,
            request_timeout,
        } => {
            let members = endpoints
                .iter()
                .map(|endpoint| -> AppResult<Arc<dyn Worker>> {
                    Ok(Arc::new(HttpWorker::new(endpoint, request_timeout)?))
                })
                .collect::<AppResult<Vec<_>>>()?;
            let ensemble = WorkerEnsemble::new(members, producer_workers)?;
            ensemble.health_check().await?;
            Ok(Arc::new(ensemble))
        }
    }
}

async fn serve(args: WorkerArgs) -> AppResult<()> {
    let worker: Arc<dyn Worker> = Arc::new(LocalWorker::with_registry(
        format!("worker@{}", args.listen),
        DriverRegistry::with_builtins(),
        args.send_parallelism,
    )?);
    let listener = TcpListener::bind(&args.listen).await?;

    serve_worker(listener, Arc::clone(&worker), shutdown_token()).await?;

    if let Err(err) = worker.stop_all().await {
        warn!("Failed to stop worker: {}", err);
    }
    Ok(())
}
