use std::num::NonZeroUsize;

use clap::{Args, Parser, Subcommand};

/// Address a worker listens on unless told otherwise.
pub const DEFAULT_WORKER_LISTEN: &str = "0.0.0.0:9000";

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Distributed load generator for message brokers - fans producer/consumer topologies across workers, searches for sustainable publish rates, and merges latency histograms into run reports."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging
    #[arg(long = "verbose", short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a benchmark described by a config file
    Run(RunArgs),
    /// Serve a worker endpoint for a remote controller
    Worker(WorkerArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct RunArgs {
    /// Config file (.toml or .json); defaults to brokerbench.toml or brokerbench.json
    #[arg(long = "config", short = 'c')]
    pub config: Option<String>,

    /// Prefix of the result files (defaults to workload-driver-timestamp)
    #[arg(long = "output", short = 'o')]
    pub output: Option<String>,

    /// Comma-separated worker endpoints, e.g. http://10.0.0.1:9000
    #[arg(
        long = "workers",
        short = 'w',
        value_delimiter = ',',
        env = "BROKERBENCH_WORKERS"
    )]
    pub workers: Vec<String>,

    /// Number of workers dedicated to producers (defaults to half)
    #[arg(long = "producer-workers")]
    pub producer_workers: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct WorkerArgs {
    /// Address to listen on
    #[arg(long = "listen", short = 'l', default_value = DEFAULT_WORKER_LISTEN)]
    pub listen: String,

    /// Concurrent send loops (defaults to available CPUs)
    #[arg(long = "send-parallelism")]
    pub send_parallelism: Option<NonZeroUsize>,
}
