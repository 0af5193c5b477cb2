//! CLI argument types.
mod cli;


pub use cli::{CliArgs, Command, DEFAULT_WORKER_LISTEN, RunArgs, WorkerArgs};
