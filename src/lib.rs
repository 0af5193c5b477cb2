//! Core library for the `brokerbench` CLI.
//!
//! `brokerbench` drives message brokers through benchmark runs: it provisions
//! topics, producers and consumers across one in-process worker or a fleet of
//! remote workers, searches for the highest sustainable publish rate when none
//! is fixed, optionally builds and drains a consumer backlog, and merges
//! latency histograms and counters from every worker into periodic snapshots
//! and one aggregate result. Broker clients plug in through the
//! [`driver::BenchmarkDriver`] contract; the built-in `loopback` driver is an
//! in-memory broker for local runs and tests.
pub mod args;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod worker;
