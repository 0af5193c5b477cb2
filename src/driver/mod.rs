//! Messaging backend plugin contract and the built-in drivers.
mod config;
mod loopback;
mod registry;
mod traits;


pub use config::{DriverConfig, NamespaceMetadata, property_value};
pub use loopback::{LOOPBACK_DRIVER, LoopbackBroker, LoopbackDriver};
pub use registry::{DriverFactory, DriverRegistry};
pub use traits::{BenchmarkConsumer, BenchmarkDriver, BenchmarkProducer, ConsumerCallback};
