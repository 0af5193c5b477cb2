mod aggregation;
mod app;
mod config;
mod driver;
mod metrics;
mod provisioning;
mod transport;

#[cfg(test)]
mod test_support;

pub use aggregation::AggregationError;
pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use driver::DriverError;
pub use metrics::MetricsError;
pub use provisioning::ProvisioningError;
pub use transport::TransportError;
