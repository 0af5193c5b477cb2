use thiserror::Error;

use super::{
    AggregationError, ConfigError, DriverError, MetricsError, ProvisioningError, TransportError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("Join error: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn config<E>(error: E) -> Self
    where
        E: Into<ConfigError>,
    {
        error.into().into()
    }

    pub fn driver<E>(error: E) -> Self
    where
        E: Into<DriverError>,
    {
        error.into().into()
    }

    pub fn provisioning<E>(error: E) -> Self
    where
        E: Into<ProvisioningError>,
    {
        error.into().into()
    }

    pub fn transport<E>(error: E) -> Self
    where
        E: Into<TransportError>,
    {
        error.into().into()
    }

    pub fn aggregation<E>(error: E) -> Self
    where
        E: Into<AggregationError>,
    {
        error.into().into()
    }

    pub fn metrics<E>(error: E) -> Self
    where
        E: Into<MetricsError>,
    {
        error.into().into()
    }

    /// True for failures of the worker RPC transport itself (unreachable
    /// endpoint, timeout, non-success status).
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, AppError::Transport(_))
    }
}
