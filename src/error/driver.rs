use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("A driver is already active; call stop-all first.")]
    AlreadyActive,
    #[error("No driver is active; initialize a driver first.")]
    NotInitialized,
    #[error("Unknown driver '{name}'. Registered drivers: {available}.")]
    UnknownDriver { name: String, available: String },
    #[error("Driver '{name}' is already registered.")]
    DuplicateDriver { name: String },
    #[error("Driver has been closed.")]
    Closed,
    #[error("Topic '{topic}' does not exist.")]
    UnknownTopic { topic: String },
    #[error("Invalid driver property '{key}': {message}")]
    InvalidProperty { key: String, message: String },
    #[error("{context}: {message}")]
    Operation {
        context: &'static str,
        message: String,
    },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
