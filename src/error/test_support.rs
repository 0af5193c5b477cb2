use super::{AggregationError, ConfigError, DriverError, MetricsError, TransportError};

impl From<&'static str> for ConfigError {
    fn from(message: &'static str) -> Self {
        ConfigError::TestExpectation { message }
    }
}

impl From<String> for ConfigError {
    fn from(value: String) -> Self {
        ConfigError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for DriverError {
    fn from(message: &'static str) -> Self {
        DriverError::TestExpectation { message }
    }
}

impl From<String> for DriverError {
    fn from(value: String) -> Self {
        DriverError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for MetricsError {
    fn from(message: &'static str) -> Self {
        MetricsError::TestExpectation { message }
    }
}

impl From<String> for MetricsError {
    fn from(value: String) -> Self {
        MetricsError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for TransportError {
    fn from(message: &'static str) -> Self {
        TransportError::TestExpectation { message }
    }
}

impl From<String> for TransportError {
    fn from(value: String) -> Self {
        TransportError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for AggregationError {
    fn from(message: &'static str) -> Self {
        AggregationError::TestExpectation { message }
    }
}

impl From<String> for AggregationError {
    fn from(value: String) -> Self {
        AggregationError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}
