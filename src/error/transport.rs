use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid worker endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Failed to build HTTP client: {source}")]
    ClientBuild {
        #[source]
        source: reqwest::Error,
    },
    #[error("Request to {endpoint}{path} failed: {source}")]
    Request {
        endpoint: String,
        path: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Worker {endpoint}{path} returned {status}: {message}")]
    Status {
        endpoint: String,
        path: &'static str,
        status: u16,
        message: String,
    },
    #[error("Invalid response from {endpoint}{path}: {source}")]
    Decode {
        endpoint: String,
        path: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error during {context}: {source}")]
    Serialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
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
