use std::sync::Arc;

use super::loopback::{LOOPBACK_DRIVER, LoopbackBroker, LoopbackDriver};
use super::traits::BenchmarkDriver;
use crate::error::DriverError;

pub type DriverFactory = Arc<dyn Fn() -> Arc<dyn BenchmarkDriver> + Send + Sync>;

/// Name to factory table consulted by `initialize_driver`. Each worker holds
/// its own registry value.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: Vec<(String, DriverFactory)>,
}

impl DriverRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in `loopback` driver backed by a fresh broker.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::with_loopback(LoopbackBroker::new())
    }

    /// Registry whose `loopback` driver shares `broker`, so several workers in
    /// one process see the same topics.
    #[must_use]
    pub fn with_loopback(broker: LoopbackBroker) -> Self {
        let mut registry = Self::empty();
        let factory: DriverFactory = Arc::new(move || -> Arc<dyn BenchmarkDriver> {
            Arc::new(LoopbackDriver::new(broker.clone()))
        });
        if let Err(err) = registry.register(LOOPBACK_DRIVER, factory) {
            tracing::warn!("Skipping duplicate builtin driver: {}", err);
        }
        registry
    }

    /// Registers a driver factory under `name`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateDriver` when `name` is already registered.
    pub fn register(&mut self, name: &str, factory: DriverFactory) -> Result<(), DriverError> {
        if self.factories.iter().any(|(existing, _)| existing == name) {
            return Err(DriverError::DuplicateDriver {
                name: name.to_owned(),
            });
        }
        self.factories.push((name.to_owned(), factory));
        Ok(())
    }

    /// Instantiates the driver registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDriver` when no factory is registered under `name`.
    pub fn create(&self, name: &str) -> Result<Arc<dyn BenchmarkDriver>, DriverError> {
        self.factories
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, factory)| factory())
            .ok_or_else(|| DriverError::UnknownDriver {
                name: name.to_owned(),
                available: self.names_csv(),
            })
    }

    #[must_use]
    pub fn names_csv(&self) -> String {
        let mut names: Vec<&str> = self.factories.iter().map(|(name, _)| name.as_str()).collect();
        names.sort_unstable();
        names.join(", ")
    }
}
