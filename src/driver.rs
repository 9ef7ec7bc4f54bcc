//! "Open by name + connection string" entry points.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::connector::Connector;
use crate::error::DriverError;

#[cfg(feature = "sqlite")]
use crate::engine::StorageRegistry;
#[cfg(feature = "sqlite")]
use crate::engine::sqlite::SqliteOpener;

/// Something that turns a connection string into a [`Connector`].
pub trait Driver: Send + Sync {
    /// Parse `dsn` and build a connector. The engine is opened on the first connect.
    ///
    /// # Errors
    /// Returns `DriverError::ConfigError` if the connection string is malformed.
    fn open_connector(&self, dsn: &str) -> Result<Connector, DriverError>;
}

/// Driver for the bundled SQLite engine. Connectors it builds share one storage registry.
#[cfg(feature = "sqlite")]
#[derive(Debug, Clone, Default)]
pub struct SqlDriver {
    registry: StorageRegistry,
}

#[cfg(feature = "sqlite")]
impl SqlDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_registry(registry: StorageRegistry) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &StorageRegistry {
        &self.registry
    }

    /// Build a connector from an already constructed configuration.
    #[must_use]
    pub fn connector(&self, config: Config) -> Connector {
        let opener = SqliteOpener::new(config.directory(), self.registry.clone());
        Connector::new(config, opener)
    }
}

#[cfg(feature = "sqlite")]
impl Driver for SqlDriver {
    fn open_connector(&self, dsn: &str) -> Result<Connector, DriverError> {
        Ok(self.connector(Config::from_dsn(dsn)?))
    }
}

/// Explicit registry of drivers by name.
///
/// ```rust
/// use embedded_sql_driver::prelude::*;
///
/// let mut drivers = DriverRegistry::new();
/// drivers.register("embedded", SqlDriver::new())?;
/// let connector = drivers.open(
///     "embedded",
///     "file:///tmp/data?commitname=app&commitemail=app@example.com",
/// )?;
/// assert!(!connector.is_closed());
/// # Ok::<(), DriverError>(())
/// ```
#[derive(Default, Clone)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns `DriverError::ConfigError` if `name` is already registered.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        driver: impl Driver + 'static,
    ) -> Result<(), DriverError> {
        let name = name.into();
        if self.drivers.contains_key(&name) {
            return Err(DriverError::ConfigError(format!(
                "driver '{name}' is already registered"
            )));
        }
        self.drivers.insert(name, Arc::new(driver));
        Ok(())
    }

    /// # Errors
    /// Returns `DriverError::ConfigError` for an unknown driver name or a bad connection
    /// string.
    pub fn open(&self, name: &str, dsn: &str) -> Result<Connector, DriverError> {
        let driver = self
            .drivers
            .get(name)
            .ok_or_else(|| DriverError::ConfigError(format!("unknown driver '{name}'")))?;
        driver.open_connector(dsn)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
