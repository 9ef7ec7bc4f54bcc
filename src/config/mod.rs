// Config module - typed connection configuration.
//
// - dsn: `file://` connection string parsing
// - retry: retry policy for query/exec and the backoff schedules used when opening the engine

mod dsn;
pub mod retry;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::engine::{ClientCapabilities, Identity, SessionContext};
use crate::error::DriverError;

pub use retry::{
    Backoff, ConstantBackoff, DEFAULT_MAX_RETRY_DELAY, ExponentialBackoff, MIN_RETRY_DELAY,
    RetryPolicy, SharedBackoff,
};

/// Connection configuration. Immutable once built.
#[derive(Debug, Clone)]
pub struct Config {
    directory: PathBuf,
    committer: Identity,
    database: Option<String>,
    multi_statements: bool,
    client_found_rows: bool,
    retry_policy: RetryPolicy,
    retry_from_dsn: bool,
    open_backoff: Option<SharedBackoff>,
    params: BTreeMap<String, String>,
}

impl Config {
    /// Start building a configuration for the storage directory `directory`.
    #[must_use]
    pub fn builder(directory: impl Into<PathBuf>) -> ConfigBuilder {
        ConfigBuilder::new(directory)
    }

    /// Parse a `file://` connection string.
    ///
    /// ```rust
    /// use embedded_sql_driver::prelude::*;
    ///
    /// let config = Config::from_dsn(
    ///     "file:///var/lib/app?commitname=app&commitemail=app@example.com&multistatements=true",
    /// )?;
    /// assert!(config.multi_statements());
    /// # Ok::<(), DriverError>(())
    /// ```
    ///
    /// # Errors
    /// Returns `DriverError::ConfigError` for malformed strings, bad parameter values and the
    /// legacy open-retry parameters.
    pub fn from_dsn(dsn: &str) -> Result<Self, DriverError> {
        dsn::parse(dsn)
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.committer
    }

    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    #[must_use]
    pub fn multi_statements(&self) -> bool {
        self.multi_statements
    }

    #[must_use]
    pub fn client_found_rows(&self) -> bool {
        self.client_found_rows
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    #[must_use]
    pub fn open_backoff(&self) -> Option<&SharedBackoff> {
        self.open_backoff.as_ref()
    }

    /// Parameters the driver does not interpret, kept for the engine and the host.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Attach a backoff used when opening the engine.
    #[must_use]
    pub fn with_open_backoff(mut self, backoff: SharedBackoff) -> Self {
        self.open_backoff = Some(backoff);
        self
    }

    #[must_use]
    pub fn client_capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            found_rows: self.client_found_rows,
            multi_statements: self.multi_statements,
        }
    }

    /// Fresh session state for a new connection.
    #[must_use]
    pub fn session_context(&self) -> SessionContext {
        SessionContext::new(
            self.committer.clone(),
            self.database.clone(),
            self.client_capabilities(),
        )
    }

    /// Check the configuration before the first connection is made.
    ///
    /// # Errors
    /// Returns `DriverError::ConfigError` when the directory is empty, the committer identity is
    /// incomplete, or DSN retry parameters are combined with a programmatic open backoff.
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.directory.as_os_str().is_empty() {
            return Err(DriverError::ConfigError(
                "storage directory must not be empty".into(),
            ));
        }
        if self.committer.name.trim().is_empty() {
            return Err(DriverError::ConfigError(
                "commit name is required (commitname)".into(),
            ));
        }
        if self.committer.email.trim().is_empty() {
            return Err(DriverError::ConfigError(
                "commit email is required (commitemail)".into(),
            ));
        }
        if self.retry_from_dsn && self.open_backoff.is_some() {
            return Err(DriverError::ConfigError(
                "retry parameters in the connection string cannot be combined with an open backoff; configure one or the other".into(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            config: Config {
                directory: directory.into(),
                committer: Identity {
                    name: String::new(),
                    email: String::new(),
                },
                database: None,
                multi_statements: false,
                client_found_rows: false,
                retry_policy: RetryPolicy::default(),
                retry_from_dsn: false,
                open_backoff: None,
                params: BTreeMap::new(),
            },
        }
    }

    #[must_use]
    pub fn committer(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.config.committer = Identity {
            name: name.into(),
            email: email.into(),
        };
        self
    }

    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    #[must_use]
    pub fn multi_statements(mut self, enabled: bool) -> Self {
        self.config.multi_statements = enabled;
        self
    }

    #[must_use]
    pub fn client_found_rows(mut self, enabled: bool) -> Self {
        self.config.client_found_rows = enabled;
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Retry engine opens on storage contention with this schedule.
    #[must_use]
    pub fn open_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.config.open_backoff = Some(SharedBackoff::new(backoff));
        self
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.params.insert(key.into(), value.into());
        self
    }

    pub(crate) fn dsn_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self.config.retry_from_dsn = true;
        self
    }

    #[must_use]
    pub fn build(self) -> Config {
        self.config
    }
}
