//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use tokio_util::sync::CancellationToken;

pub use crate::config::{
    Backoff, Config, ConfigBuilder, ConstantBackoff, ExponentialBackoff, RetryPolicy,
    SharedBackoff,
};
pub use crate::connection::{Connection, IsolationLevel, Statement, Transaction, TxOptions};
pub use crate::connector::Connector;
pub use crate::context::deadline_token;
pub use crate::driver::{Driver, DriverRegistry};
pub use crate::engine::{
    ClientCapabilities, Engine, EngineError, EngineOpener, EngineSession, Filesystem,
    Identity, OsFilesystem, QueryOutput, RowIter, SessionContext, StorageRegistry,
};
pub use crate::error::{DriverError, ErrorClass, WireError};
pub use crate::multi::{ResultSet, Row, RowSet};
pub use crate::split::split_statements;
pub use crate::types::{ExecResult, RowValues};

#[cfg(feature = "sqlite")]
pub use crate::driver::SqlDriver;
#[cfg(feature = "sqlite")]
pub use crate::engine::sqlite::SqliteOpener;
