//! Async driver for a file-resident SQL engine.
//!
//! A [`Connector`] lazily opens one engine per storage directory and shares it between
//! [`Connection`]s. Query and exec operations recover from storage-lock contention by backing
//! off and reopening the engine when a [`RetryPolicy`] enables it. With multi-statement
//! support on, a query string is split into a batch whose row-returning statements are
//! exposed as consecutive result sets.
//!
//! ```rust,no_run
//! use embedded_sql_driver::prelude::*;
//!
//! # async fn demo() -> Result<(), DriverError> {
//! let config = Config::from_dsn(
//!     "file:///var/lib/app?commitname=app&commitemail=app@example.com&multistatements=true",
//! )?;
//! let connector = SqlDriver::new().connector(config);
//! let ctx = CancellationToken::new();
//! let mut conn = connector.connect(&ctx).await?;
//! conn.exec(&ctx, "CREATE DATABASE IF NOT EXISTS app; USE app", &[]).await?;
//! let mut rows = conn.query(&ctx, "SELECT 1 AS one", &[]).await?;
//! let all = rows.collect_rows()?;
//! assert_eq!(all.len(), 1);
//! connector.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod connector;
pub mod context;
pub mod driver;
pub mod engine;
pub mod error;
pub mod multi;
pub mod prelude;
pub(crate) mod retry;
pub mod split;
pub mod types;

pub use config::{Config, ConfigBuilder, RetryPolicy};
pub use connection::{Connection, IsolationLevel, Statement, Transaction, TxOptions};
pub use connector::Connector;
pub use context::deadline_token;
pub use driver::{Driver, DriverRegistry};
#[cfg(feature = "sqlite")]
pub use driver::SqlDriver;
pub use error::{DriverError, ErrorClass, WireError};
pub use multi::{ResultSet, Row, RowSet};
pub use types::{ExecResult, RowValues};
