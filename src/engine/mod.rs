// Engine module - the collaborator surface the driver is written against.
//
// - fs: directory checks used when opening an engine
// - registry: reference-counted storage leases keyed by directory
// - sqlite: bundled rusqlite-backed engine (feature `sqlite`)
//
// The driver never looks inside an engine; it only opens one, creates sessions on it and runs
// query/exec/prepare through those sessions.

pub mod fs;
pub mod registry;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::WireError;
use crate::types::{ExecResult, RowValues};

pub use fs::{Filesystem, OsFilesystem};
pub use registry::{DatabaseCatalog, StorageLease, StorageRegistry};

/// Column name the engine uses for the single-value marker row of non-row statements.
pub const OK_RESULT_COLUMN: &str = "__ok_result__";

/// Raw error raised inside an engine, before translation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("database is locked by another process: {0}")]
    StorageLocked(String),

    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    #[error("directory does not exist: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("engine is closed")]
    Closed,

    #[error("query cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// An error the engine already produced in the wire shape.
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// True for the explicit storage-locked sentinel, including the SQLite busy codes.
    #[must_use]
    pub fn is_storage_locked(&self) -> bool {
        match self {
            EngineError::StorageLocked(_) => true,
            #[cfg(feature = "sqlite")]
            EngineError::Sqlite(
                rusqlite::Error::SqliteFailure(failure, _)
                | rusqlite::Error::SqlInputError { error: failure, .. },
            ) => matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Committer identity recorded on every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// Client capability flags negotiated for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientCapabilities {
    /// Report rows matched rather than rows changed for updates. Engines that only track
    /// matched rows report those either way.
    pub found_rows: bool,
    /// The client may send several statements in one query string.
    pub multi_statements: bool,
}

/// Per-connection session state. Owned by the connection, never shared.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub current_database: Option<String>,
    pub committer: Identity,
    pub client_capabilities: ClientCapabilities,
    pub query_start: Option<SystemTime>,
}

impl SessionContext {
    #[must_use]
    pub fn new(
        committer: Identity,
        current_database: Option<String>,
        client_capabilities: ClientCapabilities,
    ) -> Self {
        Self {
            current_database,
            committer,
            client_capabilities,
            query_start: None,
        }
    }
}

/// Row iterator bound to one statement's execution.
pub trait RowIter: Send {
    /// Next row, or `None` when the statement has no more rows.
    ///
    /// # Errors
    /// Returns `EngineError` if the engine fails while producing the row.
    fn next(&mut self) -> Result<Option<Vec<RowValues>>, EngineError>;

    /// Release whatever the iterator holds. Must be safe to call more than once.
    ///
    /// # Errors
    /// Returns `EngineError` if releasing the underlying cursor fails.
    fn close(&mut self) -> Result<(), EngineError>;
}

/// Row iterator over rows that are already materialized.
#[derive(Debug, Default)]
pub struct BufferedRows {
    rows: VecDeque<Vec<RowValues>>,
}

impl BufferedRows {
    #[must_use]
    pub fn new(rows: Vec<Vec<RowValues>>) -> Self {
        Self { rows: rows.into() }
    }
}

impl RowIter for BufferedRows {
    fn next(&mut self) -> Result<Option<Vec<RowValues>>, EngineError> {
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.rows.clear();
        Ok(())
    }
}

/// Schema plus rows produced by a query-style execution.
pub struct QueryOutput {
    pub schema: Arc<Vec<String>>,
    pub rows: Box<dyn RowIter>,
}

impl QueryOutput {
    #[must_use]
    pub fn new(schema: Vec<String>, rows: Box<dyn RowIter>) -> Self {
        Self {
            schema: Arc::new(schema),
            rows,
        }
    }

    /// Output for a statement that produced no rows, carrying its execution summary.
    #[must_use]
    pub fn ok_result(result: ExecResult) -> Self {
        Self::new(
            vec![OK_RESULT_COLUMN.to_string()],
            Box::new(BufferedRows::new(vec![vec![RowValues::OkResult(result)]])),
        )
    }
}

impl fmt::Debug for QueryOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOutput")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// A live engine instance over one storage directory.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Create a dedicated session for one connection.
    async fn new_session(
        &self,
        ctx: &CancellationToken,
        context: &SessionContext,
    ) -> Result<Box<dyn EngineSession>, EngineError>;

    /// Release the engine's storage handle. Existing sessions may keep running.
    async fn close(&self) -> Result<(), EngineError>;
}

/// One connection's view of the engine. Statements on a session run strictly serially.
#[async_trait]
pub trait EngineSession: Send {
    async fn query(
        &mut self,
        ctx: &CancellationToken,
        context: &mut SessionContext,
        sql: &str,
        args: &[RowValues],
    ) -> Result<QueryOutput, EngineError>;

    async fn exec(
        &mut self,
        ctx: &CancellationToken,
        context: &mut SessionContext,
        sql: &str,
        args: &[RowValues],
    ) -> Result<ExecResult, EngineError>;

    /// Analyze a statement without executing it.
    async fn prepare(
        &mut self,
        ctx: &CancellationToken,
        context: &mut SessionContext,
        sql: &str,
    ) -> Result<(), EngineError>;

    /// Whether the session is inside an explicit transaction.
    fn in_transaction(&self) -> bool;
}

/// Builds engines for a connector. Each call must construct a fresh engine.
#[async_trait]
pub trait EngineOpener: Send + Sync {
    async fn open(&self, ctx: &CancellationToken) -> Result<Arc<dyn Engine>, EngineError>;

    /// Directory the opened engines serve, used in error reports.
    fn directory(&self) -> PathBuf;
}
