// SQLite engine - bundled rusqlite-backed implementation of the engine traits.
//
// - params: bind argument conversion
// - query: statement execution and row extraction
// - session: per-connection sessions, database switching, statement analysis
//
// Storage layout: one `<name>.db` file per database inside the configured directory.
// The found-rows capability is not read: SQLite counts rows matched by an UPDATE whether or
// not their values changed, so counts are matched rows with the flag on or off.

pub mod params;
pub mod query;
pub mod session;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::{
    DatabaseCatalog, Engine, EngineError, EngineOpener, EngineSession, Filesystem, OsFilesystem,
    SessionContext, StorageLease, StorageRegistry,
};

pub use session::SqliteSession;

/// Opens [`SqliteEngine`]s over one directory.
#[derive(Clone)]
pub struct SqliteOpener {
    directory: PathBuf,
    registry: StorageRegistry,
    fs: Arc<dyn Filesystem>,
}

impl SqliteOpener {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, registry: StorageRegistry) -> Self {
        Self {
            directory: directory.into(),
            registry,
            fs: Arc::new(OsFilesystem),
        }
    }

    /// Replace the filesystem used for the directory checks.
    #[must_use]
    pub fn with_filesystem(mut self, fs: Arc<dyn Filesystem>) -> Self {
        self.fs = fs;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &StorageRegistry {
        &self.registry
    }
}

impl fmt::Debug for SqliteOpener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteOpener")
            .field("directory", &self.directory)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

async fn scan_databases(
    directory: &std::path::Path,
    catalog: &DatabaseCatalog,
) -> Result<(), EngineError> {
    let mut entries = tokio::fs::read_dir(directory).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "db")
            && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
        {
            catalog.insert(stem);
        }
    }
    Ok(())
}

#[async_trait]
impl EngineOpener for SqliteOpener {
    async fn open(&self, ctx: &CancellationToken) -> Result<Arc<dyn Engine>, EngineError> {
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if !self.fs.exists(&self.directory) {
            return Err(EngineError::DirectoryNotFound(self.directory.clone()));
        }
        if !self.fs.is_dir(&self.directory) {
            return Err(EngineError::NotADirectory(self.directory.clone()));
        }

        let (lease, first) = self.registry.acquire(&self.directory);
        if first {
            // A failed scan drops the lease before returning.
            scan_databases(&self.directory, lease.catalog()).await?;
        }
        let catalog = Arc::clone(lease.catalog());
        info!(
            directory = %self.directory.display(),
            databases = catalog.names().len(),
            "sqlite engine opened"
        );
        Ok(Arc::new(SqliteEngine {
            root: self.directory.clone(),
            catalog,
            lease: Mutex::new(Some(lease)),
            closed: AtomicBool::new(false),
        }))
    }

    fn directory(&self) -> PathBuf {
        self.directory.clone()
    }
}

/// Engine instance holding one storage lease on its directory.
pub struct SqliteEngine {
    root: PathBuf,
    catalog: Arc<DatabaseCatalog>,
    lease: Mutex<Option<StorageLease>>,
    closed: AtomicBool,
}

impl SqliteEngine {
    #[must_use]
    pub fn databases(&self) -> Vec<String> {
        self.catalog.names()
    }
}

impl fmt::Debug for SqliteEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteEngine")
            .field("root", &self.root)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Engine for SqliteEngine {
    async fn new_session(
        &self,
        ctx: &CancellationToken,
        context: &SessionContext,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        debug!(
            committer = %context.committer.name,
            database = ?context.current_database,
            "opening sqlite session"
        );
        let session = SqliteSession::open(
            self.root.clone(),
            Arc::clone(&self.catalog),
            context.current_database.as_deref(),
        )
        .await?;
        Ok(Box::new(session))
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let lease = self
            .lease
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(lease) = lease {
            lease.release();
        }
        info!(directory = %self.root.display(), "sqlite engine closed");
        Ok(())
    }
}
