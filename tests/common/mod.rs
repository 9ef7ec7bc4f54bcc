#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use embedded_sql_driver::engine::BufferedRows;
use embedded_sql_driver::prelude::*;

/// Failure a fake engine is scripted to raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Locked,
    ReadOnlyManifest,
    MissingTable,
    MissingDirectory,
}

impl Fault {
    fn raise(self) -> EngineError {
        match self {
            Fault::Locked => EngineError::StorageLocked("held by pid 4242".into()),
            Fault::ReadOnlyManifest => {
                EngineError::Other("cannot update manifest: database is read only".into())
            }
            Fault::MissingTable => EngineError::Other("no such table: missing".into()),
            Fault::MissingDirectory => EngineError::DirectoryNotFound(PathBuf::from("/nowhere")),
        }
    }
}

/// Shared counters and scripts observed by tests.
#[derive(Default)]
pub struct Probe {
    pub opens: AtomicUsize,
    pub live_engines: AtomicUsize,
    pub sessions: AtomicUsize,
    pub attempts: AtomicUsize,
    /// Engine id each new session was created on, in order.
    pub session_engines: Mutex<Vec<usize>>,
    open_faults: Mutex<VecDeque<Fault>>,
    op_faults: Mutex<VecDeque<Fault>>,
    always_fail_ops: Mutex<Option<Fault>>,
}

impl Probe {
    pub fn fail_opens(&self, faults: &[Fault]) {
        self.open_faults.lock().unwrap().extend(faults.iter().copied());
    }

    pub fn fail_ops(&self, faults: &[Fault]) {
        self.op_faults.lock().unwrap().extend(faults.iter().copied());
    }

    pub fn always_fail_ops(&self, fault: Option<Fault>) {
        *self.always_fail_ops.lock().unwrap() = fault;
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn live_engines(&self) -> usize {
        self.live_engines.load(Ordering::SeqCst)
    }

    fn next_op_fault(&self) -> Option<Fault> {
        if let Some(fault) = *self.always_fail_ops.lock().unwrap() {
            return Some(fault);
        }
        self.op_faults.lock().unwrap().pop_front()
    }
}

/// How a [`FakeOpener`] behaves while opening.
#[derive(Debug, Clone, Copy)]
pub enum OpenMode {
    /// Sleep, then succeed unless a fault is scripted.
    Delay(Duration),
    /// Wait for the open context to be cancelled.
    UntilCancelled,
    /// Sleep without watching the context, then succeed.
    IgnoreCancel(Duration),
}

pub struct FakeOpener {
    pub probe: Arc<Probe>,
    mode: OpenMode,
    next_id: AtomicUsize,
}

impl FakeOpener {
    pub fn new(probe: Arc<Probe>, mode: OpenMode) -> Self {
        Self {
            probe,
            mode,
            next_id: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EngineOpener for FakeOpener {
    async fn open(&self, ctx: &CancellationToken) -> Result<Arc<dyn Engine>, EngineError> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            OpenMode::Delay(delay) => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = ctx.cancelled() => return Err(EngineError::Cancelled),
                }
            }
            OpenMode::UntilCancelled => {
                ctx.cancelled().await;
                return Err(EngineError::Cancelled);
            }
            OpenMode::IgnoreCancel(delay) => tokio::time::sleep(delay).await,
        }
        if let Some(fault) = self.probe.open_faults.lock().unwrap().pop_front() {
            return Err(fault.raise());
        }
        self.probe.live_engines.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeEngine {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            probe: Arc::clone(&self.probe),
            closed: AtomicBool::new(false),
        }))
    }

    fn directory(&self) -> PathBuf {
        PathBuf::from("/fake/storage")
    }
}

pub struct FakeEngine {
    id: usize,
    probe: Arc<Probe>,
    closed: AtomicBool,
}

#[async_trait]
impl Engine for FakeEngine {
    async fn new_session(
        &self,
        _ctx: &CancellationToken,
        _context: &SessionContext,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        self.probe.sessions.fetch_add(1, Ordering::SeqCst);
        self.probe.session_engines.lock().unwrap().push(self.id);
        Ok(Box::new(FakeSession {
            engine_id: self.id,
            probe: Arc::clone(&self.probe),
            in_transaction: false,
        }))
    }

    async fn close(&self) -> Result<(), EngineError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.probe.live_engines.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Answers queries with one row holding the engine id; exec reports one affected row.
pub struct FakeSession {
    engine_id: usize,
    probe: Arc<Probe>,
    in_transaction: bool,
}

impl FakeSession {
    fn attempt(&mut self, sql: &str) -> Result<(), EngineError> {
        self.probe.attempts.fetch_add(1, Ordering::SeqCst);
        let keyword = sql.trim().to_ascii_uppercase();
        if matches!(keyword.as_str(), "COMMIT" | "ROLLBACK") {
            self.in_transaction = false;
            return Ok(());
        }
        if let Some(fault) = self.probe.next_op_fault() {
            return Err(fault.raise());
        }
        if keyword == "BEGIN" {
            self.in_transaction = true;
        }
        Ok(())
    }
}

#[async_trait]
impl EngineSession for FakeSession {
    async fn query(
        &mut self,
        _ctx: &CancellationToken,
        _context: &mut SessionContext,
        sql: &str,
        _args: &[RowValues],
    ) -> Result<QueryOutput, EngineError> {
        self.attempt(sql)?;
        let id = i64::try_from(self.engine_id).unwrap_or(i64::MAX);
        Ok(QueryOutput::new(
            vec!["engine_id".into()],
            Box::new(BufferedRows::new(vec![vec![RowValues::Int(id)]])),
        ))
    }

    async fn exec(
        &mut self,
        _ctx: &CancellationToken,
        _context: &mut SessionContext,
        sql: &str,
        _args: &[RowValues],
    ) -> Result<ExecResult, EngineError> {
        self.attempt(sql)?;
        Ok(ExecResult::new(1, None))
    }

    async fn prepare(
        &mut self,
        _ctx: &CancellationToken,
        _context: &mut SessionContext,
        _sql: &str,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

pub fn fake_config() -> ConfigBuilder {
    Config::builder("/fake/storage").committer("tester", "tester@example.com")
}

pub fn fake_connector(config: Config, mode: OpenMode) -> (Connector, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    let opener = FakeOpener::new(Arc::clone(&probe), mode);
    (Connector::new(config, opener), probe)
}

/// Fast retry policy for tests.
pub fn quick_retry() -> RetryPolicy {
    RetryPolicy::enabled()
        .with_initial_delay(Duration::from_millis(5))
        .with_max_delay(Some(Duration::from_millis(20)))
        .with_timeout(Some(Duration::from_secs(5)))
}

/// Create `<dir>/<name>.db` in WAL mode, the layout the SQLite engine expects.
#[cfg(feature = "sqlite")]
pub fn create_sqlite_database(dir: &Path, name: &str) -> rusqlite::Connection {
    let conn = rusqlite::Connection::open(dir.join(format!("{name}.db"))).expect("create db file");
    conn.execute_batch("PRAGMA journal_mode = WAL;")
        .expect("enable wal");
    conn
}

pub fn sqlite_config(dir: &Path) -> ConfigBuilder {
    Config::builder(dir)
        .committer("tester", "tester@example.com")
        .database("app")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
