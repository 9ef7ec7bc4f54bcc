use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::params::Params;
use super::query::{run_exec, run_query};
use crate::engine::{DatabaseCatalog, EngineError, EngineSession, QueryOutput, SessionContext};
use crate::error::{WireError, codes};
use crate::types::{ExecResult, RowValues};

pub(crate) type SharedConnection = Arc<Mutex<rusqlite::Connection>>;

static USE_DATABASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*use\s+[`"]?(\w+)[`"]?\s*;?\s*$"#).expect("use pattern is valid")
});

static CREATE_DATABASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*create\s+database\s+(if\s+not\s+exists\s+)?[`"]?(\w+)[`"]?\s*;?\s*$"#)
        .expect("create database pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum DatabaseCommand {
    Use(String),
    Create { name: String, if_not_exists: bool },
}

fn parse_database_command(sql: &str) -> Option<DatabaseCommand> {
    if let Some(caps) = USE_DATABASE.captures(sql) {
        return Some(DatabaseCommand::Use(caps[1].to_string()));
    }
    CREATE_DATABASE.captures(sql).map(|caps| DatabaseCommand::Create {
        name: caps[2].to_string(),
        if_not_exists: caps.get(1).is_some(),
    })
}

pub(crate) fn database_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}.db"))
}

/// Open a database file for a session. Contention is reported immediately rather than waited
/// out inside SQLite, so the driver's retry layer sees it.
pub(crate) fn open_database(path: &Path) -> Result<rusqlite::Connection, EngineError> {
    let conn = rusqlite::Connection::open(path)?;
    conn.busy_timeout(Duration::ZERO)?;
    Ok(conn)
}

fn open_detached() -> Result<rusqlite::Connection, EngineError> {
    let conn = rusqlite::Connection::open_in_memory()?;
    conn.busy_timeout(Duration::ZERO)?;
    Ok(conn)
}

fn lock(conn: &SharedConnection) -> MutexGuard<'_, rusqlite::Connection> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run rusqlite work on the blocking pool. Cancelling `ctx` interrupts the running statement.
pub(crate) async fn run_blocking<F, R>(
    conn: &SharedConnection,
    ctx: &CancellationToken,
    func: F,
) -> Result<R, EngineError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, EngineError> + Send + 'static,
    R: Send + 'static,
{
    if ctx.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    let interrupt = lock(conn).get_interrupt_handle();
    let handle = Arc::clone(conn);
    let task = tokio::task::spawn_blocking(move || {
        let mut guard = lock(&handle);
        func(&mut guard)
    });
    tokio::select! {
        joined = task => joined.map_err(|e| {
            EngineError::Other(format!("sqlite spawn_blocking join error: {e}"))
        })?,
        () = ctx.cancelled() => {
            interrupt.interrupt();
            Err(EngineError::Cancelled)
        }
    }
}

/// A session bound to one rusqlite connection.
pub struct SqliteSession {
    conn: SharedConnection,
    root: PathBuf,
    catalog: Arc<DatabaseCatalog>,
    in_transaction: bool,
}

impl SqliteSession {
    pub(crate) async fn open(
        root: PathBuf,
        catalog: Arc<DatabaseCatalog>,
        database: Option<&str>,
    ) -> Result<Self, EngineError> {
        let path = match database {
            Some(name) if !catalog.contains(name) => {
                return Err(EngineError::DatabaseNotFound(name.to_string()));
            }
            Some(name) => Some(database_path(&root, name)),
            None => None,
        };
        let conn = tokio::task::spawn_blocking(move || match path {
            Some(path) => open_database(&path),
            None => open_detached(),
        })
        .await
        .map_err(|e| EngineError::Other(format!("sqlite spawn_blocking join error: {e}")))??;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            root,
            catalog,
            in_transaction: false,
        })
    }

    async fn run_database_command(
        &mut self,
        ctx: &CancellationToken,
        context: &mut SessionContext,
        command: DatabaseCommand,
    ) -> Result<ExecResult, EngineError> {
        match command {
            DatabaseCommand::Use(name) => {
                if !self.catalog.contains(&name) {
                    return Err(EngineError::DatabaseNotFound(name));
                }
                let path = database_path(&self.root, &name);
                run_blocking(&self.conn, ctx, move |guard| {
                    *guard = open_database(&path)?;
                    Ok(())
                })
                .await?;
                debug!(database = %name, "session switched database");
                context.current_database = Some(name);
                self.in_transaction = false;
                Ok(ExecResult::default())
            }
            DatabaseCommand::Create {
                name,
                if_not_exists,
            } => {
                if self.catalog.contains(&name) {
                    if if_not_exists {
                        return Ok(ExecResult::default());
                    }
                    return Err(EngineError::Wire(WireError::new(
                        codes::ER_DB_CREATE_EXISTS,
                        format!("Can't create database '{name}'; database exists"),
                    )));
                }
                let path = database_path(&self.root, &name);
                tokio::task::spawn_blocking(move || {
                    let conn = open_database(&path)?;
                    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
                    Ok::<(), EngineError>(())
                })
                .await
                .map_err(|e| {
                    EngineError::Other(format!("sqlite spawn_blocking join error: {e}"))
                })??;
                self.catalog.insert(&name);
                debug!(database = %name, "database created");
                Ok(ExecResult::new(1, None))
            }
        }
    }
}

#[async_trait]
impl EngineSession for SqliteSession {
    async fn query(
        &mut self,
        ctx: &CancellationToken,
        context: &mut SessionContext,
        sql: &str,
        args: &[RowValues],
    ) -> Result<QueryOutput, EngineError> {
        if let Some(command) = parse_database_command(sql) {
            let result = self.run_database_command(ctx, context, command).await?;
            return Ok(QueryOutput::ok_result(result));
        }
        let sql_owned = sql.to_owned();
        let params = Params::convert(args);
        let (output, autocommit) = run_blocking(&self.conn, ctx, move |guard| {
            let output = run_query(guard, &sql_owned, &params);
            Ok((output, guard.is_autocommit()))
        })
        .await?;
        self.in_transaction = !autocommit;
        output
    }

    async fn exec(
        &mut self,
        ctx: &CancellationToken,
        context: &mut SessionContext,
        sql: &str,
        args: &[RowValues],
    ) -> Result<ExecResult, EngineError> {
        if let Some(command) = parse_database_command(sql) {
            return self.run_database_command(ctx, context, command).await;
        }
        let sql_owned = sql.to_owned();
        let params = Params::convert(args);
        let (result, autocommit) = run_blocking(&self.conn, ctx, move |guard| {
            let result = run_exec(guard, &sql_owned, &params);
            Ok((result, guard.is_autocommit()))
        })
        .await?;
        self.in_transaction = !autocommit;
        result
    }

    async fn prepare(
        &mut self,
        ctx: &CancellationToken,
        _context: &mut SessionContext,
        sql: &str,
    ) -> Result<(), EngineError> {
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if parse_database_command(sql).is_some() {
            return Ok(());
        }
        Parser::parse_sql(&SQLiteDialect {}, sql)
            .map(|_| ())
            .map_err(|e| EngineError::Syntax(e.to_string()))
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_database_commands() {
        assert_eq!(
            parse_database_command("USE inventory;"),
            Some(DatabaseCommand::Use("inventory".into()))
        );
        assert_eq!(
            parse_database_command("use `inventory`"),
            Some(DatabaseCommand::Use("inventory".into()))
        );
        assert_eq!(
            parse_database_command("CREATE DATABASE IF NOT EXISTS sales"),
            Some(DatabaseCommand::Create {
                name: "sales".into(),
                if_not_exists: true
            })
        );
        assert_eq!(
            parse_database_command("create database sales"),
            Some(DatabaseCommand::Create {
                name: "sales".into(),
                if_not_exists: false
            })
        );
        assert_eq!(parse_database_command("SELECT * FROM users"), None);
        assert_eq!(parse_database_command("USE a; DROP TABLE t"), None);
    }
}
