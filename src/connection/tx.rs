use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Connection, Statement};
use crate::error::DriverError;
use crate::multi::ResultSet;
use crate::types::{ExecResult, RowValues};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Options for [`Connection::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
}

impl TxOptions {
    pub(crate) fn check(self) -> Result<(), DriverError> {
        if !matches!(
            self.isolation,
            IsolationLevel::Default | IsolationLevel::Serializable
        ) {
            return Err(DriverError::Unimplemented(format!(
                "isolation level {:?}",
                self.isolation
            )));
        }
        if self.read_only {
            return Err(DriverError::Unimplemented(
                "read-only transactions".into(),
            ));
        }
        Ok(())
    }
}

/// Transaction handle that borrows the connection until commit or rollback.
///
/// Dropping it unfinished schedules a rollback that runs before the connection's next
/// operation.
#[derive(Debug)]
pub struct Transaction<'c> {
    conn: &'c mut Connection,
    finished: bool,
}

impl<'c> Transaction<'c> {
    pub(crate) fn new(conn: &'c mut Connection) -> Self {
        Self {
            conn,
            finished: false,
        }
    }

    /// Prepare a statement inside this transaction.
    ///
    /// # Errors
    /// Returns `DriverError` if analysis fails.
    pub async fn prepare(
        &mut self,
        ctx: &CancellationToken,
        sql: &str,
    ) -> Result<Statement<'_>, DriverError> {
        self.conn.prepare(ctx, sql).await
    }

    /// # Errors
    /// Returns `DriverError` if preparing or running the query fails.
    pub async fn query(
        &mut self,
        ctx: &CancellationToken,
        sql: &str,
        args: &[RowValues],
    ) -> Result<ResultSet, DriverError> {
        self.conn.query(ctx, sql, args).await
    }

    /// # Errors
    /// Returns `DriverError` if preparing or running the statement fails.
    pub async fn exec(
        &mut self,
        ctx: &CancellationToken,
        sql: &str,
        args: &[RowValues],
    ) -> Result<ExecResult, DriverError> {
        self.conn.exec(ctx, sql, args).await
    }

    /// # Errors
    /// Returns `DriverError` if the commit fails. The transaction is rolled back before the
    /// connection's next operation in that case.
    pub async fn commit(mut self, ctx: &CancellationToken) -> Result<(), DriverError> {
        self.finished = true;
        self.conn.finish_transaction(ctx, "COMMIT").await?;
        debug!("transaction committed");
        Ok(())
    }

    /// # Errors
    /// Returns `DriverError` if the rollback fails.
    pub async fn rollback(mut self, ctx: &CancellationToken) -> Result<(), DriverError> {
        self.finished = true;
        self.conn.finish_transaction(ctx, "ROLLBACK").await?;
        debug!("transaction rolled back");
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("transaction dropped unfinished, rollback scheduled");
            self.conn.rollback_pending = true;
        }
    }
}
