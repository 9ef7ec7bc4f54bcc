use tokio_util::sync::CancellationToken;

use super::Connection;
use crate::error::DriverError;
use crate::multi::ResultSet;
use crate::types::{ExecResult, RowValues};

/// One analyzed statement, or an ordered batch of them, bound to its connection.
///
/// ```rust,no_run
/// use embedded_sql_driver::prelude::*;
///
/// # async fn demo(conn: &mut Connection) -> Result<(), DriverError> {
/// let ctx = CancellationToken::new();
/// let mut stmt = conn.prepare(&ctx, "INSERT INTO t VALUES (1); INSERT INTO t VALUES (2)").await?;
/// assert!(stmt.is_batch());
/// let last = stmt.exec(&ctx, &[]).await?;
/// assert_eq!(last.rows_affected, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Statement<'c> {
    conn: &'c mut Connection,
    statements: Vec<String>,
}

impl<'c> Statement<'c> {
    pub(crate) fn new(conn: &'c mut Connection, statements: Vec<String>) -> Self {
        Self { conn, statements }
    }

    /// Statement texts in execution order.
    #[must_use]
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    #[must_use]
    pub fn is_batch(&self) -> bool {
        self.statements.len() > 1
    }

    /// Run every statement; the result of the last one is returned.
    ///
    /// # Errors
    /// Returns the first failure; later statements do not run. Bind arguments on a batch are
    /// a `DriverError::ExecutionError`.
    pub async fn exec(
        &mut self,
        ctx: &CancellationToken,
        args: &[RowValues],
    ) -> Result<ExecResult, DriverError> {
        self.conn.exec_statements(ctx, &self.statements, args).await
    }

    /// Run every statement and expose the ones that return rows as result sets.
    ///
    /// # Errors
    /// Returns the failure of the first statement that would have been visible. Later
    /// failures surface from [`ResultSet::next_result_set`].
    pub async fn query(
        &mut self,
        ctx: &CancellationToken,
        args: &[RowValues],
    ) -> Result<ResultSet, DriverError> {
        self.conn.query_statements(ctx, &self.statements, args).await
    }
}
