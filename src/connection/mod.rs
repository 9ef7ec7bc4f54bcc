// Connection module - one caller's session on the connector's shared engine.
//
// - binding: engine session + session state + engine generation
// - statement: prepared single statements and batches
// - tx: transactions and their options
//
// Statements on a connection run strictly one at a time (`&mut self`). Retry applies only
// outside transactions; after a reopen by any connection the others rebind lazily.

pub(crate) mod binding;
mod statement;
mod tx;

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::connector::{Connector, EngineHandle};
use crate::engine::QueryOutput;
use crate::error::{DriverError, WireError, codes};
use crate::multi::{ResultSet, Slot};
use crate::retry::{EngineOp, EngineOutcome, execute_with_policy};
use crate::split::{is_blank_statement, split_statements};
use crate::types::{ExecResult, RowValues};

use binding::SessionBinding;

pub use statement::Statement;
pub use tx::{IsolationLevel, Transaction, TxOptions};

/// A session on the shared engine, used by one caller at a time.
pub struct Connection {
    connector: Connector,
    binding: SessionBinding,
    policy: RetryPolicy,
    multi_statements: bool,
    tx_depth: u32,
    rollback_pending: bool,
}

impl Connection {
    pub(crate) async fn open(
        connector: Connector,
        handle: EngineHandle,
        ctx: &CancellationToken,
    ) -> Result<Self, DriverError> {
        let config = connector.config();
        let context = config.session_context();
        let policy = config.retry_policy().clone();
        let multi_statements = config.multi_statements();
        let binding = SessionBinding::open(ctx, &handle, context).await?;
        debug!(generation = handle.generation, "connection opened");
        Ok(Self {
            connector,
            binding,
            policy,
            multi_statements,
            tx_depth: 0,
            rollback_pending: false,
        })
    }

    /// True while a transaction is open, whether begun through [`Connection::begin`] or by an
    /// explicit `BEGIN` statement.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.tx_depth > 0 || self.binding.in_transaction()
    }

    #[must_use]
    pub fn current_database(&self) -> Option<&str> {
        self.binding.context().current_database.as_deref()
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Analyze `sql` and return a statement ready to run.
    ///
    /// With multi-statement support enabled the text is split into a batch; blank and
    /// comment-only statements are dropped. Every statement is analyzed before any runs.
    ///
    /// # Errors
    /// Returns `DriverError::QueryError` for empty input or analysis failures, and
    /// `DriverError::Closed` once the connector is closed.
    pub async fn prepare(
        &mut self,
        ctx: &CancellationToken,
        sql: &str,
    ) -> Result<Statement<'_>, DriverError> {
        self.ready(ctx).await?;
        let statements: Vec<String> = if self.multi_statements {
            split_statements(sql)
                .into_iter()
                .filter(|stmt| {
                    let blank = is_blank_statement(stmt);
                    if blank {
                        debug!("skipping blank statement");
                    }
                    !blank
                })
                .collect()
        } else if is_blank_statement(sql) {
            Vec::new()
        } else {
            vec![sql.trim().to_string()]
        };
        if statements.is_empty() {
            return Err(DriverError::from(WireError::new(
                codes::ER_EMPTY_QUERY,
                "Query was empty",
            )));
        }
        if statements.len() > 1 {
            debug!(count = statements.len(), "split statement batch");
        }
        for stmt in &statements {
            self.binding.prepare(ctx, stmt).await?;
        }
        Ok(Statement::new(self, statements))
    }

    /// Prepare and run `sql` in query style.
    ///
    /// # Errors
    /// See [`Connection::prepare`] and [`Statement::query`].
    pub async fn query(
        &mut self,
        ctx: &CancellationToken,
        sql: &str,
        args: &[RowValues],
    ) -> Result<ResultSet, DriverError> {
        let mut stmt = self.prepare(ctx, sql).await?;
        stmt.query(ctx, args).await
    }

    /// Prepare and run `sql` in exec style.
    ///
    /// # Errors
    /// See [`Connection::prepare`] and [`Statement::exec`].
    pub async fn exec(
        &mut self,
        ctx: &CancellationToken,
        sql: &str,
        args: &[RowValues],
    ) -> Result<ExecResult, DriverError> {
        let mut stmt = self.prepare(ctx, sql).await?;
        stmt.exec(ctx, args).await
    }

    /// Start a transaction. Statements inside it are never retried.
    ///
    /// # Errors
    /// Returns `DriverError::Unimplemented` for unsupported options and
    /// `DriverError::ExecutionError` if a transaction is already open.
    pub async fn begin(
        &mut self,
        ctx: &CancellationToken,
        opts: TxOptions,
    ) -> Result<Transaction<'_>, DriverError> {
        opts.check()?;
        self.ready(ctx).await?;
        if self.in_transaction() {
            return Err(DriverError::ExecutionError(
                "transaction already in progress".into(),
            ));
        }
        self.run(ctx, EngineOp::Exec { sql: "BEGIN", args: &[] })
            .await?;
        self.tx_depth = 1;
        debug!("transaction started");
        Ok(Transaction::new(self))
    }

    /// Verify the connector is open and its engine reachable.
    ///
    /// # Errors
    /// Returns `DriverError::Closed` after the connector was closed, or the open error.
    pub async fn ping(&mut self, ctx: &CancellationToken) -> Result<(), DriverError> {
        self.ready(ctx).await?;
        self.connector.engine(ctx).await.map(|_| ())
    }

    /// Close the connection, rolling back an open transaction. The shared engine stays open.
    ///
    /// # Errors
    /// Returns the rollback failure, if one was needed and failed.
    pub async fn close(mut self) -> Result<(), DriverError> {
        if self.in_transaction() {
            let ctx = CancellationToken::new();
            self.finish_transaction(&ctx, "ROLLBACK").await?;
        }
        debug!("connection closed");
        Ok(())
    }

    /// Settle deferred work and follow a reopened engine before running anything.
    async fn ready(&mut self, ctx: &CancellationToken) -> Result<(), DriverError> {
        if self.connector.is_closed() {
            return Err(DriverError::Closed);
        }
        if self.rollback_pending {
            self.rollback_pending = false;
            if self.in_transaction() {
                debug!("rolling back abandoned transaction");
                self.finish_transaction(ctx, "ROLLBACK").await?;
            }
            self.tx_depth = 0;
        }
        if !self.in_transaction()
            && self
                .connector
                .current_generation()
                .is_some_and(|generation| generation != self.binding.generation())
        {
            let handle = self.connector.engine(ctx).await?;
            self.binding.rebind(ctx, &handle).await?;
        }
        Ok(())
    }

    async fn run(
        &mut self,
        ctx: &CancellationToken,
        op: EngineOp<'_>,
    ) -> Result<EngineOutcome, DriverError> {
        let in_transaction = self.in_transaction();
        execute_with_policy(
            &self.connector,
            &mut self.binding,
            &self.policy,
            in_transaction,
            ctx,
            op,
        )
        .await
    }

    /// Run every statement in exec style, stopping at the first failure.
    async fn exec_statements(
        &mut self,
        ctx: &CancellationToken,
        statements: &[String],
        args: &[RowValues],
    ) -> Result<ExecResult, DriverError> {
        check_args(statements, args)?;
        self.ready(ctx).await?;
        let mut last = ExecResult::default();
        for sql in statements {
            last = match self.run(ctx, EngineOp::Exec { sql, args }).await? {
                EngineOutcome::Done(result) => result,
                EngineOutcome::Rows(_) => ExecResult::default(),
            };
        }
        Ok(last)
    }

    /// Run every statement in query style. A failure occupies its statement's slot and no
    /// later statement runs.
    async fn query_statements(
        &mut self,
        ctx: &CancellationToken,
        statements: &[String],
        args: &[RowValues],
    ) -> Result<ResultSet, DriverError> {
        check_args(statements, args)?;
        self.ready(ctx).await?;
        let mut slots = Vec::with_capacity(statements.len());
        for sql in statements {
            match self.run(ctx, EngineOp::Query { sql, args }).await {
                Ok(EngineOutcome::Rows(output)) => slots.push(Slot::Output(output)),
                Ok(EngineOutcome::Done(result)) => {
                    slots.push(Slot::Output(QueryOutput::ok_result(result)));
                }
                Err(err) => {
                    debug!(error = %err, "batch stopped at failed statement");
                    slots.push(Slot::Failed(err));
                    break;
                }
            }
        }
        ResultSet::from_slots(slots)
    }

    /// Run COMMIT or ROLLBACK without retry and leave transaction mode.
    async fn finish_transaction(
        &mut self,
        ctx: &CancellationToken,
        sql: &'static str,
    ) -> Result<(), DriverError> {
        let result = self
            .binding
            .run(ctx, EngineOp::Exec { sql, args: &[] })
            .await;
        self.tx_depth = 0;
        if let Err(err) = &result {
            if self.binding.in_transaction() {
                self.rollback_pending = true;
            }
            warn!(statement = sql, error = %err, "failed to finish transaction");
        }
        result.map(|_| ())
    }
}

fn check_args(statements: &[String], args: &[RowValues]) -> Result<(), DriverError> {
    if statements.len() > 1 && !args.is_empty() {
        return Err(DriverError::ExecutionError(format!(
            "bind arguments are not supported for a batch of {} statements",
            statements.len()
        )));
    }
    Ok(())
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("binding", &self.binding)
            .field("tx_depth", &self.tx_depth)
            .field("rollback_pending", &self.rollback_pending)
            .finish_non_exhaustive()
    }
}
