use std::fmt;
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connector::EngineHandle;
use crate::engine::{EngineSession, SessionContext};
use crate::error::{DriverError, translate};
use crate::retry::{EngineOp, EngineOutcome};

/// A connection's engine session, the session state it carries, and the engine generation
/// the session was created on.
pub(crate) struct SessionBinding {
    generation: u64,
    session: Box<dyn EngineSession>,
    context: SessionContext,
}

impl SessionBinding {
    pub(crate) async fn open(
        ctx: &CancellationToken,
        handle: &EngineHandle,
        context: SessionContext,
    ) -> Result<Self, DriverError> {
        let session = handle
            .engine
            .new_session(ctx, &context)
            .await
            .map_err(translate)?;
        Ok(Self {
            generation: handle.generation,
            session,
            context,
        })
    }

    /// Swap in a session on `handle`'s engine, keeping the session state.
    pub(crate) async fn rebind(
        &mut self,
        ctx: &CancellationToken,
        handle: &EngineHandle,
    ) -> Result<(), DriverError> {
        if handle.generation == self.generation {
            return Ok(());
        }
        let session = handle
            .engine
            .new_session(ctx, &self.context)
            .await
            .map_err(translate)?;
        debug!(
            from = self.generation,
            to = handle.generation,
            "session rebound to reopened engine"
        );
        self.session = session;
        self.generation = handle.generation;
        Ok(())
    }

    pub(crate) async fn run(
        &mut self,
        ctx: &CancellationToken,
        op: EngineOp<'_>,
    ) -> Result<EngineOutcome, DriverError> {
        self.context.query_start = Some(SystemTime::now());
        let outcome = match op {
            EngineOp::Query { sql, args } => self
                .session
                .query(ctx, &mut self.context, sql, args)
                .await
                .map(EngineOutcome::Rows),
            EngineOp::Exec { sql, args } => self
                .session
                .exec(ctx, &mut self.context, sql, args)
                .await
                .map(EngineOutcome::Done),
        };
        outcome.map_err(translate)
    }

    pub(crate) async fn prepare(
        &mut self,
        ctx: &CancellationToken,
        sql: &str,
    ) -> Result<(), DriverError> {
        self.session
            .prepare(ctx, &mut self.context, sql)
            .await
            .map_err(translate)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn context(&self) -> &SessionContext {
        &self.context
    }

    pub(crate) fn in_transaction(&self) -> bool {
        self.session.in_transaction()
    }
}

impl fmt::Debug for SessionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBinding")
            .field("generation", &self.generation)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
