//! Retry of query and exec operations on storage contention.
//!
//! Both call sites go through [`execute_with_policy`] with an [`EngineOp`]; the outcome type
//! carries whichever result the operation produced.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::retry::scale;
use crate::config::{MIN_RETRY_DELAY, RetryPolicy};
use crate::connection::binding::SessionBinding;
use crate::connector::Connector;
use crate::engine::QueryOutput;
use crate::error::DriverError;
use crate::types::{ExecResult, RowValues};

/// One logical engine operation. Cheap to copy so it can be replayed after a reopen.
#[derive(Debug, Clone, Copy)]
pub(crate) enum EngineOp<'a> {
    Query { sql: &'a str, args: &'a [RowValues] },
    Exec { sql: &'a str, args: &'a [RowValues] },
}

impl EngineOp<'_> {
    fn sql(&self) -> &str {
        match self {
            EngineOp::Query { sql, .. } | EngineOp::Exec { sql, .. } => sql,
        }
    }
}

#[derive(Debug)]
pub(crate) enum EngineOutcome {
    Rows(QueryOutput),
    Done(ExecResult),
}

/// Run `op` once, or under `policy` when retry is enabled and no transaction is open.
///
/// On exhaustion or cancellation the most recent engine failure is returned rather than a
/// generic timeout.
pub(crate) async fn execute_with_policy(
    connector: &Connector,
    binding: &mut SessionBinding,
    policy: &RetryPolicy,
    in_transaction: bool,
    ctx: &CancellationToken,
    op: EngineOp<'_>,
) -> Result<EngineOutcome, DriverError> {
    if !policy.enabled || in_transaction {
        return binding.run(ctx, op).await;
    }

    let deadline = policy.timeout.map(|timeout| Instant::now() + timeout);
    let mut attempt = 1u32;
    let mut last = match binding.run(ctx, op).await {
        Ok(outcome) => return Ok(outcome),
        Err(err) => err,
    };

    loop {
        if !last.is_retryable() {
            return Err(last);
        }
        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            debug!(attempt, "retry attempts exhausted");
            return Err(last);
        }
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        if remaining.is_some_and(|r| r.is_zero()) {
            debug!(attempt, "retry timeout exhausted");
            return Err(last);
        }

        let jitter = rand::rng().random_range(0.5..=1.5);
        let delay = next_delay(attempt, policy, remaining, jitter);
        warn!(
            attempt,
            ?delay,
            error = %last,
            sql = op.sql(),
            "storage contention, retrying after reopen"
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = ctx.cancelled() => return Err(last),
        }
        attempt += 1;

        let rebound = match connector.reopen(ctx, binding.generation()).await {
            Ok(handle) => binding.rebind(ctx, &handle).await,
            Err(err) => Err(err),
        };
        if let Err(err) = rebound {
            if matches!(err, DriverError::Cancelled) {
                return Err(last);
            }
            last = err;
            continue;
        }

        last = match binding.run(ctx, op).await {
            Ok(outcome) => return Ok(outcome),
            Err(DriverError::Cancelled) => return Err(last),
            Err(err) => err,
        };
    }
}

/// Delay before retry number `attempt` (1-based).
///
/// Starts at `max(initial_delay, 10ms)`, doubles per attempt, is capped at the policy ceiling,
/// scaled by `jitter` and finally bounded by `remaining`.
pub(crate) fn next_delay(
    attempt: u32,
    policy: &RetryPolicy,
    remaining: Option<Duration>,
    jitter: f64,
) -> Duration {
    let base = policy.initial_delay.max(MIN_RETRY_DELAY);
    let ceiling = policy.delay_ceiling();
    let doublings = attempt.saturating_sub(1).min(31);
    let delay = base
        .checked_mul(1u32 << doublings)
        .unwrap_or(ceiling)
        .min(ceiling);
    let delay = scale(delay, jitter);
    match remaining {
        Some(remaining) => delay.min(remaining),
        None => delay,
    }
}
