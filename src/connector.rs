//! Engine lifecycle: one lazily opened engine per connector, shared by every connection.
//!
//! The state lock is only held around checks and updates, never across an open. Callers that
//! arrive while an open is in flight wait on its completion signal and then re-evaluate.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::Connection;
use crate::engine::{Engine, EngineOpener};
use crate::error::{DriverError, translate_open};

/// A shared engine together with the generation it was stored under.
#[derive(Clone)]
pub(crate) struct EngineHandle {
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) generation: u64,
}

#[derive(Clone)]
struct InFlight {
    id: u64,
    /// Cancelled once the open has finished, successfully or not.
    done: CancellationToken,
    /// Context the open runs under; `close` cancels it.
    cancel: CancellationToken,
    /// Terminal failure of this open, shared with everyone who waited on it.
    failure: Arc<OnceLock<DriverError>>,
}

#[derive(Default)]
struct ConnectorState {
    engine: Option<Arc<dyn Engine>>,
    generation: u64,
    closed: bool,
    opening: Option<InFlight>,
}

struct Shared {
    config: Config,
    opener: Arc<dyn EngineOpener>,
    state: Mutex<ConnectorState>,
    open_ids: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

enum Step {
    Ready(EngineHandle),
    Wait(InFlight),
    Open(InFlight),
}

/// Clears the in-flight marker and wakes waiters, even if the opening future is dropped.
struct OpenGuard<'a> {
    shared: &'a Shared,
    id: u64,
    done: CancellationToken,
}

impl Drop for OpenGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            if state.opening.as_ref().is_some_and(|f| f.id == self.id) {
                state.opening = None;
            }
        }
        self.done.cancel();
    }
}

/// Owns the shared engine for one storage directory and hands out connections bound to it.
///
/// Cloning is cheap; clones share the same engine and state.
#[derive(Clone)]
pub struct Connector {
    shared: Arc<Shared>,
}

impl Connector {
    #[must_use]
    pub fn new(config: Config, opener: impl EngineOpener + 'static) -> Self {
        Self::with_opener(config, Arc::new(opener))
    }

    #[must_use]
    pub fn with_opener(config: Config, opener: Arc<dyn EngineOpener>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                opener,
                state: Mutex::new(ConnectorState::default()),
                open_ids: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Open a connection, opening the shared engine first if nobody has yet.
    ///
    /// # Errors
    /// Returns `DriverError::ConfigError` for an invalid configuration, `DriverError::Closed`
    /// after [`Connector::close`], `DriverError::OpenError` when the engine cannot be built and
    /// `DriverError::Cancelled` when `ctx` is cancelled first.
    pub async fn connect(&self, ctx: &CancellationToken) -> Result<Connection, DriverError> {
        self.shared.config.validate()?;
        let handle = self.engine(ctx).await?;
        Connection::open(self.clone(), handle, ctx).await
    }

    /// Current engine, opening it under the single-opener discipline when absent.
    pub(crate) async fn engine(
        &self,
        ctx: &CancellationToken,
    ) -> Result<EngineHandle, DriverError> {
        loop {
            let step = {
                let mut state = self.shared.lock();
                if state.closed {
                    return Err(DriverError::Closed);
                }
                if let Some(engine) = &state.engine {
                    Step::Ready(EngineHandle {
                        engine: Arc::clone(engine),
                        generation: state.generation,
                    })
                } else if let Some(in_flight) = &state.opening {
                    Step::Wait(in_flight.clone())
                } else {
                    let in_flight = InFlight {
                        id: self.shared.open_ids.fetch_add(1, Ordering::Relaxed),
                        done: CancellationToken::new(),
                        cancel: ctx.child_token(),
                        failure: Arc::new(OnceLock::new()),
                    };
                    state.opening = Some(in_flight.clone());
                    Step::Open(in_flight)
                }
            };

            match step {
                Step::Ready(handle) => return Ok(handle),
                Step::Wait(in_flight) => {
                    debug!("waiting for in-flight engine open");
                    tokio::select! {
                        () = in_flight.done.cancelled() => {}
                        () = ctx.cancelled() => return Err(DriverError::Cancelled),
                    }
                    // A cancelled leader says nothing about the engine; try again ourselves.
                    if let Some(err) = in_flight.failure.get()
                        && !matches!(err, DriverError::Cancelled)
                    {
                        return Err(err.clone());
                    }
                }
                Step::Open(in_flight) => return self.open_as_leader(in_flight).await,
            }
        }
    }

    async fn open_as_leader(&self, in_flight: InFlight) -> Result<EngineHandle, DriverError> {
        let _guard = OpenGuard {
            shared: &self.shared,
            id: in_flight.id,
            done: in_flight.done.clone(),
        };
        let opened = match self.open_with_backoff(&in_flight.cancel).await {
            Ok(engine) => engine,
            Err(err) => {
                let _ = in_flight.failure.set(err.clone());
                return Err(err);
            }
        };

        let stored = {
            let mut state = self.shared.lock();
            state.opening = None;
            if state.closed {
                None
            } else {
                state.generation += 1;
                state.engine = Some(Arc::clone(&opened));
                Some(EngineHandle {
                    engine: Arc::clone(&opened),
                    generation: state.generation,
                })
            }
        };

        match stored {
            Some(handle) => {
                info!(
                    directory = %self.shared.opener.directory().display(),
                    generation = handle.generation,
                    "engine opened"
                );
                Ok(handle)
            }
            None => {
                debug!("connector closed during open, releasing engine");
                release(opened).await;
                Err(DriverError::Closed)
            }
        }
    }

    async fn open_with_backoff(
        &self,
        ctx: &CancellationToken,
    ) -> Result<Arc<dyn Engine>, DriverError> {
        let opener = &self.shared.opener;
        let directory = opener.directory();
        let Some(backoff) = self.shared.config.open_backoff() else {
            return opener
                .open(ctx)
                .await
                .map_err(|e| translate_open(&directory, e));
        };

        backoff.reset();
        let mut last_failure: Option<DriverError> = None;
        let mut attempt = 1u32;
        loop {
            let err = match opener.open(ctx).await {
                Ok(engine) => return Ok(engine),
                Err(e) => translate_open(&directory, e),
            };
            if matches!(err, DriverError::Cancelled) {
                return Err(last_failure.unwrap_or(err));
            }
            if !err.is_retryable() {
                return Err(err);
            }
            let Some(delay) = backoff.next_backoff() else {
                return Err(err);
            };
            warn!(attempt, ?delay, error = %err, "engine open hit storage contention, backing off");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = ctx.cancelled() => return Err(err),
            }
            last_failure = Some(err);
            attempt += 1;
        }
    }

    /// Replace the engine stored under `stale_generation` with a freshly opened one.
    ///
    /// If another caller already replaced it, the newer engine is returned as is.
    pub(crate) async fn reopen(
        &self,
        ctx: &CancellationToken,
        stale_generation: u64,
    ) -> Result<EngineHandle, DriverError> {
        let stale = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(DriverError::Closed);
            }
            if state.generation == stale_generation {
                state.engine.take()
            } else {
                None
            }
        };
        if let Some(engine) = stale {
            debug!(generation = stale_generation, "detached engine for reopen");
            release(engine).await;
        }
        self.engine(ctx).await
    }

    /// Generation of the stored engine, if one is stored.
    pub(crate) fn current_generation(&self) -> Option<u64> {
        let state = self.shared.lock();
        state.engine.as_ref().map(|_| state.generation)
    }

    /// Close the connector. Idempotent.
    ///
    /// Cancels an in-flight open and releases the stored engine. Open connections keep their
    /// sessions but every later engine access fails with `DriverError::Closed`.
    ///
    /// # Errors
    /// Returns the translated engine error if releasing the engine fails.
    pub async fn close(&self) -> Result<(), DriverError> {
        let (engine, in_flight) = {
            let mut state = self.shared.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            (state.engine.take(), state.opening.clone())
        };
        if let Some(in_flight) = in_flight {
            debug!("cancelling in-flight engine open");
            in_flight.cancel.cancel();
        }
        if let Some(engine) = engine {
            engine
                .close()
                .await
                .map_err(crate::error::translate)?;
            info!(
                directory = %self.shared.opener.directory().display(),
                "engine closed"
            );
        }
        Ok(())
    }
}

async fn release(engine: Arc<dyn Engine>) {
    if let Err(e) = engine.close().await {
        warn!(error = %e, "failed to release engine");
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Connector")
            .field("directory", &self.shared.config.directory())
            .field("open", &state.engine.is_some())
            .field("generation", &state.generation)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}
