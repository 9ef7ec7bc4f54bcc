use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Floor applied to the first retry delay.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(10);
/// Ceiling applied to retry delays when the policy sets no `max_delay`.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(2);

/// How query and exec operations are retried on storage contention.
///
/// ```rust
/// use std::time::Duration;
/// use embedded_sql_driver::prelude::*;
///
/// let policy = RetryPolicy::enabled()
///     .with_timeout(Some(Duration::from_secs(5)))
///     .with_max_attempts(Some(20));
/// assert!(policy.enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Overall budget for one logical operation, measured from its first attempt.
    pub timeout: Option<Duration>,
    /// Maximum number of attempts, including the first.
    pub max_attempts: Option<u32>,
    pub initial_delay: Duration,
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: Some(Duration::from_secs(10)),
            max_attempts: None,
            initial_delay: MIN_RETRY_DELAY,
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    /// Default policy with retries switched on.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay ceiling in effect for this policy.
    #[must_use]
    pub fn delay_ceiling(&self) -> Duration {
        self.max_delay.unwrap_or(DEFAULT_MAX_RETRY_DELAY)
    }
}

/// Multiply a duration by a float factor at nanosecond precision.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn scale(duration: Duration, factor: f64) -> Duration {
    let nanos = duration.as_nanos() as f64 * factor.max(0.0);
    Duration::from_nanos(nanos.min(u64::MAX as f64) as u64)
}

/// Backoff schedule used when opening the engine.
pub trait Backoff: Send {
    /// Start a fresh schedule.
    fn reset(&mut self);

    /// Delay before the next attempt, or `None` once the budget is spent.
    fn next_backoff(&mut self) -> Option<Duration>;
}

/// Exponential backoff with randomized intervals and an optional elapsed-time budget.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_elapsed_time: Option<Duration>,
    /// Intervals are drawn from `current * [1 - factor, 1 + factor]`.
    pub randomization_factor: f64,
    current: Duration,
    started: Instant,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(50),
            multiplier: 2.0,
            max_interval: DEFAULT_MAX_RETRY_DELAY,
            max_elapsed_time: Some(Duration::from_secs(30)),
            randomization_factor: 0.5,
            current: Duration::from_millis(50),
            started: Instant::now(),
        }
    }
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            max_interval,
            current: initial_interval,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_elapsed_time(mut self, max_elapsed_time: Option<Duration>) -> Self {
        self.max_elapsed_time = max_elapsed_time;
        self
    }
}

impl Backoff for ExponentialBackoff {
    fn reset(&mut self) {
        self.current = self.initial_interval;
        self.started = Instant::now();
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(budget) = self.max_elapsed_time
            && self.started.elapsed() >= budget
        {
            return None;
        }
        let factor = self.randomization_factor.clamp(0.0, 1.0);
        let delay = if factor > 0.0 {
            scale(self.current, rand::rng().random_range((1.0 - factor)..=(1.0 + factor)))
        } else {
            self.current
        };
        self.current = scale(self.current, self.multiplier).min(self.max_interval);
        Some(delay)
    }
}

/// Fixed-interval backoff with an attempt budget.
#[derive(Debug, Clone)]
pub struct ConstantBackoff {
    pub interval: Duration,
    pub max_retries: Option<u32>,
    issued: u32,
}

impl ConstantBackoff {
    #[must_use]
    pub fn new(interval: Duration, max_retries: Option<u32>) -> Self {
        Self {
            interval,
            max_retries,
            issued: 0,
        }
    }
}

impl Backoff for ConstantBackoff {
    fn reset(&mut self) {
        self.issued = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.max_retries.is_some_and(|max| self.issued >= max) {
            return None;
        }
        self.issued += 1;
        Some(self.interval)
    }
}

/// A caller-supplied [`Backoff`] shared between the config and the connector that uses it.
#[derive(Clone)]
pub struct SharedBackoff(Arc<Mutex<Box<dyn Backoff>>>);

impl SharedBackoff {
    pub fn new(backoff: impl Backoff + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(backoff))))
    }

    pub fn reset(&self) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .reset();
    }

    #[must_use]
    pub fn next_backoff(&self) -> Option<Duration> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .next_backoff()
    }
}

impl fmt::Debug for SharedBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedBackoff(..)")
    }
}
