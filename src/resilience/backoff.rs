//! Exponential backoff executor with cancellation.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Backoff options.
#[derive(Debug, Clone)]
pub struct BackoffOptions {
    /// Retries after the first attempt (total attempts = retries + 1).
    pub retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Scale each delay by a random factor in `[0.5, 1.0]`.
    pub jitter: bool,
    /// Aborts waits and pending attempts when fired.
    pub cancellation: Option<CancellationToken>,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(4000),
            jitter: true,
            cancellation: None,
        }
    }
}

impl BackoffOptions {
    /// Creates options with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of retries.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the base delay.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the delay cap.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the cancellation token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Options that run the operation exactly once.
    pub fn no_retries() -> Self {
        Self {
            retries: 0,
            ..Default::default()
        }
    }

    /// Un-jittered delay after the attempt at `attempt_index` failed:
    /// `min(base_delay * 2^attempt_index, max_delay)`.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let factor = 1u128 << attempt_index.min(64);
        let delay_ms = self
            .base_delay
            .as_millis()
            .saturating_mul(factor)
            .min(self.max_delay.as_millis());

        Duration::from_millis(u64::try_from(delay_ms).unwrap_or(u64::MAX))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        delay.mul_f64(factor)
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Outcome of a failed backoff run.
#[derive(Debug, Error)]
pub enum BackoffError<E> {
    /// The last failure of the operation, unchanged.
    #[error("{0}")]
    Operation(E),
    /// Cancellation fired before the operation succeeded.
    #[error("operation cancelled")]
    Cancelled,
}

impl<E> BackoffError<E> {
    /// Returns true if the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackoffError::Cancelled)
    }

    /// Returns the operation's error, if the run was not cancelled.
    pub fn into_operation(self) -> Option<E> {
        match self {
            BackoffError::Operation(err) => Some(err),
            BackoffError::Cancelled => None,
        }
    }
}

/// Stateless retry executor.
///
/// Each call owns its own timers, so concurrent runs with independent
/// options never interfere.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackoffExecutor;

impl BackoffExecutor {
    /// Runs `operation`, retrying every failure until the retry budget is spent.
    pub async fn run<F, Fut, T, E>(operation: F, options: &BackoffOptions) -> Result<T, BackoffError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        Self::run_with(operation, options, |_| true).await
    }

    /// Runs `operation`, retrying only failures accepted by `should_retry`.
    ///
    /// A rejected failure is returned immediately without waiting.
    pub async fn run_with<F, Fut, T, E, P>(
        operation: F,
        options: &BackoffOptions,
        should_retry: P,
    ) -> Result<T, BackoffError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: FnMut(&E) -> bool,
    {
        Self::run_with_hint(operation, options, should_retry, |_| None).await
    }

    /// Like [`run_with`](Self::run_with), but waits at least `min_delay(&err)`
    /// before the next attempt, capped at `max_delay`.
    pub async fn run_with_hint<F, Fut, T, E, P, H>(
        mut operation: F,
        options: &BackoffOptions,
        mut should_retry: P,
        mut min_delay: H,
    ) -> Result<T, BackoffError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: FnMut(&E) -> bool,
        H: FnMut(&E) -> Option<Duration>,
    {
        let mut attempt: u32 = 0;

        loop {
            if options.is_cancelled() {
                return Err(BackoffError::Cancelled);
            }

            let result = match &options.cancellation {
                Some(token) => {
                    tokio::select! {
                        biased;
                        () = token.cancelled() => return Err(BackoffError::Cancelled),
                        result = operation() => result,
                    }
                }
                None => operation().await,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= options.retries || !should_retry(&err) {
                return Err(BackoffError::Operation(err));
            }

            let mut delay = options.jittered(options.delay_for(attempt));
            if let Some(floor) = min_delay(&err) {
                delay = delay.max(floor.min(options.max_delay));
            }

            tracing::info!(
                attempt = attempt + 1,
                retries = options.retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Retrying after error"
            );

            match &options.cancellation {
                Some(token) => {
                    tokio::select! {
                        biased;
                        () = token.cancelled() => return Err(BackoffError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }

            attempt += 1;
        }
    }
}
