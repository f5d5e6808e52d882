//! Retry - Waiting for eventual consistency
//!
//! Cloud APIs return before the objects they create are usable. This module
//! provides [`StateChangeConf`] to poll an object until it reaches a target
//! status, and [`retry`] / [`retry_when`] to repeat calls that fail with
//! transient errors.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::{debug, trace};
use tokio::time::Instant;

/// Default number of consecutive not-found results tolerated while waiting
pub const DEFAULT_NOT_FOUND_CHECKS: u32 = 20;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Error returned by [`StateChangeConf::wait_for_state`]
#[derive(Debug, thiserror::Error)]
pub enum WaitError<E> {
    /// The refresh function itself failed
    #[error("{0}")]
    Refresh(E),

    #[error("couldn't find resource ({checks} retries)")]
    NotFound { checks: u32 },

    #[error("unexpected state '{state}', wanted target '{}'", expected.join(", "))]
    UnexpectedState { state: String, expected: Vec<String> },

    #[error(
        "timeout while waiting for state to become '{}' (last state: '{}', timeout: {:?})",
        expected.join(", "),
        last_state.as_deref().unwrap_or(""),
        timeout
    )]
    Timeout {
        last_state: Option<String>,
        expected: Vec<String>,
        timeout: Duration,
    },
}

impl<E> WaitError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }

    /// Convert the refresh error type, keeping the wait outcome
    pub fn map_refresh<F>(self, f: impl FnOnce(E) -> F) -> WaitError<F> {
        match self {
            WaitError::Refresh(e) => WaitError::Refresh(f(e)),
            WaitError::NotFound { checks } => WaitError::NotFound { checks },
            WaitError::UnexpectedState { state, expected } => {
                WaitError::UnexpectedState { state, expected }
            }
            WaitError::Timeout {
                last_state,
                expected,
                timeout,
            } => WaitError::Timeout {
                last_state,
                expected,
                timeout,
            },
        }
    }
}

/// Polls a refresh function until the observed status reaches a target.
///
/// The refresh function returns `Ok(None)` when the object does not exist,
/// and `Ok(Some((object, status)))` otherwise.
pub struct StateChangeConf<F> {
    pub pending: Vec<String>,
    pub target: Vec<String>,
    pub refresh: F,
    pub timeout: Duration,
    /// Wait before the first refresh
    pub delay: Duration,
    /// Smallest wait between refreshes
    pub min_timeout: Duration,
    /// Fixed wait between refreshes, overriding the backoff
    pub poll_interval: Option<Duration>,
    pub not_found_checks: u32,
    /// Number of consecutive target observations required
    pub continuous_target_occurence: u32,
}

impl<F> fmt::Debug for StateChangeConf<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateChangeConf")
            .field("pending", &self.pending)
            .field("target", &self.target)
            .field("timeout", &self.timeout)
            .field("delay", &self.delay)
            .field("min_timeout", &self.min_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("not_found_checks", &self.not_found_checks)
            .field("continuous_target_occurence", &self.continuous_target_occurence)
            .finish()
    }
}

impl<F> StateChangeConf<F> {
    pub fn new(refresh: F) -> Self {
        Self {
            pending: Vec::new(),
            target: Vec::new(),
            refresh,
            timeout: Duration::from_secs(5 * 60),
            delay: Duration::ZERO,
            min_timeout: Duration::ZERO,
            poll_interval: None,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
            continuous_target_occurence: 1,
        }
    }

    pub fn pending<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = states.into_iter().map(Into::into).collect();
        self
    }

    pub fn target<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = states.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    pub fn continuous_target_occurence(mut self, occurences: u32) -> Self {
        self.continuous_target_occurence = occurences.max(1);
        self
    }

    /// Poll until the status is in `target`.
    ///
    /// Returns `Ok(None)` when `target` is empty and the object is gone.
    pub async fn wait_for_state<T, E, Fut>(mut self) -> Result<Option<T>, WaitError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<(T, String)>, E>>,
    {
        if !self.delay.is_zero() {
            debug!("Waiting {:?} before first state refresh", self.delay);
            tokio::time::sleep(self.delay).await;
        }

        let start = Instant::now();
        let mut backoff = INITIAL_BACKOFF;
        let mut not_found = 0u32;
        let mut target_occurences = 0u32;
        let mut last_state: Option<String> = None;

        loop {
            match (self.refresh)().await {
                Err(e) => return Err(WaitError::Refresh(e)),
                Ok(None) => {
                    target_occurences = 0;
                    if self.target.is_empty() {
                        debug!("Resource gone, target reached");
                        return Ok(None);
                    }
                    not_found += 1;
                    debug!(
                        "Resource not found ({}/{})",
                        not_found, self.not_found_checks
                    );
                    if not_found > self.not_found_checks {
                        return Err(WaitError::NotFound { checks: not_found });
                    }
                }
                Ok(Some((object, state))) => {
                    not_found = 0;
                    if last_state.as_deref() != Some(state.as_str()) {
                        trace!(
                            "State changed: '{}' -> '{}'",
                            last_state.as_deref().unwrap_or(""),
                            state
                        );
                    }
                    debug!("Refreshed state: '{}'", state);

                    if self.target.contains(&state) {
                        target_occurences += 1;
                        if target_occurences >= self.continuous_target_occurence {
                            return Ok(Some(object));
                        }
                    } else if self.pending.contains(&state) {
                        target_occurences = 0;
                    } else {
                        return Err(WaitError::UnexpectedState {
                            state,
                            expected: self.target.clone(),
                        });
                    }
                    last_state = Some(state);
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(WaitError::Timeout {
                    last_state,
                    expected: self.target.clone(),
                    timeout: self.timeout,
                });
            }

            let wait = match self.poll_interval {
                Some(interval) => interval,
                None => {
                    let wait = backoff;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    wait
                }
            };
            let wait = wait.max(self.min_timeout).min(self.timeout - elapsed);
            trace!("Sleeping {:?} before next refresh", wait);
            tokio::time::sleep(wait).await;
        }
    }
}

/// Classification of a failed attempt passed to [`retry`]
#[derive(Debug)]
pub enum RetryError<E> {
    Retryable(E),
    NonRetryable(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Retryable(e) | RetryError::NonRetryable(e) => e,
        }
    }
}

/// Repeat `f` while it fails with retryable errors, for at most `timeout`.
///
/// The last attempt happens at the deadline; its error is returned as is.
pub async fn retry<T, E, F, Fut>(timeout: Duration, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryError<E>>>,
    E: fmt::Display,
{
    let start = Instant::now();
    let mut backoff = INITIAL_BACKOFF;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(RetryError::NonRetryable(e)) => return Err(e),
            Err(RetryError::Retryable(e)) => {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    debug!("Giving up after {} attempts: {}", attempts, e);
                    return Err(e);
                }
                let wait = backoff.min(timeout - elapsed);
                debug!("Attempt {} failed, retrying in {:?}: {}", attempts, wait, e);
                tokio::time::sleep(wait).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// [`retry`] for calls returning plain errors, classified by `is_retryable`
pub async fn retry_when<T, E, F, Fut, P>(timeout: Duration, mut f: F, is_retryable: P) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    retry(timeout, || {
        let fut = f();
        let is_retryable = &is_retryable;
        async move {
            fut.await.map_err(|e| {
                if is_retryable(&e) {
                    RetryError::Retryable(e)
                } else {
                    RetryError::NonRetryable(e)
                }
            })
        }
    })
    .await
}
