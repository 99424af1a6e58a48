//! Eventually and Consistently drivers.
//!
//! Both drivers call a polling function repeatedly, one call at a time. The polling
//! function reports whether a failure is worth retrying through [`Attempt`].
use std::{future::Future, time::Duration};

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Timing for the drivers.
///
/// Values are never changed in place. Derive a new value with the `with_*` methods
/// to use different timing for a group of operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// How long an eventually loop keeps trying.
    pub eventually_timeout: Duration,
    /// Pause between eventually attempts.
    pub eventually_poll_interval: Duration,
    /// How long a consistently loop keeps checking.
    pub consistently_duration: Duration,
    /// Pause between consistently checks.
    pub consistently_poll_interval: Duration,
    /// Time for controller caches to observe a deletion before waiting on the
    /// replacement.
    pub cache_refresh_delay: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            eventually_timeout: Duration::from_secs(5 * 60),
            eventually_poll_interval: Duration::from_secs(2),
            consistently_duration: Duration::from_secs(10),
            consistently_poll_interval: Duration::from_secs(2),
            cache_refresh_delay: Duration::from_secs(5),
        }
    }
}

impl Timeouts {
    /// Timing of an eventually loop.
    pub fn eventually(&self) -> Polling {
        Polling {
            timeout: self.eventually_timeout,
            interval: self.eventually_poll_interval,
        }
    }

    /// Timing of a consistently loop.
    pub fn consistently(&self) -> Polling {
        Polling {
            timeout: self.consistently_duration,
            interval: self.consistently_poll_interval,
        }
    }

    /// Copy with a different eventually timeout and poll interval.
    pub fn with_eventually(self, timeout: Duration, interval: Duration) -> Self {
        Self {
            eventually_timeout: timeout,
            eventually_poll_interval: interval,
            ..self
        }
    }

    /// Copy with a different consistently duration and poll interval.
    pub fn with_consistently(self, duration: Duration, interval: Duration) -> Self {
        Self {
            consistently_duration: duration,
            consistently_poll_interval: interval,
            ..self
        }
    }

    /// Copy with a different cache refresh delay.
    pub fn with_cache_refresh_delay(self, delay: Duration) -> Self {
        Self {
            cache_refresh_delay: delay,
            ..self
        }
    }
}

/// Deadline and interval of a single loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Polling {
    /// Total time of the loop.
    pub timeout: Duration,
    /// Pause between attempts.
    pub interval: Duration,
}

/// Why an attempt did not produce a value.
#[derive(Debug)]
pub enum Attempt {
    /// Not there yet. The description is reported if the deadline passes.
    Retry(String),
    /// Retrying cannot help.
    Fatal(Error),
}

impl From<Error> for Attempt {
    fn from(err: Error) -> Self {
        Attempt::Fatal(err)
    }
}

/// What a loop is waiting on, for diagnostics.
#[derive(Clone, Debug)]
pub struct Diagnostics {
    /// Kind of the resource.
    pub kind: String,
    /// Namespaced name of the resource.
    pub id: String,
    /// Failure description.
    pub message: String,
}

impl Diagnostics {
    /// Describe a loop over one resource.
    pub fn new(kind: impl Into<String>, id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Call `f` until it succeeds, fails fatally, or the timeout elapses.
///
/// On timeout the last retryable failure is reported as [`Error::Timeout`].
pub async fn eventually<T, F, Fut>(polling: Polling, diag: &Diagnostics, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Attempt>>,
{
    let start = Instant::now();
    let deadline = start + polling.timeout;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let last = match f().await {
            Ok(value) => {
                debug!(kind = %diag.kind, id = %diag.id, attempt, "eventually satisfied");
                return Ok(value);
            }
            Err(Attempt::Fatal(err)) => return Err(err),
            Err(Attempt::Retry(reason)) => reason,
        };
        debug!(kind = %diag.kind, id = %diag.id, attempt, reason = %last, "not satisfied yet");
        let now = Instant::now();
        if now >= deadline {
            info!(kind = %diag.kind, id = %diag.id, attempt, "gave up waiting");
            return Err(Error::Timeout {
                kind: diag.kind.clone(),
                id: diag.id.clone(),
                elapsed: start.elapsed(),
                last,
                message: diag.message.clone(),
            });
        }
        sleep(polling.interval.min(deadline - now)).await;
    }
}

/// Call `f` for the whole duration, failing on the first unsuccessful call.
///
/// Returns the value of the last call.
pub async fn consistently<T, F, Fut>(polling: Polling, diag: &Diagnostics, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Attempt>>,
{
    let start = Instant::now();
    let deadline = start + polling.timeout;
    let mut checks = 0u32;
    loop {
        checks += 1;
        let value = match f().await {
            Ok(value) => value,
            Err(Attempt::Fatal(err)) => return Err(err),
            Err(Attempt::Retry(reason)) => {
                return Err(Error::NotConsistent {
                    kind: diag.kind.clone(),
                    id: diag.id.clone(),
                    elapsed: start.elapsed(),
                    last: reason,
                    message: diag.message.clone(),
                })
            }
        };
        let now = Instant::now();
        if now >= deadline {
            debug!(kind = %diag.kind, id = %diag.id, checks, "consistently satisfied");
            return Ok(value);
        }
        sleep(polling.interval.min(deadline - now)).await;
    }
}
