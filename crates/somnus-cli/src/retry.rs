//! Backoff schedules and cancellable waits.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Exponential backoff: `initial_ms`, doubling (by `multiplier`) up to `max_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    pub fn schedule(&self) -> Backoff {
        Backoff {
            next_ms: self.initial_ms as f64,
            max_ms: self.max_ms as f64,
            multiplier: self.multiplier.max(1.0),
        }
    }

    /// No waiting at all.
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            initial_ms: 0,
            max_ms: 0,
            multiplier: 1.0,
        }
    }
}

/// Bounded retries for calls to an external collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total tries, including the first. Zero is treated as one.
    pub attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    pub fn once() -> Self {
        Self {
            attempts: 1,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Iterator-like delay schedule produced by [`BackoffConfig::schedule`].
#[derive(Debug, Clone)]
pub struct Backoff {
    next_ms: f64,
    max_ms: f64,
    multiplier: f64,
}

impl Backoff {
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next_ms.min(self.max_ms);
        self.next_ms = (current * self.multiplier).min(self.max_ms);
        Duration::from_millis(current as u64)
    }
}

/// Shutdown arrived while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cancelled by shutdown")
    }
}

impl std::error::Error for Cancelled {}

/// Sleep for `duration` unless shutdown comes first.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Run a store operation until it succeeds. Persistence failures are never
/// skipped: the caller cannot move on without the write, so this only gives
/// up when shutdown is requested.
pub async fn persist<T>(
    what: &str,
    backoff: &BackoffConfig,
    cancel: &CancellationToken,
    mut op: impl FnMut() -> somnus_store::Result<T>,
) -> Result<T, Cancelled> {
    let mut schedule = backoff.schedule();
    let mut failures = 0u32;
    loop {
        match op() {
            Ok(value) => {
                if failures > 0 {
                    tracing::info!("{what}: succeeded after {failures} failed attempt(s)");
                }
                return Ok(value);
            }
            Err(e) => {
                failures += 1;
                let delay = schedule.next_delay();
                tracing::error!("{what} failed (attempt {failures}): {e}; retrying in {delay:?}");
                pause(delay, cancel).await?;
            }
        }
    }
}
