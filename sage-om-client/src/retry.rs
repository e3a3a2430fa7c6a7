//! Bounded retry of native-component calls.

use crate::errors::SageResult;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Cap on the backoff exponent.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// One scheduled retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEvent {
    /// 1-based retry number.
    pub attempt: u32,
    pub max_retries: u32,
    pub delay: Duration,
    pub operation: String,
    pub error: String,
}

/// Receives every retry. Reporting only; never affects control flow.
pub trait RetryObserver: Send + Sync {
    fn on_retry(&self, event: &RetryEvent);
}

/// Reports retries as `tracing` warnings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRetryObserver;

impl RetryObserver for TracingRetryObserver {
    fn on_retry(&self, event: &RetryEvent) {
        tracing::warn!(
            attempt = event.attempt,
            max_retries = event.max_retries,
            delay_secs = event.delay.as_secs_f64(),
            operation = %event.operation,
            error = %event.error,
            "Retrying Sage operation"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backoff {
    /// `2^attempt` seconds.
    Exponential,
    Immediate,
}

/// Retries transient failures ([`SageError::is_transient`]) a bounded
/// number of times; everything else propagates on the first attempt.
///
/// [`SageError::is_transient`]: crate::SageError::is_transient
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Backoff,
    observer: Arc<dyn RetryObserver>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3)
    }
}

impl RetryPolicy {
    /// Exponential backoff for slow transient failures.
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Exponential,
            observer: Arc::new(TracingRetryObserver),
        }
    }

    /// Immediate retries for fast-failing calls.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Immediate,
            observer: Arc::new(TracingRetryObserver),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::immediate(0)
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Wait before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Exponential => Duration::from_secs(1 << attempt.min(MAX_BACKOFF_EXPONENT)),
            Backoff::Immediate => Duration::ZERO,
        }
    }

    /// Runs `call` until it succeeds, fails permanently or retries run out.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut call: F) -> SageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SageResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    self.observer.on_retry(&RetryEvent {
                        attempt,
                        max_retries: self.max_retries,
                        delay,
                        operation: operation.to_owned(),
                        error: e.to_string(),
                    });
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
