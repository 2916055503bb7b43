//! Bounded retry on rate-limit signals.

use crate::error::{Error, Result};
use crate::metrics::Metrics;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retries granted to an operation by default.
pub const DEFAULT_RETRY_TIMES: u32 = 3;

/// Waits between attempts. Injected so tests run without real sleeps.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry policy for rate-limited remote calls.
///
/// Only [`Error::RateLimited`] is retried, after sleeping the server-provided
/// `retry_after`. Every other error is returned immediately.
#[derive(Clone)]
pub struct RetryPolicy {
    retry_times: u32,
    sleeper: Arc<dyn Sleeper>,
    metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("retry_times", &self.retry_times)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_TIMES)
    }
}

impl RetryPolicy {
    /// Policy allowing `retry_times` retries after the first attempt.
    pub fn new(retry_times: u32) -> Self {
        Self {
            retry_times,
            sleeper: Arc::new(TokioSleeper),
            metrics: None,
        }
    }

    /// Use a custom sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Count retries in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Same policy with a different retry budget.
    pub fn with_retry_times(mut self, retry_times: u32) -> Self {
        self.retry_times = retry_times;
        self
    }

    /// Retry budget.
    pub fn retry_times(&self) -> u32 {
        self.retry_times
    }

    /// Run `op` until it succeeds, fails with a non rate-limit error, or the
    /// retry budget is spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut remaining = self.retry_times;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(Error::RateLimited { retry_after, .. }) if remaining > 0 => {
                    remaining -= 1;
                    warn!(
                        "{} rate limited. Waiting {}s (retries left: {})",
                        label,
                        retry_after.as_secs_f64(),
                        remaining
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_rate_limit_retry();
                    }
                    self.sleeper.sleep(retry_after).await;
                    debug!("Retrying {}...", label);
                }
                Err(err @ Error::RateLimited { .. }) => {
                    warn!(
                        "{} was rate limited after {} retries. This usually happens when there \
                         are multiple queries being run at the same time",
                        label, self.retry_times
                    );
                    return Err(Error::RetryExhausted {
                        attempts: self.retry_times,
                        message: format!("{} was rate limited", label),
                        last_error: Some(Box::new(err)),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}
