//! Bounded retry of remote calls.
//!
//! Only failures classified retryable by [`ProtocolError::is_retryable`] are
//! retried; exponential backoff with jitter is provided by `backon`.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;

use crate::errors::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 disables retrying)
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryConfig {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)))
            .with_factor(2.0)
            .with_jitter()
            .with_max_times(self.max_retries as usize)
    }
}

/// Outcome of a retried call together with the number of attempts made.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, ProtocolError>,
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails terminally, or retries run out.
pub async fn fetch_with_retry<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProtocolError>>,
{
    let attempts = AtomicU32::new(0);
    let result = (|| {
        attempts.fetch_add(1, Ordering::Relaxed);
        operation()
    })
    .retry(config.backoff())
    .when(ProtocolError::is_retryable)
    .notify(|err: &ProtocolError, delay: Duration| {
        tracing::debug!(error = %err, delay_ms = delay.as_millis() as u64, "retrying remote call");
    })
    .await;

    Attempted {
        result,
        attempts: attempts.load(Ordering::Relaxed),
    }
}
