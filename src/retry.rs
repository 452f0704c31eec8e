//! Retry and backoff policy shared by the translation and synthesis stages.
//!
//! A [`RetryPolicy`] owns the numbers (attempt bound, exponential curve); the
//! [`RetryPolicy::run`] helper owns the control flow: a per-call timeout,
//! cancellation between and during attempts, and demotion of exhausted
//! transient errors to [`DublineError::PermanentSegment`].

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DublineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Ceiling for any single delay
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay slept after the `retry`-th failure (0-based): `base * multiplier^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(31) as i32);
        let millis = (self.base_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis.round() as u64)
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget runs out.
    ///
    /// `op` receives the 1-based attempt number. Each attempt is bounded by
    /// `call_timeout`; an elapsed timeout counts as a transient failure.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        call_timeout: Duration,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(DublineError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DublineError::Cancelled),
                res = tokio::time::timeout(call_timeout, op(attempt)) => res,
            };

            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => DublineError::TransientService(format!(
                    "{} timed out after {:?}",
                    label, call_timeout
                )),
            };

            if !err.is_transient() {
                return Err(err);
            }

            if attempt >= max_attempts {
                warn!("{}: giving up after {} attempts: {}", label, attempt, err);
                return Err(DublineError::PermanentSegment(format!(
                    "{}: retries exhausted after {} attempts: {}",
                    label, attempt, err
                )));
            }

            let delay = self.delay_for(attempt - 1);
            debug!("{}: attempt {} failed ({}), retrying in {:?}", label, attempt, err, delay);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DublineError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
