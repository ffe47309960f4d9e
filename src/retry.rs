//! Bounded retry with exponential backoff and jitter.
//!
//! Technical failures are retried; a successful call that returns nothing
//! (an empty chain, no listed expiries) is a valid answer and goes straight
//! back to the caller. Exhausting the budget yields `None` instead of an
//! error, and callers price the affected positions at zero.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{ErrorKind, FetchError};

// ── Sleeping ────────────────────────────────────────────────────────

/// Blocking pause between attempts and between underlyings.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeper.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// ── Policy ──────────────────────────────────────────────────────────

/// Upper bound on a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Whether a failure of this kind is worth another attempt.
pub fn should_retry(kind: ErrorKind) -> bool {
    match kind {
        ErrorKind::RateLimited => true,
        ErrorKind::NetworkTimeout => true,
        ErrorKind::ConnectionFailed => true,
        // Same request, same refusal. The source renews its session on the next call.
        ErrorKind::Unauthorized => false,
        // Unknown failures are treated as transient.
        ErrorKind::Other => true,
    }
}

impl RetryConfig {
    /// `base_sleep × 2^attempt ± uniform(jitter)`, never below `min_sleep`
    /// and never above `MAX_BACKOFF`.
    /// `attempt` is the zero-based index of the attempt that just failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = self.jitter.as_secs_f64();
        let offset = if jitter > 0.0 {
            rand::rng().random_range(-jitter..=jitter)
        } else {
            0.0
        };
        self.backoff_with_offset(attempt, offset)
    }

    fn backoff_with_offset(&self, attempt: u32, offset_secs: f64) -> Duration {
        let exp = 2f64.powi(attempt.min(30) as i32);
        let secs = (self.base_sleep.as_secs_f64() * exp + offset_secs)
            .max(self.min_sleep.as_secs_f64())
            .min(MAX_BACKOFF.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(MAX_BACKOFF)
    }
}

// ── Controller ──────────────────────────────────────────────────────

pub struct RetryController<'a> {
    config: &'a RetryConfig,
    sleeper: &'a dyn Sleeper,
}

impl<'a> RetryController<'a> {
    pub fn new(config: &'a RetryConfig, sleeper: &'a dyn Sleeper) -> Self {
        Self { config, sleeper }
    }

    /// Run `operation` up to `max_retries` times. Returns `None` once the
    /// budget is spent; the final error is logged, not raised.
    pub async fn execute<T, F, Fut>(&self, op_name: &str, mut operation: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let attempts = self.config.max_retries.max(1);

        for attempt in 0..attempts {
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(op = op_name, attempts = attempt + 1, "succeeded after retry");
                    }
                    return Some(value);
                }
                Err(err) => err,
            };

            if !should_retry(err.kind) {
                warn!(op = op_name, error = %err, "giving up on non-retryable error");
                return None;
            }

            if attempt + 1 >= attempts {
                warn!(op = op_name, attempts, error = %err, "retries exhausted, treating as no data");
                return None;
            }

            let delay = self.config.backoff(attempt);
            match err.kind {
                ErrorKind::RateLimited => warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    backoff_ms = delay.as_millis() as u64,
                    "rate limited by provider"
                ),
                _ => debug!(
                    op = op_name,
                    attempt = attempt + 1,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying"
                ),
            }
            self.sleeper.sleep(delay).await;
        }

        None
    }
}
