//! Exponential backoff retry for the embedder gateway (§4.B).

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Backoff schedule: initial delay δ, multiplier β, attempt cap N
/// (§4.B defaults: δ=1s, β=2, N=3). `backoff_multiplier` is configurable so
/// the CLI can honor `SQRL_EMBEDDING_RETRY_BACKOFF`.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        self.base_delay
            .mul_f64(multiplier)
            .min(self.max_delay)
    }
}

/// Substring patterns that mark a provider error as retryable (§4.B). Case
/// matching is insensitive; anything not matching one of these is fatal.
const RETRYABLE_PATTERNS: &[&str] = &[
    "rate limit",
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "5xx",
    "500",
    "502",
    "503",
    "504",
    "429",
];

/// Whether a raw provider error message matches one of the retryable
/// patterns (rate limit, timeout, connection reset, 5xx, 429) as opposed to
/// a fatal one.
pub fn is_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Runs `op`, retrying on retryable failures with exponential backoff.
/// After the final failure, returns `EmbeddingFailed` carrying the last
/// underlying cause.
pub async fn with_retry<F, Fut>(config: &RetryConfig, mut op: F) -> Result<Vec<f32>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<f32>>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(vector) => return Ok(vector),
            Err(err) => {
                let message = err.to_string();
                let retryable = is_retryable(&message);
                if !retryable || attempt >= config.max_retries {
                    return Err(Error::EmbeddingFailed(message));
                }
                tracing::warn!(attempt, %message, "embedder call failed, retrying");
                tokio::time::sleep(config.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
        }
    }
}
