//! Exponential backoff with jitter, shared by every component that retries
//! transient infrastructure faults (§7).

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry loop configuration, grounded on the `RetryConfig` pattern used across the
/// workspace's streaming producers.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            enabled: true,
        }
    }
}

impl RetryConfig {
    /// The Discovery Reconciler's notification-conflict policy (§4.4): up to 7
    /// attempts with jittered exponential backoff.
    #[must_use]
    pub fn notification_conflict() -> Self {
        Self {
            max_attempts: 7,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            enabled: true,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(20));
        let capped = exp.min(self.max_delay_ms);
        let jittered = rand::thread_rng().gen_range(0..=capped.max(1));
        Duration::from_millis(jittered)
    }
}

/// Retries `op` while `is_transient` returns true for its error, up to
/// `config.max_attempts`, using jittered exponential backoff between attempts.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &RetryConfig,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if !config.enabled {
        return op().await;
    }

    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < config.max_attempts && is_transient(&err) => {
                let delay = config.delay_for(attempt);
                warn!(attempt, ?delay, "retrying after transient failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                debug!(attempt, "retry loop giving up");
                return Err(err);
            }
        }
    }
}
