//! Bounded exponential backoff for external capability calls.
//!
//! Embedding and extraction services time out and rate-limit; the
//! pipeline retries those calls under an explicit [`RetryPolicy`]
//! rather than a hardcoded loop, so attempt counts and delays are
//! configurable per deployment.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::warn;

use crate::error::MeshError;

/// Retry policy for transient capability failures.
///
/// Delay before attempt `n+1` is `base_delay_ms * 2^(n-1)` (capped)
/// plus uniform random jitter in `[0, jitter_ms]`.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_jitter_ms() -> u64 {
    250
}

impl RetryPolicy {
    /// Policy with no delays, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            jitter_ms: 0,
        }
    }

    /// Backoff delay after `failed_attempts` failures (1-based).
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        // Cap the exponent so the delay stays bounded.
        let exp = failed_attempts.clamp(1, 6) - 1;
        let base = self.base_delay_ms.saturating_mul(1u64 << exp);
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base.saturating_add(jitter))
    }
}

/// Run `op` until it succeeds, fails non-transiently, or the attempt
/// budget is exhausted. Only [`MeshError::Transient`] is retried.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, MeshError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MeshError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(policy.delay(attempt - 1)).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                warn!(what, attempt, attempts, error = %err, "transient failure, will retry");
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err
        .unwrap_or_else(|| MeshError::Transient(format!("{}: retries exhausted", what))))
}
