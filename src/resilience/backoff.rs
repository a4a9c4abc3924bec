//! Bounded retry with exponential backoff.

use super::GuardError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure; doubled after each further failure.
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay after failed attempt `attempt` (1-indexed): `base * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping between failures.
///
/// Attempts are strictly sequential. The first success is returned as-is;
/// after the last failure the error is wrapped in [`GuardError::Exhausted`].
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, GuardError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        debug!("{} - attempt {}/{}", label, attempt, max_attempts);

        let error = match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) => e.into(),
        };

        warn!("{} failed on attempt {}: {:#}", label, attempt, error);

        if attempt >= max_attempts {
            warn!("{} failed after {} attempts", label, max_attempts);
            return Err(GuardError::Exhausted {
                attempts: max_attempts,
                source: error,
            });
        }

        let delay = policy.delay_for(attempt);
        debug!("Retrying {} in {}ms", label, delay.as_millis());
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
