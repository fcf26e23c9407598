//! Single retry-with-backoff utility shared by the oracle refresh and the
//! stream reconnection loop. One implementation instead of per-call-site
//! copies keeps the backoff shape (capped exponential, jittered) uniform.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay added as uniform random jitter (0.0..=1.0).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.3,
        }
    }
}

/// Backoff delay for the given attempt (1-based), capped and jittered to
/// prevent synchronized retries across connections.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(8);
    let mut delay = policy.base_delay.saturating_mul(2u32.saturating_pow(exp));
    delay = delay.min(policy.max_delay);
    let jitter_ms =
        (delay.as_millis() as f64 * policy.jitter_factor * rand::thread_rng().gen::<f64>()) as u64;
    delay + Duration::from_millis(jitter_ms)
}

/// Runs `op` up to `policy.max_attempts` times, sleeping the backoff delay
/// between failures. Returns the last error once attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts => {
                let delay = backoff_delay(policy, attempt);
                warn!(
                    target: "retry",
                    op = label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, backing off before retry"
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(800),
            jitter_factor: 0.0,
        };
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&policy, 4), Duration::from_millis(800));
        // Capped beyond the max
        assert_eq!(backoff_delay(&policy, 9), Duration::from_millis(800));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(100),
            jitter_factor: 0.5,
        };
        for _ in 0..50 {
            let d = backoff_delay(&policy, 1);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter_factor: 0.0,
        };
        let result: Result<u32, String> = retry_with_backoff(&policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(format!("failure {n}"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            jitter_factor: 0.0,
        };
        let result: Result<(), String> =
            retry_with_backoff(&policy, "test", || async { Err("boom".to_string()) }).await;
        assert_eq!(result.unwrap_err(), "boom");
    }
}
