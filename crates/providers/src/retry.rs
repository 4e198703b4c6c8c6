//! Bounded exponential-backoff retry with a per-attempt timeout.
//!
//! Only transient errors (see `ProviderError::is_transient`) are retried. An
//! attempt that exceeds the timeout is reported as `ProviderError::Timeout`.

use careline_core::error::ProviderError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub per_attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            per_attempt_timeout: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &careline_config::ResilienceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            per_attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry(per_attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            per_attempt_timeout,
        }
    }

    /// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = ProviderError::NotConfigured("no attempts made".into());

        for attempt in 1..=attempts {
            debug!(provider = label, attempt, max_attempts = attempts, "Provider attempt");

            let err = match tokio::time::timeout(self.per_attempt_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout(format!(
                    "'{label}' timed out after {}ms",
                    self.per_attempt_timeout.as_millis()
                )),
            };

            if !err.is_transient() {
                return Err(err);
            }

            warn!(provider = label, attempt, error = %err, "Transient provider failure");
            last_error = err;

            if attempt < attempts {
                let mut delay = self.delay_for(attempt);
                if let ProviderError::RateLimited { retry_after_secs } = &last_error {
                    delay = delay.max(Duration::from_secs(*retry_after_secs).min(self.max_delay));
                }
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            per_attempt_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = fast_policy(5);
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for(4), Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = Mutex::new(0u32);
        let result = fast_policy(3)
            .run("mock", || {
                let n = {
                    let mut c = calls.lock().unwrap();
                    *c += 1;
                    *c
                };
                async move {
                    if n < 3 {
                        Err(ProviderError::Network("connection reset".into()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let calls = Mutex::new(0u32);
        let result: Result<(), _> = fast_policy(5)
            .run("mock", || {
                *calls.lock().unwrap() += 1;
                async { Err(ProviderError::BadRequest("bad max_tokens".into())) }
            })
            .await;
        assert!(matches!(result, Err(ProviderError::BadRequest(_))));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_return_last_error() {
        let calls = Mutex::new(0u32);
        let result: Result<(), _> = fast_policy(2)
            .run("mock", || {
                *calls.lock().unwrap() += 1;
                async {
                    Err(ProviderError::ApiError {
                        status_code: 502,
                        message: "bad gateway".into(),
                    })
                }
            })
            .await;
        assert!(matches!(
            result,
            Err(ProviderError::ApiError { status_code: 502, .. })
        ));
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_attempt_times_out() {
        let policy = RetryPolicy {
            per_attempt_timeout: Duration::from_millis(50),
            ..fast_policy(1)
        };
        let result: Result<(), _> = policy
            .run("hanging", || async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }
}
