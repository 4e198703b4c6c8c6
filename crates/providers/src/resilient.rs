//! Resilient provider: retry policy plus optional circuit breaker.
//!
//! The breaker is consulted once per call and updated once per call, after
//! the retry loop finishes. Permanent errors mean the backend answered, so
//! they do not count toward tripping it.

use crate::breaker::CircuitBreaker;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use careline_core::error::ProviderError;
use careline_core::provider::*;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ResilientProvider {
    inner: Arc<dyn careline_core::Provider>,
    policy: RetryPolicy,
    breaker: Option<Arc<dyn CircuitBreaker>>,
}

impl ResilientProvider {
    pub fn new(inner: Arc<dyn careline_core::Provider>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            breaker: None,
        }
    }

    pub fn with_breaker(mut self, breaker: Arc<dyn CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn breaker(&self) -> Option<&Arc<dyn CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl careline_core::Provider for ResilientProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supports_system_role(&self) -> bool {
        self.inner.supports_system_role()
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationResponse, ProviderError> {
        let name = self.inner.name().to_string();

        if let Some(breaker) = &self.breaker {
            if !breaker.allow() {
                info!(provider = %name, "Circuit open, short-circuiting request");
                return Err(ProviderError::CircuitOpen(name));
            }
        }

        let result = self
            .policy
            .run(&name, || self.inner.generate(request.clone()))
            .await;

        if let Some(breaker) = &self.breaker {
            match &result {
                Err(e) if e.is_transient() => breaker.record_failure(),
                _ => breaker.record_success(),
            }
        }

        if let Err(e) = &result {
            warn!(provider = %name, error = %e, transient = e.is_transient(), "Provider call failed");
        }
        result
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{AtomicCircuitBreaker, BreakerState};
    use careline_core::{ChatTurn, Provider};
    use std::sync::Mutex;
    use std::time::Duration;

    /// A mock provider that fails with a fixed error for the first `failures` calls.
    struct FlakyProvider {
        error: ProviderError,
        failures: usize,
        call_count: Mutex<usize>,
    }

    impl FlakyProvider {
        fn new(error: ProviderError, failures: usize) -> Self {
            Self {
                error,
                failures,
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl careline_core::Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        fn supports_system_role(&self) -> bool {
            false
        }

        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> std::result::Result<GenerationResponse, ProviderError> {
            let n = {
                let mut c = self.call_count.lock().unwrap();
                *c += 1;
                *c
            };
            if n <= self.failures {
                return Err(self.error.clone());
            }
            Ok(GenerationResponse {
                content: "baik".into(),
                tokens_used: 12,
                model: "test-model".into(),
                stop_reason: Some("stop".into()),
                usage: None,
            })
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(vec![ChatTurn::user("halo")], 50, 0.2)
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            per_attempt_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let inner = Arc::new(FlakyProvider::new(ProviderError::Timeout("slow".into()), 2));
        let provider = ResilientProvider::new(inner.clone(), policy(3));
        let resp = provider.generate(request()).await.unwrap();
        assert_eq!(resp.content, "baik");
        assert_eq!(inner.calls(), 3);
        assert!(!provider.supports_system_role());
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_and_short_circuits() {
        let inner = Arc::new(FlakyProvider::new(
            ProviderError::Network("refused".into()),
            usize::MAX,
        ));
        let breaker = Arc::new(AtomicCircuitBreaker::new("flaky", 2, Duration::from_secs(60)));
        let provider = ResilientProvider::new(inner.clone(), policy(1)).with_breaker(breaker.clone());

        assert!(provider.generate(request()).await.is_err());
        assert!(provider.generate(request()).await.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);

        let err = provider.generate(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::CircuitOpen(_)));
        assert!(err.should_queue());
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_do_not_trip_breaker() {
        let inner = Arc::new(FlakyProvider::new(
            ProviderError::AuthenticationFailed("bad key".into()),
            usize::MAX,
        ));
        let breaker = Arc::new(AtomicCircuitBreaker::new("flaky", 1, Duration::from_secs(60)));
        let provider = ResilientProvider::new(inner.clone(), policy(3)).with_breaker(breaker.clone());

        for _ in 0..3 {
            let err = provider.generate(request()).await.unwrap_err();
            assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(inner.calls(), 3);
    }

    /// Never answers the first call; answers every later one.
    struct StallingProvider {
        stalled: Mutex<bool>,
    }

    #[async_trait]
    impl careline_core::Provider for StallingProvider {
        fn name(&self) -> &str {
            "stalling"
        }

        fn supports_system_role(&self) -> bool {
            true
        }

        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> std::result::Result<GenerationResponse, ProviderError> {
            let first = std::mem::replace(&mut *self.stalled.lock().unwrap(), false);
            if first {
                std::future::pending::<()>().await;
            }
            Ok(GenerationResponse {
                content: "baik".into(),
                tokens_used: 3,
                model: "test-model".into(),
                stop_reason: None,
                usage: None,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_trial_call_does_not_wedge_breaker() {
        let inner = Arc::new(StallingProvider {
            stalled: Mutex::new(true),
        });
        let breaker = Arc::new(AtomicCircuitBreaker::new("stalling", 1, Duration::from_secs(30)));
        breaker.record_failure();
        let provider = ResilientProvider::new(inner, policy(1)).with_breaker(breaker.clone());

        tokio::time::advance(Duration::from_secs(31)).await;
        let abandoned = tokio::time::timeout(Duration::from_millis(500), provider.generate(request())).await;
        assert!(abandoned.is_err());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        tokio::time::advance(Duration::from_secs(31)).await;
        let resp = provider.generate(request()).await.unwrap();
        assert_eq!(resp.content, "baik");
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
