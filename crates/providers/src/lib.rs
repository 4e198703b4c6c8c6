//! Generative provider implementations for Careline.
//!
//! All providers implement the `careline_core::Provider` trait. The
//! `ResilientProvider` wraps any of them with bounded retry and a circuit
//! breaker.

pub mod breaker;
pub mod openai_compat;
pub mod resilient;
pub mod retry;
pub mod shape;

pub use breaker::{AtomicCircuitBreaker, BreakerState, CircuitBreaker};
pub use openai_compat::OpenAiCompatProvider;
pub use resilient::ResilientProvider;
pub use retry::RetryPolicy;
pub use shape::adapt_turns;

use std::sync::Arc;

/// Build the configured provider stack: HTTP provider, retry, and breaker.
pub fn from_config(
    config: &careline_config::AppConfig,
) -> Result<ResilientProvider, careline_core::ProviderError> {
    let http = Arc::new(OpenAiCompatProvider::from_config(&config.provider)?);
    let mut provider = ResilientProvider::new(http, RetryPolicy::from_config(&config.resilience));
    if config.resilience.circuit_breaker.enabled {
        provider = provider.with_breaker(Arc::new(AtomicCircuitBreaker::from_config(
            &config.provider.name,
            &config.resilience.circuit_breaker,
        )));
    }
    Ok(provider)
}
