//! Counters for the generation layer.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide generation counters. Cheap to update from concurrent tasks.
#[derive(Debug, Default)]
pub struct GenerationMetrics {
    calls: AtomicU64,
    failures: AtomicU64,
    queued: AtomicU64,
    cache_hits: AtomicU64,
    validation_retries: AtomicU64,
    fallbacks: AtomicU64,
    tokens: AtomicU64,
    latency_ms_total: AtomicU64,
    cost_usd: Mutex<f64>,
}

/// Serializable copy of [`GenerationMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub failures: u64,
    pub queued: u64,
    pub cache_hits: u64,
    pub validation_retries: u64,
    pub fallbacks: u64,
    pub tokens: u64,
    pub average_latency_ms: f64,
    pub cost_usd: f64,
}

impl GenerationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self, tokens: u32, latency_ms: u64, cost_usd: f64) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.tokens.fetch_add(tokens as u64, Ordering::Relaxed);
        self.latency_ms_total.fetch_add(latency_ms, Ordering::Relaxed);
        *self.cost_usd.lock().unwrap_or_else(PoisonError::into_inner) += cost_usd;
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_retry(&self) {
        self.validation_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let calls = self.calls.load(Ordering::Relaxed);
        let latency = self.latency_ms_total.load(Ordering::Relaxed);
        MetricsSnapshot {
            calls,
            failures: self.failures.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            validation_retries: self.validation_retries.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            tokens: self.tokens.load(Ordering::Relaxed),
            average_latency_ms: if calls == 0 {
                0.0
            } else {
                latency as f64 / calls as f64
            },
            cost_usd: *self.cost_usd.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}
