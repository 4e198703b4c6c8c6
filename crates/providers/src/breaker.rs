//! Circuit breaker over a provider.
//!
//! Closed → (N consecutive failures) → Open → (cooldown) → HalfOpen →
//! trial call succeeds → Closed, trial call fails → Open. Only one trial call is admitted
//! while half-open; a trial call that never reports back is replaced by a new one
//! after another cooldown.

use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            STATE_OPEN => Self::Open,
            STATE_HALF_OPEN => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Breaker seam used by `ResilientProvider`. Implementations must be safe to
/// share across concurrent calls.
pub trait CircuitBreaker: Send + Sync {
    /// Whether a call may proceed right now. May move Open → HalfOpen.
    fn allow(&self) -> bool;

    fn record_success(&self);

    fn record_failure(&self);

    fn state(&self) -> BreakerState;
}

/// Lock-free breaker: every transition is a compare-exchange on one `AtomicU8`.
pub struct AtomicCircuitBreaker {
    name: String,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    /// Millis since `epoch` when the breaker last opened or admitted a trial call.
    opened_at_ms: AtomicU64,
    failure_threshold: u32,
    reset_timeout: Duration,
    epoch: Instant,
}

impl AtomicCircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            epoch: Instant::now(),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &careline_config::CircuitBreakerConfig) -> Self {
        Self::new(
            name,
            config.failure_threshold,
            Duration::from_secs(config.reset_timeout_secs),
        )
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn trip(&self, from: u8) {
        if self
            .state
            .compare_exchange(from, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.opened_at_ms.store(self.now_ms(), Ordering::Release);
            warn!(
                breaker = %self.name,
                failures = self.consecutive_failures(),
                cooldown_secs = self.reset_timeout.as_secs(),
                "Circuit breaker opened"
            );
        }
    }
}

impl CircuitBreaker for AtomicCircuitBreaker {
    fn allow(&self) -> bool {
        let now = self.now_ms();
        let cooldown = self.reset_timeout.as_millis() as u64;
        let since = self.opened_at_ms.load(Ordering::Acquire);
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED => true,
            STATE_OPEN => {
                // Only the caller that wins the swap gets the trial call.
                let admitted = now.saturating_sub(since) >= cooldown
                    && self
                        .state
                        .compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok();
                if admitted {
                    self.opened_at_ms.store(now, Ordering::Release);
                }
                admitted
            }
            STATE_HALF_OPEN => {
                // The trial call was dropped before reporting; admit a replacement.
                let stale = now.saturating_sub(since) >= cooldown
                    && self
                        .opened_at_ms
                        .compare_exchange(since, now, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok();
                if stale {
                    warn!(breaker = %self.name, "Half-open trial call never reported, admitting another");
                }
                stale
            }
            _ => false,
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        if self
            .state
            .compare_exchange(
                STATE_HALF_OPEN,
                STATE_CLOSED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            info!(breaker = %self.name, "Circuit breaker closed after successful trial call");
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        match self.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => self.trip(STATE_HALF_OPEN),
            STATE_CLOSED if failures >= self.failure_threshold => self.trip(STATE_CLOSED),
            _ => {}
        }
    }

    fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }
}
