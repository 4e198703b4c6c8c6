//! Usage ledger: admission control over rolling daily and monthly windows.
//!
//! `check()` is consulted before every provider call; `record()` is fed the
//! real usage afterwards. Both take the ledger lock once.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Fraction of a ceiling at which a warning is logged.
const WARN_RATIO: f64 = 0.8;

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Admission {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Ceilings over rolling periods. `0` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageLimits {
    pub daily_max_tokens: u64,
    pub daily_max_usd: f64,
    pub monthly_max_tokens: u64,
    pub monthly_max_usd: f64,
}

impl UsageLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// Point-in-time view of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub daily_tokens: u64,
    pub daily_cost_usd: f64,
    pub monthly_tokens: u64,
    pub monthly_cost_usd: f64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub total_calls: u64,
    pub limits: UsageLimits,
}

/// Admission control seam used by the orchestration layer.
pub trait UsageLedger: Send + Sync {
    /// Whether a call of roughly `estimated_tokens` may proceed.
    fn check(&self, estimated_tokens: u64) -> Admission;

    /// Record the real usage of a completed call.
    fn record(&self, tokens: u64, cost_usd: f64);

    fn snapshot(&self) -> UsageSnapshot;
}

#[derive(Debug)]
struct Totals {
    day: NaiveDate,
    month: (i32, u32),
    daily_tokens: u64,
    daily_cost: f64,
    monthly_tokens: u64,
    monthly_cost: f64,
    total_tokens: u64,
    total_cost: f64,
    total_calls: u64,
}

impl Totals {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            day: now.date_naive(),
            month: (now.year(), now.month()),
            daily_tokens: 0,
            daily_cost: 0.0,
            monthly_tokens: 0,
            monthly_cost: 0.0,
            total_tokens: 0,
            total_cost: 0.0,
            total_calls: 0,
        }
    }

    fn roll_over(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            self.day = today;
            self.daily_tokens = 0;
            self.daily_cost = 0.0;
        }
        let month = (now.year(), now.month());
        if month != self.month {
            self.month = month;
            self.monthly_tokens = 0;
            self.monthly_cost = 0.0;
        }
    }
}

/// In-process ledger. Totals reset at UTC day and month boundaries.
pub struct InMemoryUsageLedger {
    limits: UsageLimits,
    totals: Mutex<Totals>,
}

impl InMemoryUsageLedger {
    pub fn new(limits: UsageLimits) -> Self {
        Self {
            limits,
            totals: Mutex::new(Totals::new(Utc::now())),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(UsageLimits::unlimited())
    }

    pub fn limits(&self) -> &UsageLimits {
        &self.limits
    }

    fn check_at(&self, estimated_tokens: u64, now: DateTime<Utc>) -> Admission {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.roll_over(now);

        let token_windows = [
            ("daily", totals.daily_tokens, self.limits.daily_max_tokens),
            ("monthly", totals.monthly_tokens, self.limits.monthly_max_tokens),
        ];
        for (scope, used, max) in token_windows {
            if max == 0 {
                continue;
            }
            let projected = used + estimated_tokens;
            if projected > max {
                return Admission::deny(format!(
                    "{scope} token ceiling reached: {used} used + {estimated_tokens} estimated > {max}"
                ));
            }
            if projected as f64 >= max as f64 * WARN_RATIO {
                warn!(scope, used, max, "Token usage above 80% of ceiling");
            }
        }

        let cost_windows = [
            ("daily", totals.daily_cost, self.limits.daily_max_usd),
            ("monthly", totals.monthly_cost, self.limits.monthly_max_usd),
        ];
        for (scope, spent, max) in cost_windows {
            if max <= 0.0 {
                continue;
            }
            if spent >= max {
                return Admission::deny(format!(
                    "{scope} spend ceiling reached: ${spent:.4} of ${max:.2}"
                ));
            }
            if spent >= max * WARN_RATIO {
                warn!(scope, spent, max, "Spend above 80% of ceiling");
            }
        }

        Admission::allow()
    }

    fn record_at(&self, tokens: u64, cost_usd: f64, now: DateTime<Utc>) {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.roll_over(now);
        totals.daily_tokens += tokens;
        totals.monthly_tokens += tokens;
        totals.total_tokens += tokens;
        totals.daily_cost += cost_usd;
        totals.monthly_cost += cost_usd;
        totals.total_cost += cost_usd;
        totals.total_calls += 1;
    }
}

impl UsageLedger for InMemoryUsageLedger {
    fn check(&self, estimated_tokens: u64) -> Admission {
        self.check_at(estimated_tokens, Utc::now())
    }

    fn record(&self, tokens: u64, cost_usd: f64) {
        self.record_at(tokens, cost_usd, Utc::now());
    }

    fn snapshot(&self) -> UsageSnapshot {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.roll_over(Utc::now());
        UsageSnapshot {
            daily_tokens: totals.daily_tokens,
            daily_cost_usd: totals.daily_cost,
            monthly_tokens: totals.monthly_tokens,
            monthly_cost_usd: totals.monthly_cost,
            total_tokens: totals.total_tokens,
            total_cost_usd: totals.total_cost,
            total_calls: totals.total_calls,
            limits: self.limits.clone(),
        }
    }
}

/// A ledger that denies everything. Useful to force the queue path.
#[derive(Debug, Default)]
pub struct DenyAllLedger;

impl UsageLedger for DenyAllLedger {
    fn check(&self, _estimated_tokens: u64) -> Admission {
        Admission::deny("usage limits exceeded")
    }

    fn record(&self, _tokens: u64, _cost_usd: f64) {}

    fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn unlimited_always_allows() {
        let ledger = InMemoryUsageLedger::unlimited();
        ledger.record(1_000_000, 50.0);
        assert!(ledger.check(1_000_000).allowed);
    }

    #[test]
    fn daily_token_ceiling_denies() {
        let ledger = InMemoryUsageLedger::new(UsageLimits {
            daily_max_tokens: 1_000,
            ..Default::default()
        });
        let now = at(2026, 3, 10, 9);
        ledger.record_at(900, 0.0, now);
        assert!(ledger.check_at(50, now).allowed);

        let denied = ledger.check_at(200, now);
        assert!(!denied.allowed);
        assert!(denied.reason.unwrap().contains("daily token ceiling"));
    }

    #[test]
    fn spend_ceiling_denies_once_reached() {
        let ledger = InMemoryUsageLedger::new(UsageLimits {
            monthly_max_usd: 1.0,
            ..Default::default()
        });
        let now = at(2026, 3, 10, 9);
        ledger.record_at(10, 0.6, now);
        assert!(ledger.check_at(10, now).allowed);
        ledger.record_at(10, 0.5, now);
        let denied = ledger.check_at(10, now);
        assert!(!denied.allowed);
        assert!(denied.reason.unwrap().contains("monthly"));
    }

    #[test]
    fn daily_window_rolls_over() {
        let ledger = InMemoryUsageLedger::new(UsageLimits {
            daily_max_tokens: 100,
            monthly_max_tokens: 1_000,
            ..Default::default()
        });
        ledger.record_at(100, 0.0, at(2026, 3, 10, 23));
        assert!(!ledger.check_at(1, at(2026, 3, 10, 23)).allowed);
        assert!(ledger.check_at(1, at(2026, 3, 11, 0)).allowed);
    }

    #[test]
    fn monthly_window_rolls_over_across_years() {
        let ledger = InMemoryUsageLedger::new(UsageLimits {
            monthly_max_tokens: 100,
            ..Default::default()
        });
        ledger.record_at(100, 0.0, at(2025, 12, 31, 12));
        assert!(!ledger.check_at(1, at(2025, 12, 31, 13)).allowed);
        assert!(ledger.check_at(1, at(2026, 1, 1, 0)).allowed);
    }

    #[test]
    fn snapshot_reports_totals() {
        let ledger = InMemoryUsageLedger::unlimited();
        ledger.record(120, 0.002);
        ledger.record(80, 0.001);
        let snap = ledger.snapshot();
        assert_eq!(snap.total_calls, 2);
        assert_eq!(snap.daily_tokens, 200);
        assert!((snap.total_cost_usd - 0.003).abs() < 1e-12);
    }

    #[test]
    fn deny_all_ledger() {
        let admission = DenyAllLedger.check(1);
        assert!(!admission.allowed);
        assert_eq!(admission.reason.as_deref(), Some("usage limits exceeded"));
    }
}
