//! Cost tracking, usage ceilings, and generation counters for Careline.
//!
//! Provides real-time cost estimation with built-in model pricing, a usage
//! ledger that gates every provider call against daily and monthly
//! ceilings, and counters for the generation layer.

pub mod ledger;
pub mod metrics;
pub mod pricing;

pub use ledger::{
    Admission, DenyAllLedger, InMemoryUsageLedger, UsageLedger, UsageLimits, UsageSnapshot,
};
pub use metrics::{GenerationMetrics, MetricsSnapshot};
pub use pricing::{ModelPricing, PricingTable};
