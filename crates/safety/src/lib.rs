//! Safety filter for the patient messaging channel.
//!
//! A best-effort, pattern-based screen in front of the generative model:
//! generated replies are checked for medical advice, diagnoses and conduct
//! issues; patient messages are checked for conduct issues and scored for
//! emergencies. Anything serious is handed to a human responder through
//! [`EscalationService`].
//!
//! ```text
//!  patient text ──▶ analyze_inbound ──▶ InboundAnalysis ──┐
//!                                                         ├──▶ EscalationService ──▶ Notifier
//!  generated  ───▶ filter_generated ──▶ SafetyResult ─────┘
//!                        │
//!                        └──▶ sanitize (typed placeholders)
//! ```

mod escalation;
mod filter;
mod model;
mod patterns;

pub use escalation::EscalationService;
pub use filter::SafetyFilter;
pub use model::{
    InboundAnalysis, SafetyContext, SafetyResult, SafetyViolation, Severity, ViolationKind,
};
pub use patterns::EMERGENCY_THRESHOLD;
