//! Safety filter data model.

use careline_core::{ConversationContext, Intent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MedicalAdvice,
    Diagnosis,
    Emergency,
    Profanity,
    Inappropriate,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MedicalAdvice => "medical_advice",
            Self::Diagnosis => "diagnosis",
            Self::Emergency => "emergency",
            Self::Profanity => "profanity",
            Self::Inappropriate => "inappropriate",
        }
    }

    /// Token that replaces a matched span during sanitization.
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::MedicalAdvice => "[MEDICAL_ADVICE]",
            Self::Diagnosis => "[DIAGNOSIS]",
            Self::Emergency => "[EMERGENCY]",
            Self::Profanity | Self::Inappropriate => "[REDACTED]",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// High and critical findings require a human.
    pub fn requires_escalation(&self) -> bool {
        *self >= Severity::High
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// One finding. Logged, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyViolation {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_text: Option<String>,
}

impl SafetyViolation {
    /// One-line summary used in notifications.
    pub fn summary(&self) -> String {
        match &self.matched_text {
            Some(m) => format!(
                "{} ({}): {} [\"{m}\"]",
                self.kind.as_str(),
                self.severity.as_str(),
                self.description
            ),
            None => format!(
                "{} ({}): {}",
                self.kind.as_str(),
                self.severity.as_str(),
                self.description
            ),
        }
    }
}

/// Result of scanning generated text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyResult {
    pub is_safe: bool,
    pub violations: Vec<SafetyViolation>,
    pub escalation_required: bool,
}

impl SafetyResult {
    pub fn from_violations(violations: Vec<SafetyViolation>) -> Self {
        let escalation_required = violations.iter().any(|v| v.severity.requires_escalation());
        Self {
            is_safe: violations.is_empty(),
            violations,
            escalation_required,
        }
    }

    pub fn safe() -> Self {
        Self::from_violations(Vec::new())
    }
}

/// Result of scanning a patient-authored message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundAnalysis {
    pub is_emergency: bool,
    pub emergency_score: u32,
    /// Names of the emergency rules and heuristics that fired.
    pub indicators: Vec<String>,
    pub violations: Vec<SafetyViolation>,
    pub escalation_required: bool,
}

/// Who and where a scan applies to; carried into escalation notifications.
#[derive(Debug, Clone, Default)]
pub struct SafetyContext {
    pub patient_id: String,
    pub conversation_context: Option<ConversationContext>,
    pub intent: Option<Intent>,
}

impl SafetyContext {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            ..Default::default()
        }
    }

    pub fn in_context(mut self, context: ConversationContext) -> Self {
        self.conversation_context = Some(context);
        self
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }
}
