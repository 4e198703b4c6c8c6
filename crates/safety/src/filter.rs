//! Stateless safety scans for generated replies and inbound messages.

use crate::model::{InboundAnalysis, SafetyContext, SafetyResult, SafetyViolation, Severity, ViolationKind};
use crate::patterns::{
    CONTENT_PATTERNS, EMERGENCY_PATTERNS, EMERGENCY_PATTERN_WEIGHT, EMERGENCY_THRESHOLD,
    HELP_KEYWORDS, PAIN_NOW_BONUS, SHORT_HELP_BONUS, SHORT_MESSAGE_CHARS, is_conduct_rule,
};
use tracing::{debug, warn};

/// Pattern-based safety filter.
///
/// Holds no state: every scan is a pure function of its input, so one
/// instance can be shared freely across tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyFilter;

impl SafetyFilter {
    pub fn new() -> Self {
        Self
    }

    /// Scan generated text for medical advice, diagnosis and conduct issues.
    pub fn filter_generated(&self, text: &str, ctx: &SafetyContext) -> SafetyResult {
        let violations = scan_content(text, |_| true);
        let result = SafetyResult::from_violations(violations);

        if !result.is_safe {
            warn!(
                patient_id = %ctx.patient_id,
                violations = result.violations.len(),
                escalation = result.escalation_required,
                kinds = ?result.violations.iter().map(|v| v.kind.as_str()).collect::<Vec<_>>(),
                "Generated reply failed safety scan"
            );
        }
        result
    }

    /// Scan a patient-authored message for conduct issues and emergencies.
    pub fn analyze_inbound(&self, text: &str, ctx: &SafetyContext) -> InboundAnalysis {
        let mut violations = scan_content(text, is_conduct_rule);
        let (emergency_score, indicators) = score_emergency(text);
        let is_emergency = emergency_score >= EMERGENCY_THRESHOLD;

        if is_emergency {
            violations.push(SafetyViolation {
                kind: ViolationKind::Emergency,
                severity: Severity::Critical,
                description: format!("emergency indicators: {}", indicators.join(", ")),
                matched_text: None,
            });
            warn!(
                patient_id = %ctx.patient_id,
                score = emergency_score,
                indicators = ?indicators,
                "Inbound message flagged as emergency"
            );
        } else if emergency_score > 0 {
            debug!(
                patient_id = %ctx.patient_id,
                score = emergency_score,
                "Emergency indicators below threshold"
            );
        }

        let escalation_required =
            is_emergency || violations.iter().any(|v| v.severity.requires_escalation());

        InboundAnalysis {
            is_emergency,
            emergency_score,
            indicators,
            violations,
            escalation_required,
        }
    }

    /// Replace each matched span with its typed placeholder.
    ///
    /// Spans are located in the original text and overlapping spans merge
    /// into one placeholder, taken from the most severe violation. Violations
    /// without a matched span leave the text untouched.
    pub fn sanitize(&self, text: &str, violations: &[SafetyViolation]) -> String {
        let mut spans: Vec<(usize, usize, &SafetyViolation)> = violations
            .iter()
            .filter_map(|v| v.matched_text.as_deref().filter(|m| !m.is_empty()).map(|m| (m, v)))
            .flat_map(|(m, v)| {
                text.match_indices(m)
                    .map(move |(start, _)| (start, start + m.len(), v))
            })
            .collect();
        spans.sort_by_key(|&(start, end, _)| (start, std::cmp::Reverse(end)));

        let mut merged: Vec<(usize, usize, &SafetyViolation)> = Vec::new();
        for (start, end, v) in spans {
            match merged.last_mut() {
                Some(last) if start < last.1 => {
                    last.1 = last.1.max(end);
                    if v.severity > last.2.severity {
                        last.2 = v;
                    }
                }
                _ => merged.push((start, end, v)),
            }
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for (start, end, v) in merged {
            out.push_str(&text[cursor..start]);
            out.push_str(v.kind.placeholder());
            cursor = end;
        }
        out.push_str(&text[cursor..]);
        out
    }
}

fn scan_content(text: &str, include: impl Fn(ViolationKind) -> bool) -> Vec<SafetyViolation> {
    let mut violations = Vec::new();
    for rule in CONTENT_PATTERNS.iter().filter(|r| include(r.kind)) {
        for m in rule.pattern.find_iter(text) {
            violations.push(SafetyViolation {
                kind: rule.kind,
                severity: rule.severity,
                description: rule.description.to_string(),
                matched_text: Some(m.as_str().to_string()),
            });
        }
    }
    violations
}

fn score_emergency(text: &str) -> (u32, Vec<String>) {
    let mut score = 0;
    let mut indicators = Vec::new();

    for rule in EMERGENCY_PATTERNS.iter() {
        if rule.pattern.is_match(text) {
            score += EMERGENCY_PATTERN_WEIGHT;
            indicators.push(rule.name.to_string());
        }
    }

    let lower = text.to_lowercase();
    if lower.contains("sakit") && lower.contains("sekarang") {
        score += PAIN_NOW_BONUS;
        indicators.push("pain_now".to_string());
    }
    if lower.chars().count() <= SHORT_MESSAGE_CHARS
        && HELP_KEYWORDS.iter().any(|k| lower.contains(k))
    {
        score += SHORT_HELP_BONUS;
        indicators.push("short_help_request".to_string());
    }

    (score, indicators)
}
