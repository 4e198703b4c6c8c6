//! Pattern sets for the safety filter.
//!
//! Patterns target Indonesian text and are matched case-insensitively
//! against the original message so matched spans can be sanitized in place.

use crate::model::{Severity, ViolationKind};
use regex_lite::Regex;
use std::sync::LazyLock;
use tracing::warn;

/// A compiled content rule.
pub struct ContentRule {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub description: &'static str,
    pub pattern: Regex,
}

/// A compiled emergency rule. Each hit adds [`EMERGENCY_PATTERN_WEIGHT`].
pub struct EmergencyRule {
    pub name: &'static str,
    pub pattern: Regex,
}

pub const EMERGENCY_PATTERN_WEIGHT: u32 = 3;
pub const PAIN_NOW_BONUS: u32 = 2;
pub const SHORT_HELP_BONUS: u32 = 2;
pub const EMERGENCY_THRESHOLD: u32 = 3;
/// Messages at or under this many characters count as "short".
pub const SHORT_MESSAGE_CHARS: usize = 60;

pub const HELP_KEYWORDS: [&str; 4] = ["tolong", "bantu", "help", "darurat"];

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(&format!("(?i){pattern}")) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern, error = %e, "Skipping invalid safety pattern");
            None
        }
    }
}

const CONTENT_RULES: &[(ViolationKind, Severity, &str, &str)] = &[
    // Medical advice: dosing or medication changes
    (
        ViolationKind::MedicalAdvice,
        Severity::High,
        "dose or medication change instruction",
        r"\b(naikkan|turunkan|tambah|tambahkan|kurangi|gandakan|ganti|hentikan)\s+(dosis|obat)\w*",
    ),
    (
        ViolationKind::MedicalAdvice,
        Severity::High,
        "stop-medication instruction",
        r"\b(berhenti|stop|jangan)\s+(minum|konsumsi|pakai)\s+obat\w*",
    ),
    (
        ViolationKind::MedicalAdvice,
        Severity::High,
        "specific dosage",
        r"\bminum\s+\d+\s*(tablet|kapsul|butir|mg|ml|sendok)\b",
    ),
    (
        ViolationKind::MedicalAdvice,
        Severity::Medium,
        "treatment recommendation",
        r"\b(sebaiknya|harus|disarankan)\s+(anda\s+)?(minum|konsumsi|suntik)\s+\w+",
    ),
    // Diagnosis
    (
        ViolationKind::Diagnosis,
        Severity::High,
        "diagnostic statement",
        r"\banda\s+(menderita|mengidap|terkena|kena)\s+\w+",
    ),
    (
        ViolationKind::Diagnosis,
        Severity::High,
        "speculative diagnosis",
        r"\b(kemungkinan|sepertinya|pasti|mungkin)\s+(anda\s+)?(menderita|mengidap|terkena|kena)\s+\w+",
    ),
    (
        ViolationKind::Diagnosis,
        Severity::High,
        "explicit diagnosis",
        r"\bdiagnosis(nya)?\s+(anda\s+)?(adalah|yaitu)\b",
    ),
    // Profanity
    (
        ViolationKind::Profanity,
        Severity::Medium,
        "profanity",
        r"\b(anjing|bangsat|bajingan|goblok|tolol|kampret|brengsek|keparat|sialan|fuck|shit)\b",
    ),
    // Inappropriate: requests for payment or credentials
    (
        ViolationKind::Inappropriate,
        Severity::Low,
        "financial or credential request",
        r"\b(nomor\s+rekening|transfer\s+uang|kartu\s+kredit|kata\s+sandi|password|pin\s+atm)\b",
    ),
];

const EMERGENCY_RULES: &[(&str, &str)] = &[
    ("breathing_difficulty", r"\bsesak\s*(napas|nafas)?\b"),
    (
        "cannot_breathe",
        r"\b(tidak|gak|susah|sulit)\s+bisa\s+(bernapas|bernafas|napas|nafas)\b|\b(susah|sulit)\s+(bernapas|bernafas)\b",
    ),
    ("chest_pain", r"\b(nyeri|sakit)\s+dada\b"),
    ("loss_of_consciousness", r"\b(pingsan|tidak\s+sadar(kan\s+diri)?|koma)\b"),
    ("seizure", r"\bkejang\w*"),
    (
        "bleeding",
        r"\b(pendarahan|perdarahan|muntah\s+darah|batuk\s+darah|berdarah\s+banyak)\b",
    ),
    ("self_harm", r"\b(bunuh\s+diri|ingin\s+mati|mau\s+mati|mengakhiri\s+hidup)\b"),
    ("overdose", r"\b(overdosis|keracunan|kelebihan\s+obat)\b"),
    ("emergency_word", r"\b(darurat|gawat)\b"),
];

pub static CONTENT_PATTERNS: LazyLock<Vec<ContentRule>> = LazyLock::new(|| {
    CONTENT_RULES
        .iter()
        .filter_map(|(kind, severity, description, pattern)| {
            compile(pattern).map(|pattern| ContentRule {
                kind: *kind,
                severity: *severity,
                description,
                pattern,
            })
        })
        .collect()
});

pub static EMERGENCY_PATTERNS: LazyLock<Vec<EmergencyRule>> = LazyLock::new(|| {
    EMERGENCY_RULES
        .iter()
        .filter_map(|(name, pattern)| {
            compile(pattern).map(|pattern| EmergencyRule { name, pattern })
        })
        .collect()
});

/// Scan only profanity and inappropriate-content rules.
pub fn is_conduct_rule(kind: ViolationKind) -> bool {
    matches!(kind, ViolationKind::Profanity | ViolationKind::Inappropriate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(CONTENT_PATTERNS.len(), CONTENT_RULES.len());
        assert_eq!(EMERGENCY_PATTERNS.len(), EMERGENCY_RULES.len());
    }

    #[test]
    fn emergency_rule_matches_case_insensitively() {
        let rule = EMERGENCY_PATTERNS
            .iter()
            .find(|r| r.name == "breathing_difficulty")
            .unwrap();
        assert!(rule.pattern.is_match("Saya SESAK NAPAS"));
    }
}
