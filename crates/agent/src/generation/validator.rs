//! Language validation for generated replies.
//!
//! Patients read Indonesian. A reply that drifts into English, or that
//! carries no Indonesian markers at all, is rejected and regenerated with a
//! stricter instruction.

use crate::nlu::keywords::contains_phrase;
use careline_core::ChatTurn;

const DISALLOWED: &[&str] = &[
    "the", "you", "your", "please", "thank you", "thanks", "hello", "sorry", "medicine",
    "doctor", "i am", "we are", "don't", "remember", "take care",
];

const MARKERS: &[&str] = &[
    "anda", "yang", "dan", "untuk", "ini", "kami", "terima kasih", "obat", "sudah", "ya",
    "bapak", "ibu", "silakan", "mohon", "dengan", "tidak", "akan", "minum", "jangan",
    "semoga", "saya", "jika", "ada", "baik",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub passed: bool,
    /// Disallowed tokens found, in table order.
    pub disallowed: Vec<String>,
    pub markers: usize,
}

#[derive(Debug, Clone)]
pub struct LanguageValidator {
    disallowed: Vec<String>,
    markers: Vec<String>,
    min_markers: usize,
}

impl Default for LanguageValidator {
    fn default() -> Self {
        Self::indonesian()
    }
}

impl LanguageValidator {
    pub fn indonesian() -> Self {
        Self {
            disallowed: DISALLOWED.iter().map(|s| s.to_string()).collect(),
            markers: MARKERS.iter().map(|s| s.to_string()).collect(),
            min_markers: 1,
        }
    }

    pub fn with_min_markers(mut self, min: usize) -> Self {
        self.min_markers = min;
        self
    }

    pub fn validate(&self, text: &str) -> ValidationReport {
        let lower = text.to_lowercase();
        let disallowed: Vec<String> = self
            .disallowed
            .iter()
            .filter(|t| contains_phrase(&lower, t))
            .cloned()
            .collect();
        let markers = self
            .markers
            .iter()
            .filter(|m| contains_phrase(&lower, m))
            .count();

        ValidationReport {
            passed: !lower.trim().is_empty() && disallowed.is_empty() && markers >= self.min_markers,
            disallowed,
            markers,
        }
    }

    /// The original turns plus a stricter language instruction.
    pub fn strengthen(&self, turns: &[ChatTurn], report: &ValidationReport) -> Vec<ChatTurn> {
        let mut instruction = String::from(
            "PENTING: Jawab HANYA dalam Bahasa Indonesia yang sopan dan sederhana. Jangan gunakan bahasa Inggris.",
        );
        if !report.disallowed.is_empty() {
            instruction.push_str(" Hindari kata: ");
            instruction.push_str(&report.disallowed.join(", "));
            instruction.push('.');
        }

        let mut out = turns.to_vec();
        out.push(ChatTurn::system(instruction));
        out
    }
}
