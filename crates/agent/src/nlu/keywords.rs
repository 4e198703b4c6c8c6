//! Keyword tables for the deterministic paths.
//!
//! Everything here is matched against normalized text (lowercase, abbreviations
//! expanded). The locale-dependent sets live in [`KeywordSets`]; the
//! classifier tables are fixed.

use careline_config::LocaleConfig;
use careline_core::Intent;

/// A keyword or phrase and its weight in the fallback scorer.
pub type Weighted = (&'static str, f32);

/// Candidate intents for the fallback scorer, in tie-break order.
pub const INTENT_KEYWORDS: &[(Intent, &[Weighted])] = &[
    (
        Intent::ConfirmTaken,
        &[
            ("sudah minum", 2.0),
            ("sudah diminum", 2.0),
            ("sudah saya minum", 2.0),
            ("barusan minum", 1.5),
            ("sudah", 1.0),
            ("selesai", 1.0),
            ("beres", 1.0),
            ("done", 0.8),
        ],
    ),
    (
        Intent::ConfirmMissed,
        &[
            ("belum minum", 2.0),
            ("tidak minum", 2.0),
            ("lupa minum", 2.0),
            ("terlewat", 1.5),
            ("lupa", 1.5),
            ("belum", 1.0),
            ("habis", 1.0),
        ],
    ),
    (
        Intent::ConfirmLater,
        &[
            ("nanti", 1.5),
            ("sebentar lagi", 1.5),
            ("setelah makan", 1.5),
            ("tunggu", 1.0),
            ("sebentar", 1.0),
            ("ingatkan lagi", 1.5),
        ],
    ),
    (
        Intent::Help,
        &[
            ("bantuan", 1.5),
            ("tolong", 1.5),
            ("bantu", 1.5),
            ("bingung", 1.0),
            ("tidak mengerti", 1.0),
            ("help", 1.0),
        ],
    ),
    (
        Intent::ReminderInquiry,
        &[
            ("jadwal", 2.0),
            ("pengingat", 1.5),
            ("jam berapa", 1.5),
            ("kapan minum", 2.0),
            ("obat apa", 1.5),
            ("dosis", 1.0),
        ],
    ),
    (
        Intent::Unsubscribe,
        &[
            ("berhenti kirim", 2.0),
            ("berhenti berlangganan", 2.0),
            ("stop kirim", 2.0),
            ("unsubscribe", 2.0),
            ("jangan kirim", 2.0),
        ],
    ),
    (
        Intent::Emergency,
        &[
            ("darurat", 2.0),
            ("sesak", 2.0),
            ("pingsan", 2.0),
            ("kejang", 2.0),
            ("nyeri dada", 2.0),
            ("gawat", 1.5),
        ],
    ),
    (
        Intent::Inquiry,
        &[
            ("apa", 0.5),
            ("bagaimana", 1.0),
            ("kenapa", 1.0),
            ("mengapa", 1.0),
            ("boleh", 0.5),
            ("tanya", 1.0),
            ("efek samping", 1.5),
        ],
    ),
];

/// Words that signal a reminder confirmation.
pub const CONFIRMATION_KEYWORDS: &[&str] = &[
    "sudah", "belum", "minum", "diminum", "lupa", "nanti", "terlewat", "selesai",
];

/// Words that signal a reply to a verification prompt.
pub const VERIFICATION_KEYWORDS: &[&str] = &["ya", "iya", "tidak", "setuju", "bersedia", "verifikasi"];

/// Words that signal a question about reminders.
pub const REMINDER_INQUIRY_KEYWORDS: &[&str] = &["jadwal", "pengingat", "jam berapa", "kapan", "obat apa"];

/// Words that set `emergency_level = high` on extracted entities.
pub const EMERGENCY_KEYWORDS: &[&str] = &[
    "darurat", "sesak", "pingsan", "kejang", "nyeri dada", "sakit dada", "pendarahan",
    "tidak sadar", "bunuh diri", "gawat",
];

pub const POSITIVE_WORDS: &[&str] = &[
    "terima kasih", "makasih", "baik", "bagus", "senang", "lega", "membaik", "alhamdulillah",
];

pub const NEGATIVE_WORDS: &[&str] = &[
    "sakit", "sedih", "takut", "khawatir", "parah", "buruk", "capek", "lelah", "kecewa",
];

/// Whole messages that opt out on their own. Inside a longer sentence these
/// words usually mean stopping a medication, not the service.
pub const STANDALONE_UNSUBSCRIBE: &[&str] = &["stop", "berhenti", "unsubscribe"];

/// Tokens that turn an affirmative into a refusal ("tidak mau").
pub const NEGATIONS: &[&str] = &["tidak", "bukan", "jangan", "belum", "no"];

/// Whether `phrase` occurs in `text` on word boundaries.
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    text.match_indices(phrase).any(|(start, _)| {
        let end = start + phrase.len();
        let before_ok = text[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = text[end..].chars().next().is_none_or(|c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}

/// Whether any entry of `set` occurs in `text` on word boundaries.
pub fn contains_any(text: &str, set: &[&str]) -> bool {
    set.iter().any(|k| contains_phrase(text, k))
}

/// Locale-configured keyword sets.
#[derive(Debug, Clone)]
pub struct KeywordSets {
    accept: Vec<String>,
    unsubscribe_broad: Vec<String>,
    unsubscribe_narrow: Vec<String>,
}

impl KeywordSets {
    pub fn from_locale(locale: &LocaleConfig) -> Self {
        let lower = |v: &[String]| v.iter().map(|s| s.trim().to_lowercase()).collect();
        Self {
            accept: lower(&locale.accept_keywords),
            unsubscribe_broad: lower(&locale.unsubscribe_phrases),
            unsubscribe_narrow: lower(&locale.unsubscribe_keywords),
        }
    }

    /// An affirmative reply: some accept keyword present and no negation.
    pub fn is_accept(&self, normalized: &str) -> bool {
        if contains_any(normalized, NEGATIONS) {
            return false;
        }
        self.accept.iter().any(|k| contains_phrase(normalized, k))
    }

    /// Broad set: worth asking the classifier about.
    pub fn mentions_unsubscribe(&self, normalized: &str) -> bool {
        self.unsubscribe_broad.iter().any(|k| contains_phrase(normalized, k))
    }

    /// Narrow set: unambiguous enough to force the intent.
    pub fn is_unsubscribe(&self, normalized: &str) -> bool {
        STANDALONE_UNSUBSCRIBE.iter().any(|w| *w == normalized)
            || self.unsubscribe_narrow.iter().any(|k| contains_phrase(normalized, k))
    }
}

impl Default for KeywordSets {
    fn default() -> Self {
        Self::from_locale(&LocaleConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phrase_matching_respects_word_boundaries() {
        assert!(contains_phrase("saya sudah minum", "sudah"));
        assert!(contains_phrase("sudah minum", "sudah minum"));
        assert!(!contains_phrase("yakin", "ya"));
        assert!(!contains_phrase("stopkontak", "stop"));
        assert!(contains_phrase("ya, saya mau", "ya"));
    }

    #[test]
    fn accept_requires_no_negation() {
        let sets = KeywordSets::default();
        assert!(sets.is_accept("ya"));
        assert!(sets.is_accept("iya saya bersedia"));
        assert!(sets.is_accept("ok"));
        assert!(!sets.is_accept("tidak mau"));
        assert!(!sets.is_accept("bukan saya"));
        assert!(!sets.is_accept("siapa ini"));
    }

    #[test]
    fn unsubscribe_sets() {
        let sets = KeywordSets::default();
        assert!(sets.is_unsubscribe("stop"));
        assert!(sets.is_unsubscribe("tolong hapus nomor saya"));
        assert!(sets.mentions_unsubscribe("sudah cukup"));
        assert!(!sets.is_unsubscribe("sudah cukup"));
        assert!(sets.is_unsubscribe("tolong stop kirim pesan"));
        assert!(sets.mentions_unsubscribe("saya sudah berhenti minum morfin"));
        assert!(!sets.is_unsubscribe("saya sudah berhenti minum morfin"));
        assert!(!sets.is_unsubscribe("stop dulu obatnya"));
    }

    #[test]
    fn every_intent_table_is_non_empty() {
        for (intent, keywords) in INTENT_KEYWORDS {
            assert!(!keywords.is_empty(), "{intent} has no keywords");
            assert!(keywords.iter().all(|(_, w)| *w > 0.0));
        }
    }
}
