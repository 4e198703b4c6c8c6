//! Deterministic keyword scorer used when the provider cannot classify.

use super::entities::extract_entities;
use super::fuzzy::is_fuzzy_match;
use super::keywords::{INTENT_KEYWORDS, NEGATIVE_WORDS, POSITIVE_WORDS, Weighted, contains_phrase};
use careline_core::{Intent, IntentResult, Sentiment};
use tracing::debug;

/// Bonus when the whole message is exactly a keyword.
const EXACT_MATCH_BONUS: f32 = 5.0;

/// The scorer must never look more confident than the provider path.
pub const FALLBACK_CONFIDENCE_CAP: f32 = 0.5;

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify normalized text.
    pub fn classify(&self, normalized: &str) -> IntentResult {
        let length = normalized.chars().count();
        if length == 0 {
            return IntentResult::unknown();
        }

        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        let mut best: Option<(Intent, f32)> = None;
        for (intent, keywords) in INTENT_KEYWORDS {
            let score = score_intent(normalized, &tokens, keywords);
            if score > 0.0 && best.is_none_or(|(_, s)| score > s) {
                best = Some((*intent, score));
            }
        }

        let Some((intent, score)) = best else {
            return IntentResult::unknown().with_entities(extract_entities(normalized));
        };

        let confidence = (score / length as f32).min(1.0).min(FALLBACK_CONFIDENCE_CAP);
        debug!(intent = %intent, score, confidence, "Keyword classifier result");

        IntentResult::new(intent, confidence)
            .with_entities(extract_entities(normalized))
            .with_sentiment(sentiment(normalized, intent))
    }
}

fn score_intent(text: &str, tokens: &[&str], keywords: &[Weighted]) -> f32 {
    keywords
        .iter()
        .map(|(phrase, weight)| {
            let mut score = 0.0;
            if text == *phrase {
                score += EXACT_MATCH_BONUS;
            }
            if text.contains(phrase) {
                score += phrase.chars().count() as f32;
            } else if !phrase.contains(' ') && tokens.iter().any(|t| is_fuzzy_match(t, phrase)) {
                score += phrase.chars().count() as f32 / 2.0;
            }
            score * weight
        })
        .sum()
}

/// Tally positive and negative words; ties fall back to the intent's default.
pub fn sentiment(normalized: &str, intent: Intent) -> Sentiment {
    let positive = POSITIVE_WORDS
        .iter()
        .filter(|w| contains_phrase(normalized, w))
        .count();
    let negative = NEGATIVE_WORDS
        .iter()
        .filter(|w| contains_phrase(normalized, w))
        .count();
    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => intent.default_sentiment(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taken_and_missed_are_told_apart() {
        let c = KeywordClassifier::new();
        assert_eq!(c.classify("sudah minum obat").intent, Intent::ConfirmTaken);
        assert_eq!(c.classify("belum minum").intent, Intent::ConfirmMissed);
        assert_eq!(c.classify("nanti setelah makan").intent, Intent::ConfirmLater);
        assert_eq!(c.classify("jadwal obat saya kapan").intent, Intent::ReminderInquiry);
    }

    #[test]
    fn confidence_is_capped() {
        let result = KeywordClassifier::new().classify("sudah");
        assert_eq!(result.intent, Intent::ConfirmTaken);
        assert!((result.confidence - FALLBACK_CONFIDENCE_CAP).abs() < f32::EPSILON);
    }

    #[test]
    fn long_message_dilutes_confidence() {
        let result = KeywordClassifier::new()
            .classify("kemarin saya ke pasar lalu bertemu teman lama dan kami mengobrol soal jadwal");
        assert_eq!(result.intent, Intent::ReminderInquiry);
        assert!(result.confidence < 0.3);
    }

    #[test]
    fn misspelling_still_scores() {
        let result = KeywordClassifier::new().classify("lupaa");
        assert_eq!(result.intent, Intent::ConfirmMissed);
        assert!(result.confidence > 0.0);
    }

    #[test]
    fn nothing_matches_is_unknown() {
        let result = KeywordClassifier::new().classify("xyz");
        assert_eq!(result.intent, Intent::Unknown);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(KeywordClassifier::new().classify("").intent, Intent::Unknown);
    }

    #[test]
    fn sentiment_tally_and_defaults() {
        assert_eq!(sentiment("terima kasih, sudah", Intent::ConfirmTaken), Sentiment::Positive);
        assert_eq!(sentiment("saya sedih dan takut", Intent::Inquiry), Sentiment::Negative);
        assert_eq!(sentiment("belum", Intent::ConfirmMissed), Sentiment::Negative);
        assert_eq!(sentiment("halo", Intent::Help), Sentiment::Neutral);
    }
}
