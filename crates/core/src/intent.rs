//! The closed set of patient intents and the classification result.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The classified purpose of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Accept,
    Decline,
    ConfirmTaken,
    ConfirmMissed,
    ConfirmLater,
    Help,
    Inquiry,
    ReminderInquiry,
    Unsubscribe,
    Emergency,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 11] = [
        Intent::Accept,
        Intent::Decline,
        Intent::ConfirmTaken,
        Intent::ConfirmMissed,
        Intent::ConfirmLater,
        Intent::Help,
        Intent::Inquiry,
        Intent::ReminderInquiry,
        Intent::Unsubscribe,
        Intent::Emergency,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Decline => "decline",
            Self::ConfirmTaken => "confirm_taken",
            Self::ConfirmMissed => "confirm_missed",
            Self::ConfirmLater => "confirm_later",
            Self::Help => "help",
            Self::Inquiry => "inquiry",
            Self::ReminderInquiry => "reminder_inquiry",
            Self::Unsubscribe => "unsubscribe",
            Self::Emergency => "emergency",
            Self::Unknown => "unknown",
        }
    }

    /// Sentiment assumed when the message itself carries no signal.
    pub fn default_sentiment(&self) -> Sentiment {
        match self {
            Self::Accept | Self::ConfirmTaken => Sentiment::Positive,
            Self::Decline | Self::ConfirmMissed | Self::Unsubscribe => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Intent::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == normalized)
            .ok_or_else(|| format!("unknown intent: {s}"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

/// Entities pulled out of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    /// `HH:MM` time tokens, in order of appearance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub times: Vec<String>,
    /// `true` when any emergency keyword is present (emergency_level=high)
    #[serde(default)]
    pub emergency_level_high: bool,
}

/// Output of any classification path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: Intent,
    /// 0.0–1.0
    pub confidence: f32,
    #[serde(default)]
    pub entities: Entities,
    #[serde(default)]
    pub sentiment: Sentiment,
}

impl IntentResult {
    pub fn new(intent: Intent, confidence: f32) -> Self {
        Self {
            intent,
            confidence: confidence.clamp(0.0, 1.0),
            entities: Entities::default(),
            sentiment: intent.default_sentiment(),
        }
    }

    /// What malformed provider output degrades to.
    pub fn unknown() -> Self {
        Self::new(Intent::Unknown, 0.0)
    }

    pub fn with_entities(mut self, entities: Entities) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_sentiment(mut self, sentiment: Sentiment) -> Self {
        self.sentiment = sentiment;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip_for_every_intent() {
        for intent in Intent::ALL {
            assert_eq!(intent.as_str().parse::<Intent>().unwrap(), intent);
        }
        assert_eq!(" CONFIRM_TAKEN ".parse::<Intent>().unwrap(), Intent::ConfirmTaken);
        assert!("chitchat".parse::<Intent>().is_err());
    }

    #[test]
    fn default_sentiments() {
        assert_eq!(Intent::Accept.default_sentiment(), Sentiment::Positive);
        assert_eq!(Intent::ConfirmMissed.default_sentiment(), Sentiment::Negative);
        assert_eq!(Intent::Inquiry.default_sentiment(), Sentiment::Neutral);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(IntentResult::new(Intent::Help, 3.0).confidence, 1.0);
        let unknown = IntentResult::unknown();
        assert_eq!(unknown.intent, Intent::Unknown);
        assert_eq!(unknown.confidence, 0.0);
    }
}
