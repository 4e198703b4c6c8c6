//! Role-tagged turns sent to a generative provider.
//!
//! A patient message flows in → the pipeline builds a short list of turns
//! (system instructions, recent history, the new message) → the provider
//! generates a reply.

use serde::{Deserialize, Serialize};

/// The role of a turn in a provider conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (persona, rules, output format)
    System,
    /// The patient
    User,
    /// The assistant (previous generated or template replies)
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single role-tagged turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Rough token estimate (4 chars ≈ 1 token), used for admission checks
/// before the provider reports real usage.
pub fn estimate_tokens(turns: &[ChatTurn]) -> u32 {
    turns
        .iter()
        .map(|t| (t.content.chars().count() / 4) as u32)
        .sum()
}
