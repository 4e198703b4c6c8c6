//! Conversation state and message log domain types.
//!
//! One [`ConversationState`] evolves per patient dialogue; every inbound and
//! outbound text appends a [`ConversationMessage`] to its log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The state-machine node a conversation is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationContext {
    Verification,
    ReminderConfirmation,
    GeneralInquiry,
    Emergency,
}

impl ConversationContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::ReminderConfirmation => "reminder_confirmation",
            Self::GeneralInquiry => "general_inquiry",
            Self::Emergency => "emergency",
        }
    }

    /// The response shape the patient is expected to send in this context.
    pub fn expected_response_type(&self) -> ExpectedResponseType {
        match self {
            Self::Verification => ExpectedResponseType::YesNo,
            Self::ReminderConfirmation => ExpectedResponseType::Confirmation,
            Self::GeneralInquiry | Self::Emergency => ExpectedResponseType::Text,
        }
    }
}

impl fmt::Display for ConversationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verification" => Ok(Self::Verification),
            "reminder_confirmation" => Ok(Self::ReminderConfirmation),
            "general_inquiry" => Ok(Self::GeneralInquiry),
            "emergency" => Ok(Self::Emergency),
            other => Err(format!("unknown conversation context: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedResponseType {
    YesNo,
    Confirmation,
    Text,
    Number,
}

impl ExpectedResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YesNo => "yes_no",
            Self::Confirmation => "confirmation",
            Self::Text => "text",
            Self::Number => "number",
        }
    }
}

impl FromStr for ExpectedResponseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yes_no" => Ok(Self::YesNo),
            "confirmation" => Ok(Self::Confirmation),
            "text" => Ok(Self::Text),
            "number" => Ok(Self::Number),
            other => Err(format!("unknown response type: {other}")),
        }
    }
}

/// Context-specific scratch data carried by a conversation state.
///
/// Known payloads are typed; `Other` keeps rows written by newer versions
/// readable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateData {
    #[default]
    Empty,
    Verification {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        triggered_by_message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sent_at: Option<DateTime<Utc>>,
    },
    Reminder {
        reminder_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scheduled_for: Option<DateTime<Utc>>,
    },
    Other {
        #[serde(default)]
        values: serde_json::Map<String, serde_json::Value>,
    },
}

impl StateData {
    /// Encode for storage.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"kind":"empty"}"#.into())
    }

    /// Decode from storage. Untagged legacy maps land in `Other`.
    pub fn from_json(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::Empty;
        }
        match serde_json::from_str::<StateData>(raw) {
            Ok(data) => data,
            Err(_) => match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(serde_json::Value::Object(values)) if values.is_empty() => Self::Empty,
                Ok(serde_json::Value::Object(values)) => Self::Other { values },
                _ => Self::Empty,
            },
        }
    }
}

/// One evolving record per patient dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: String,
    pub patient_id: String,
    pub phone_number: String,
    pub current_context: ConversationContext,
    pub expected_response_type: ExpectedResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity_type: Option<String>,
    #[serde(default)]
    pub state_data: StateData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: u32,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_set_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_clarification_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    /// A state is logically alive only while it is active and not expired.
    pub fn is_alive_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive_at(Utc::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl FromStr for MessageDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            other => Err(format!("unknown message direction: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Verification,
    Reminder,
    Confirmation,
    General,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::Reminder => "reminder",
            Self::Confirmation => "confirmation",
            Self::General => "general",
        }
    }

    /// The log category for messages exchanged in a given context.
    pub fn for_context(context: ConversationContext) -> Self {
        match context {
            ConversationContext::Verification => Self::Verification,
            ConversationContext::ReminderConfirmation => Self::Confirmation,
            ConversationContext::GeneralInquiry | ConversationContext::Emergency => Self::General,
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verification" => Ok(Self::Verification),
            "reminder" => Ok(Self::Reminder),
            "confirmation" => Ok(Self::Confirmation),
            "general" => Ok(Self::General),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// Metadata describing how an outbound reply was generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub model: String,
    pub tokens_used: u32,
    pub cost_usd: f64,
    pub response_time_ms: u64,
}

/// Append-only log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub conversation_state_id: String,
    pub message: String,
    pub direction: MessageDirection,
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    /// 0–100 on the stored record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationMetadata>,
    pub created_at: DateTime<Utc>,
}

/// A message to append; ids and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub message: String,
    pub direction: MessageDirection,
    pub message_type: MessageType,
    pub intent: Option<String>,
    pub confidence: Option<u8>,
    pub processed_at: Option<DateTime<Utc>>,
    pub generation: Option<GenerationMetadata>,
}

impl NewMessage {
    pub fn inbound(message: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            message: message.into(),
            direction: MessageDirection::Inbound,
            message_type,
            intent: None,
            confidence: None,
            processed_at: None,
            generation: None,
        }
    }

    pub fn outbound(message: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            direction: MessageDirection::Outbound,
            ..Self::inbound(message, message_type)
        }
    }

    /// Attach a classified intent; `confidence` uses the live 0.0–1.0 scale.
    pub fn with_intent(mut self, intent: impl Into<String>, confidence: f32) -> Self {
        self.intent = Some(intent.into());
        self.confidence = Some(confidence_to_percent(confidence));
        self.processed_at = Some(Utc::now());
        self
    }

    pub fn with_generation(mut self, generation: GenerationMetadata) -> Self {
        self.generation = Some(generation);
        self
    }
}

/// Convert a 0.0–1.0 pipeline confidence into the stored 0–100 scale.
pub fn confidence_to_percent(confidence: f32) -> u8 {
    (confidence.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Partial update applied by `ConversationStore::update`. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub current_context: Option<ConversationContext>,
    pub expected_response_type: Option<ExpectedResponseType>,
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>,
    pub state_data: Option<StateData>,
    pub is_active: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
    pub attempt_count: Option<u32>,
    pub last_clarification_sent_at: Option<DateTime<Utc>>,
}

/// Arguments for `ConversationStore::switch_context`.
#[derive(Debug, Clone)]
pub struct ContextSwitch {
    pub context: ConversationContext,
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>,
    pub state_data: Option<StateData>,
}

impl ContextSwitch {
    pub fn to(context: ConversationContext) -> Self {
        Self {
            context,
            related_entity_id: None,
            related_entity_type: None,
            state_data: None,
        }
    }

    pub fn related(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.related_entity_type = Some(entity_type.into());
        self.related_entity_id = Some(entity_id.into());
        self
    }

    pub fn with_data(mut self, data: StateData) -> Self {
        self.state_data = Some(data);
        self
    }
}

/// Aggregate counts for one patient.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub total_conversations: u64,
    pub active_conversations: u64,
    pub average_message_count: f64,
    pub by_context: std::collections::BTreeMap<String, u64>,
}
