//! Provider-backed intent detection: prompt construction and tolerant parsing.

use careline_core::{ChatTurn, ConversationContext, Entities, Intent, IntentResult};
use serde::Deserialize;
use tracing::debug;

/// Intents the provider may choose from in each context.
pub fn allowed_intents(context: ConversationContext) -> &'static [Intent] {
    match context {
        ConversationContext::Verification => &[Intent::Accept, Intent::Decline],
        ConversationContext::ReminderConfirmation => &[
            Intent::ConfirmTaken,
            Intent::ConfirmMissed,
            Intent::ConfirmLater,
            Intent::Help,
            Intent::Unsubscribe,
            Intent::Emergency,
        ],
        ConversationContext::GeneralInquiry | ConversationContext::Emergency => &[
            Intent::Inquiry,
            Intent::ReminderInquiry,
            Intent::ConfirmTaken,
            Intent::ConfirmMissed,
            Intent::ConfirmLater,
            Intent::Help,
            Intent::Unsubscribe,
            Intent::Emergency,
            Intent::Unknown,
        ],
    }
}

pub fn intent_prompt(text: &str, context: ConversationContext) -> Vec<ChatTurn> {
    let intents = allowed_intents(context)
        .iter()
        .map(|i| i.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let system = format!(
        "Anda adalah pengklasifikasi pesan pasien layanan paliatif. Konteks percakapan: {context}. \
         Pilih satu intent dari: {intents}. \
         Balas HANYA dengan JSON: {{\"intent\": \"...\", \"confidence\": 0.0-1.0, \
         \"entities\": {{\"times\": [\"HH:MM\"], \"emergency_level\": \"high\" atau null}}}}"
    );
    vec![ChatTurn::system(system), ChatTurn::user(text)]
}

#[derive(Debug, Deserialize)]
struct RawIntent {
    intent: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    entities: Option<RawEntities>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEntities {
    #[serde(default)]
    times: Vec<String>,
    #[serde(default)]
    emergency_level: Option<String>,
}

/// Parse provider output. Code fences and surrounding prose are tolerated;
/// anything unparseable is `unknown` at 0.0.
pub fn parse_intent_output(raw: &str) -> IntentResult {
    let Some(json) = extract_json_object(raw) else {
        debug!("Intent output carried no JSON object");
        return IntentResult::unknown();
    };
    let parsed: RawIntent = match serde_json::from_str(json) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, "Intent output failed to parse");
            return IntentResult::unknown();
        }
    };
    let Ok(intent) = parsed.intent.parse::<Intent>() else {
        debug!(intent = %parsed.intent, "Provider returned an unknown intent label");
        return IntentResult::unknown();
    };

    // Some models answer on a 0–100 scale.
    let confidence = if parsed.confidence > 1.0 {
        parsed.confidence / 100.0
    } else {
        parsed.confidence
    };
    let entities = parsed.entities.unwrap_or_default();

    IntentResult::new(intent, confidence).with_entities(Entities {
        times: entities.times,
        emergency_level_high: entities
            .emergency_level
            .is_some_and(|l| l.eq_ignore_ascii_case("high")),
    })
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}
