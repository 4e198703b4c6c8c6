//! The message processing pipeline.
//!
//! One call to [`MessageProcessor::process`] handles one inbound patient
//! message end to end: normalize, load state, decide the intent, screen for
//! safety, choose a template or generated reply, persist both sides of the
//! exchange, move the conversation along and escalate when automation is not
//! enough. The patient always gets a reply.

use crate::generation::{GeneratedReply, GenerationService, QueueTarget, ReplyRequest, ReplySource};
use crate::nlu::classifier::sentiment;
use crate::nlu::keywords::{
    CONFIRMATION_KEYWORDS, REMINDER_INQUIRY_KEYWORDS, VERIFICATION_KEYWORDS, contains_any,
};
use crate::nlu::{KeywordClassifier, KeywordSets, Normalizer, extract_entities};
use crate::templates::{TemplateTable, TemplateVars};
use careline_config::{GenerationConfig, LocaleConfig};
use careline_core::{
    ChatTurn, ContextSwitch, ConversationContext, ConversationMessage, ConversationState,
    ConversationStore, Entities, Error, GenerationMetadata, Intent, IntentResult,
    MessageDirection, MessageType, NewMessage, Notifier, OutboundTransport, PatientContext,
    PatientDirectory, PatientLookup, Priority, QueuedMessage, Result, Sentiment, StateData,
    VerificationStatus,
};
use careline_safety::{EscalationService, InboundAnalysis, SafetyContext, SafetyFilter};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Confidence for messages answered directly as a general inquiry.
const DIRECT_INQUIRY_CONFIDENCE: f32 = 0.7;

/// Confidence when the narrow unsubscribe set forces the intent.
const FORCED_UNSUBSCRIBE_CONFIDENCE: f32 = 0.95;

/// Queue reason when the conversation store cannot be reached.
const STORE_UNAVAILABLE_REASON: &str = "conversation store unavailable";

const SYSTEM_PROMPT: &str = "Anda adalah asisten relawan layanan perawatan paliatif yang membantu \
pasien mengingat jadwal minum obat. Jawab dalam Bahasa Indonesia yang sopan, hangat dan singkat \
(paling banyak tiga kalimat). Jangan memberi diagnosis, saran dosis, atau perubahan obat; arahkan \
pertanyaan medis kepada relawan atau tenaga kesehatan.";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Minimum confidence to attempt a generated reply.
    pub confidence_threshold: f32,
    /// Below this confidence a human is notified.
    pub escalation_threshold: f32,
    /// Previous messages included in the generation prompt.
    pub history_turns: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            escalation_threshold: config.escalation_threshold,
            history_turns: config.history_turns,
        }
    }
}

/// How the intent was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionPath {
    /// Verification context: accept keywords or decline.
    Verification,
    /// Forced by the narrow unsubscribe set.
    Unsubscribe,
    /// Inbound safety analysis found an emergency.
    Emergency,
    /// Provider-backed classification.
    Provider,
    /// Deterministic keyword scorer.
    Keyword,
    /// No classification; answered as a general inquiry.
    Direct,
}

/// What happened to one inbound message.
#[derive(Debug, Clone)]
pub struct ProcessingOutcome {
    pub state_id: String,
    pub patient_id: String,
    pub reply: String,
    pub intent: Intent,
    pub confidence: f32,
    pub entities: Entities,
    pub sentiment: Sentiment,
    pub path: DetectionPath,
    /// The reply text came from the provider or the response cache.
    pub used_generation: bool,
    pub reply_source: Option<ReplySource>,
    pub escalated: bool,
    pub safety: InboundAnalysis,
    pub generation: Option<GenerationMetadata>,
    /// Context after any transition this message caused.
    pub context: ConversationContext,
}

pub struct MessageProcessor {
    store: Arc<dyn ConversationStore>,
    generation: Arc<GenerationService>,
    directory: Arc<dyn PatientDirectory>,
    escalation: EscalationService,
    transport: Option<Arc<dyn OutboundTransport>>,
    safety: SafetyFilter,
    normalizer: Normalizer,
    keywords: KeywordSets,
    classifier: KeywordClassifier,
    templates: TemplateTable,
    settings: PipelineSettings,
}

impl MessageProcessor {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        generation: Arc<GenerationService>,
        directory: Arc<dyn PatientDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let locale = LocaleConfig::default();
        Self {
            store,
            generation,
            directory,
            escalation: EscalationService::new(notifier),
            transport: None,
            safety: SafetyFilter::new(),
            normalizer: Normalizer::from_locale(&locale),
            keywords: KeywordSets::from_locale(&locale),
            classifier: KeywordClassifier::new(),
            templates: TemplateTable::new(),
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_locale(mut self, locale: &LocaleConfig) -> Self {
        self.normalizer = Normalizer::from_locale(locale);
        self.keywords = KeywordSets::from_locale(locale);
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn OutboundTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn generation(&self) -> &Arc<GenerationService> {
        &self.generation
    }

    /// Entry point for the queue worker: same path as a live message.
    pub async fn redeliver(&self, queued: QueuedMessage) -> Result<ProcessingOutcome> {
        info!(
            patient_id = %queued.patient_id,
            reason = queued.reason().unwrap_or("-"),
            "Redelivering queued message"
        );
        self.process(&queued.phone_number, &queued.message).await
    }

    /// Send the verification prompt and move the conversation into the
    /// verification context, recording which message asked.
    pub async fn start_verification(&self, phone_number: &str) -> Result<ConversationState> {
        let lookup = self.lookup(phone_number).await;
        let patient = lookup.context.as_ref();
        let patient_id = self.resolve_patient_id(phone_number, patient).await;

        let state = self
            .store
            .get_or_create(&patient_id, phone_number, ConversationContext::Verification)
            .await?;

        let prompt = self
            .templates
            .verification_prompt(&TemplateVars::from_patient(patient));
        let sent = match self
            .store
            .append_message(&state.id, NewMessage::outbound(&prompt, MessageType::Verification))
            .await
        {
            Ok(message) => Some(message),
            Err(e) => {
                error!(state_id = %state.id, error = %e, "Failed to persist verification prompt");
                None
            }
        };
        let data = StateData::Verification {
            sent_at: Some(sent.as_ref().map_or_else(Utc::now, |m| m.created_at)),
            triggered_by_message_id: sent.map(|m| m.id),
        };
        let state = self
            .store
            .switch_context(
                &state.id,
                ContextSwitch::to(ConversationContext::Verification).with_data(data),
            )
            .await?;

        self.deliver(&state.id, phone_number, &prompt).await;
        info!(state_id = %state.id, patient_id = %patient_id, "Verification prompt sent");
        Ok(state)
    }

    /// Process one inbound message.
    ///
    /// Only a failure to load or create the conversation state is returned as
    /// an error, after the message has been queued for redelivery.
    pub async fn process(&self, phone_number: &str, text: &str) -> Result<ProcessingOutcome> {
        let normalized = self.normalizer.normalize(text);

        let lookup = self.lookup(phone_number).await;
        let patient = lookup.context.as_ref();
        let verification = patient.map(|p| p.patient.verification_status);
        let patient_id = self.resolve_patient_id(phone_number, patient).await;

        let default_context = match verification {
            Some(VerificationStatus::Pending) => ConversationContext::Verification,
            _ => ConversationContext::GeneralInquiry,
        };

        let mut state = match self
            .store
            .get_or_create(&patient_id, phone_number, default_context)
            .await
        {
            Ok(state) => state,
            Err(e) => {
                error!(patient_id = %patient_id, error = %e, "Conversation state unavailable");
                let target = QueueTarget {
                    patient_id: patient_id.clone(),
                    phone_number: phone_number.to_string(),
                    message: text.to_string(),
                    message_type: MessageType::General,
                    priority: Priority::Normal,
                    intent: None,
                    context: None,
                };
                self.generation.enqueue(&target, STORE_UNAVAILABLE_REASON).await;
                return Err(Error::Store(e));
            }
        };

        if verification == Some(VerificationStatus::Verified)
            && state.current_context == ConversationContext::Verification
        {
            info!(state_id = %state.id, "Verified patient still in verification, repairing");
            match self
                .store
                .switch_context(&state.id, ContextSwitch::to(ConversationContext::GeneralInquiry))
                .await
            {
                Ok(repaired) => state = repaired,
                Err(e) => warn!(state_id = %state.id, error = %e, "Stale state repair failed"),
            }
        }

        let history = self
            .store
            .history(&state.id, self.settings.history_turns)
            .await
            .unwrap_or_else(|e| {
                warn!(state_id = %state.id, error = %e, "History unavailable");
                Vec::new()
            });

        let context = state.current_context;
        let safety_ctx = SafetyContext::new(&patient_id).in_context(context);
        let analysis = self.safety.analyze_inbound(text, &safety_ctx);

        let (result, path) = self.determine_intent(text, &normalized, context, &analysis).await;
        let safety_ctx = safety_ctx.with_intent(result.intent);
        debug!(
            state_id = %state.id,
            intent = %result.intent,
            confidence = result.confidence,
            path = ?path,
            "Intent decided"
        );

        let message_type = MessageType::for_context(context);
        self.append(
            &state.id,
            NewMessage::inbound(text, message_type).with_intent(result.intent.as_str(), result.confidence),
        )
        .await;

        let vars = TemplateVars::from_patient(patient);
        let template_reply = if result.confidence < self.settings.escalation_threshold {
            self.templates.low_confidence(&vars)
        } else {
            self.templates.render(result.intent, &vars)
        };

        let mut generated: Option<GeneratedReply> = None;
        let reply = if self.templates.entry(result.intent).requires_generative
            && result.confidence >= self.settings.confidence_threshold
        {
            let request = ReplyRequest {
                target: QueueTarget {
                    patient_id: patient_id.clone(),
                    phone_number: phone_number.to_string(),
                    message: text.to_string(),
                    message_type,
                    priority: if analysis.is_emergency {
                        Priority::Urgent
                    } else {
                        Priority::Normal
                    },
                    intent: Some(result.intent),
                    context: Some(context),
                },
                turns: build_turns(text, &state, patient, &result, &history),
                intent: result.intent,
                confidence: result.confidence,
                fingerprint: fingerprint(patient, context),
                fallback: template_reply.clone(),
                safety: safety_ctx.clone(),
            };
            match self.generation.generate_reply(request).await {
                Ok(reply) => {
                    let text = reply.text.clone();
                    generated = Some(reply);
                    text
                }
                Err(e) => {
                    warn!(state_id = %state.id, error = %e, "Generation failed, replying with template");
                    template_reply
                }
            }
        } else {
            template_reply
        };

        let mut outbound = NewMessage::outbound(&reply, message_type)
            .with_intent(result.intent.as_str(), result.confidence);
        if let Some(g) = &generated {
            outbound = outbound.with_generation(g.metadata.clone());
        }
        self.append(&state.id, outbound).await;

        let final_context = self.transition(&state, &result).await;

        let mut escalated = self
            .escalation
            .escalate_inbound(text, &analysis, &safety_ctx)
            .is_some();
        if !escalated && result.intent == Intent::Emergency {
            self.escalation
                .escalate_emergency_intent(text, result.confidence, &safety_ctx);
            escalated = true;
        }
        if let Some(g) = &generated {
            if let Some(flagged) = &g.flagged_text {
                escalated |= self
                    .escalation
                    .escalate_generated(flagged, &g.safety, &safety_ctx)
                    .is_some();
            }
        }
        if !escalated && result.confidence < self.settings.escalation_threshold {
            self.escalation
                .escalate_low_confidence(text, result.confidence, &safety_ctx);
            escalated = true;
        }

        self.deliver(&state.id, phone_number, &reply).await;

        let used_generation = generated
            .as_ref()
            .is_some_and(|g| g.source != ReplySource::Fallback);
        info!(
            state_id = %state.id,
            intent = %result.intent,
            confidence = result.confidence,
            used_generation,
            escalated,
            "Message processed"
        );

        Ok(ProcessingOutcome {
            state_id: state.id.clone(),
            patient_id,
            reply,
            intent: result.intent,
            confidence: result.confidence,
            entities: result.entities,
            sentiment: result.sentiment,
            path,
            used_generation,
            reply_source: generated.as_ref().map(|g| g.source),
            escalated,
            safety: analysis,
            generation: generated.map(|g| g.metadata),
            context: final_context,
        })
    }

    async fn lookup(&self, phone_number: &str) -> PatientLookup {
        match self.directory.get_patient_context(phone_number).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(error = %e, "Patient lookup failed, continuing without context");
                PatientLookup::not_found()
            }
        }
    }

    /// Hand outbound text to the transport, when one is configured.
    async fn deliver(&self, state_id: &str, phone_number: &str, text: &str) {
        let Some(transport) = &self.transport else {
            return;
        };
        match transport.send(phone_number, text).await {
            Ok(delivery) if delivery.delivered => {
                debug!(message_id = delivery.message_id.as_deref().unwrap_or("-"), "Outbound message delivered");
            }
            Ok(_) => warn!(state_id, "Transport did not deliver outbound message"),
            Err(e) => error!(state_id, error = %e, "Outbound delivery failed"),
        }
    }

    async fn resolve_patient_id(&self, phone_number: &str, patient: Option<&PatientContext>) -> String {
        if let Some(p) = patient {
            return p.patient_id.clone();
        }
        match self.store.find_by_phone_number(phone_number).await {
            Ok(Some(state)) => state.patient_id,
            Ok(None) => phone_number.to_string(),
            Err(e) => {
                warn!(error = %e, "Phone lookup failed, keying by phone number");
                phone_number.to_string()
            }
        }
    }

    async fn determine_intent(
        &self,
        text: &str,
        normalized: &str,
        context: ConversationContext,
        analysis: &InboundAnalysis,
    ) -> (IntentResult, DetectionPath) {
        let entities = extract_entities(normalized);

        if context == ConversationContext::Verification {
            let intent = if self.keywords.is_accept(normalized) {
                Intent::Accept
            } else {
                Intent::Decline
            };
            return (
                IntentResult::new(intent, 1.0).with_entities(entities),
                DetectionPath::Verification,
            );
        }

        if analysis.is_emergency {
            let entities = Entities {
                emergency_level_high: true,
                ..entities
            };
            return (
                IntentResult::new(Intent::Emergency, 1.0).with_entities(entities),
                DetectionPath::Emergency,
            );
        }

        if self.keywords.mentions_unsubscribe(normalized) {
            match self.generation.detect_intent(text, context).await {
                Ok(r) if r.intent != Intent::Unknown
                    && r.confidence >= self.settings.confidence_threshold =>
                {
                    return (merge_entities(r, entities), DetectionPath::Provider);
                }
                Ok(r) => debug!(intent = %r.intent, confidence = r.confidence, "Unsubscribe classification inconclusive"),
                Err(e) => debug!(error = %e, "Unsubscribe classification skipped"),
            }
            if self.keywords.is_unsubscribe(normalized) {
                return (
                    IntentResult::new(Intent::Unsubscribe, FORCED_UNSUBSCRIBE_CONFIDENCE)
                        .with_entities(entities),
                    DetectionPath::Unsubscribe,
                );
            }
        }

        if should_use_intent_detection(context, normalized) {
            match self.generation.detect_intent(text, context).await {
                Ok(r) if r.intent != Intent::Unknown => {
                    return (merge_entities(r, entities), DetectionPath::Provider);
                }
                Ok(_) => debug!("Provider classification inconclusive, using keywords"),
                Err(e) => warn!(error = %e, "Intent detection failed, using keywords"),
            }
            return (self.classifier.classify(normalized), DetectionPath::Keyword);
        }

        (
            IntentResult::new(Intent::Inquiry, DIRECT_INQUIRY_CONFIDENCE)
                .with_entities(entities)
                .with_sentiment(sentiment(normalized, Intent::Inquiry)),
            DetectionPath::Direct,
        )
    }

    /// Move the conversation along after the reply. Returns the resulting context.
    async fn transition(&self, state: &ConversationState, result: &IntentResult) -> ConversationContext {
        use ConversationContext::*;

        let target = match (state.current_context, result.intent) {
            (_, Intent::Unsubscribe) => {
                if let Err(e) = self.store.deactivate(&state.id).await {
                    warn!(state_id = %state.id, error = %e, "Deactivate after unsubscribe failed");
                }
                return state.current_context;
            }
            (Verification, Intent::Accept | Intent::Decline) => Some(GeneralInquiry),
            (
                ReminderConfirmation,
                Intent::ConfirmTaken | Intent::ConfirmMissed | Intent::ConfirmLater,
            ) => Some(GeneralInquiry),
            _ => None,
        };

        if result.intent == Intent::Unknown || result.confidence < self.settings.escalation_threshold {
            if let Err(e) = self.store.record_clarification(&state.id).await {
                warn!(state_id = %state.id, error = %e, "Clarification bookkeeping failed");
            }
        }

        let Some(next) = target else {
            return state.current_context;
        };
        match self.store.switch_context(&state.id, ContextSwitch::to(next)).await {
            Ok(updated) => {
                debug!(state_id = %state.id, from = %state.current_context, to = %next, "Context switched");
                updated.current_context
            }
            Err(e) => {
                warn!(state_id = %state.id, error = %e, "Context switch failed");
                state.current_context
            }
        }
    }

    async fn append(&self, state_id: &str, message: NewMessage) {
        if let Err(e) = self.store.append_message(state_id, message).await {
            error!(state_id, error = %e, "Failed to persist message");
        }
    }
}

/// Whether the provider classifier is worth calling for this message.
pub fn should_use_intent_detection(context: ConversationContext, normalized: &str) -> bool {
    matches!(
        context,
        ConversationContext::Verification | ConversationContext::ReminderConfirmation
    ) || contains_any(normalized, CONFIRMATION_KEYWORDS)
        || contains_any(normalized, VERIFICATION_KEYWORDS)
        || contains_any(normalized, REMINDER_INQUIRY_KEYWORDS)
}

fn merge_entities(mut result: IntentResult, local: Entities) -> IntentResult {
    if result.entities.times.is_empty() {
        result.entities.times = local.times;
    }
    result.entities.emergency_level_high |= local.emergency_level_high;
    result
}

fn fingerprint(patient: Option<&PatientContext>, context: ConversationContext) -> String {
    let Some(p) = patient else {
        return format!("anonymous|{context}");
    };
    let mut medications: Vec<&str> = p
        .active_reminders
        .iter()
        .map(|r| r.medication_name.as_str())
        .collect();
    medications.sort_unstable();
    format!("{}|{context}|{}", p.patient.name, medications.join(","))
}

fn build_turns(
    text: &str,
    state: &ConversationState,
    patient: Option<&PatientContext>,
    result: &IntentResult,
    history: &[ConversationMessage],
) -> Vec<ChatTurn> {
    let mut system = String::from(SYSTEM_PROMPT);
    if let Some(p) = patient {
        system.push_str(&format!("\nNama pasien: {}.", p.patient.name));
        if !p.active_reminders.is_empty() {
            let reminders = p
                .active_reminders
                .iter()
                .map(|r| match &r.scheduled_time {
                    Some(at) => format!("{} ({at})", r.medication_name),
                    None => r.medication_name.clone(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            system.push_str(&format!("\nPengingat aktif: {reminders}."));
        }
    }
    system.push_str(&format!(
        "\nKonteks percakapan: {}. Maksud pesan pasien: {}.",
        state.current_context, result.intent
    ));

    let mut turns = vec![ChatTurn::system(system)];
    turns.extend(history.iter().map(|m| match m.direction {
        MessageDirection::Inbound => ChatTurn::user(&m.message),
        MessageDirection::Outbound => ChatTurn::assistant(&m.message),
    }));
    turns.push(ChatTurn::user(text));
    turns
}
