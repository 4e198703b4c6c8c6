//! End-to-end tests for the Careline message pipeline.
//!
//! These tests wire the real store, generation service, safety filter and
//! pipeline together with a scripted provider and exercise whole patient
//! exchanges, including provider outages and usage ceilings.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use careline_agent::{
    DetectionPath, GenerationService, MessageProcessor, ReplySource, TemplateTable, TemplateVars,
};
use careline_core::{
    ActiveReminder, CollaboratorError, ContextSwitch, ConversationContext, ConversationStore,
    GenerationRequest, GenerationResponse, InMemoryRetryQueue, Intent, MessageType, NewMessage,
    Notification, Notifier, PatientContext, PatientProfile, Priority, Provider, ProviderError,
    StateData, StateUpdate, StaticPatientDirectory, Usage, VerificationStatus,
};
use careline_store::{InMemoryStore, SqliteStore};
use careline_telemetry::{DenyAllLedger, InMemoryUsageLedger, UsageLedger};

// ── Mocks ────────────────────────────────────────────────────────────────

/// A provider that can be switched between answering and failing.
struct ToggleProvider {
    reply: String,
    up: AtomicBool,
    call_count: std::sync::Mutex<usize>,
}

impl ToggleProvider {
    fn up(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            up: AtomicBool::new(true),
            call_count: std::sync::Mutex::new(0),
        }
    }

    fn down(reply: &str) -> Self {
        let p = Self::up(reply);
        p.up.store(false, Ordering::SeqCst);
        p
    }

    fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for ToggleProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        *self.call_count.lock().unwrap() += 1;
        if !self.up.load(Ordering::SeqCst) {
            return Err(ProviderError::ApiError {
                status_code: 503,
                message: "service unavailable".into(),
            });
        }
        Ok(GenerationResponse {
            content: self.reply.clone(),
            tokens_used: 15,
            model: request.model,
            stop_reason: Some("stop".into()),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<Notification>>,
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────

const GOOD_REPLY: &str = "Terima kasih, Ibu. Efek samping yang umum adalah mengantuk, silakan tanyakan ke relawan kami jika ada keluhan.";

fn patient(id: &str, name: &str, status: VerificationStatus) -> PatientContext {
    PatientContext {
        patient_id: id.into(),
        patient: PatientProfile {
            name: name.into(),
            verification_status: status,
        },
        active_reminders: vec![ActiveReminder {
            id: format!("rem-{id}"),
            medication_name: "Morfin".into(),
            scheduled_time: Some("08:00".into()),
        }],
    }
}

fn directory() -> StaticPatientDirectory {
    StaticPatientDirectory::new()
        .with_patient("081111111111", patient("p-pending-1", "Ibu Sari", VerificationStatus::Pending))
        .with_patient("082222222222", patient("p-pending-2", "Pak Budi", VerificationStatus::Pending))
        .with_patient("083333333333", patient("p-verified", "Ibu Ani", VerificationStatus::Verified))
}

struct Rig {
    processor: MessageProcessor,
    provider: Arc<ToggleProvider>,
    queue: Arc<InMemoryRetryQueue>,
    notifier: Arc<RecordingNotifier>,
    store: Arc<dyn ConversationStore>,
}

fn rig_with(
    store: Arc<dyn ConversationStore>,
    provider: ToggleProvider,
    ledger: Arc<dyn UsageLedger>,
) -> Rig {
    let provider = Arc::new(provider);
    let queue = Arc::new(InMemoryRetryQueue::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let generation = Arc::new(GenerationService::new(provider.clone(), ledger, queue.clone()));
    let processor = MessageProcessor::new(
        store.clone(),
        generation,
        Arc::new(directory()),
        notifier.clone(),
    );
    Rig {
        processor,
        provider,
        queue,
        notifier,
        store,
    }
}

fn rig(provider: ToggleProvider) -> Rig {
    rig_with(
        Arc::new(InMemoryStore::new()),
        provider,
        Arc::new(InMemoryUsageLedger::unlimited()),
    )
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// ── E2E: State store ─────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_sweep_is_idempotent() {
    let store = SqliteStore::new("sqlite::memory:").await.unwrap();
    let state = store
        .get_or_create("p-1", "081234567890", ConversationContext::GeneralInquiry)
        .await
        .unwrap();
    store
        .update(
            &state.id,
            StateUpdate {
                expires_at: Some(chrono::Utc::now() - chrono::Duration::minutes(1)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(store.sweep_expired().await.unwrap(), 1);
    assert_eq!(store.sweep_expired().await.unwrap(), 0);
    assert!(!store.get(&state.id).await.unwrap().is_active);
}

#[tokio::test]
async fn e2e_concurrent_appends_keep_count_consistent() {
    let store: Arc<dyn ConversationStore> =
        Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap());
    let state = store
        .get_or_create("p-1", "081234567890", ConversationContext::GeneralInquiry)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        let id = state.id.clone();
        handles.push(tokio::spawn(async move {
            store
                .append_message(&id, NewMessage::inbound(format!("pesan {i}"), MessageType::General))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let state = store.get(&state.id).await.unwrap();
    let rows = store.history(&state.id, 100).await.unwrap();
    assert_eq!(state.message_count, 20);
    assert_eq!(rows.len(), 20);
}

// ── E2E: Deterministic paths ─────────────────────────────────────────────

#[tokio::test]
async fn e2e_verification_is_deterministic_without_provider() {
    let r = rig(ToggleProvider::up(GOOD_REPLY));

    let accept = r.processor.process("081111111111", "iya saya mau").await.unwrap();
    assert_eq!(accept.intent, Intent::Accept);
    assert_eq!(accept.confidence, 1.0);
    assert_eq!(accept.path, DetectionPath::Verification);

    let decline = r.processor.process("082222222222", "siapa ini?").await.unwrap();
    assert_eq!(decline.intent, Intent::Decline);
    assert_eq!(decline.confidence, 1.0);
    assert_eq!(decline.path, DetectionPath::Verification);
    assert_eq!(r.provider.calls(), 0);
}

#[tokio::test]
async fn e2e_fixed_templates_regardless_of_provider() {
    let templates = TemplateTable::new();
    for up in [true, false] {
        let provider = if up {
            ToggleProvider::up(GOOD_REPLY)
        } else {
            ToggleProvider::down(GOOD_REPLY)
        };
        let r = rig(provider);

        let vars = TemplateVars::from_patient(Some(&patient(
            "p-pending-1",
            "Ibu Sari",
            VerificationStatus::Pending,
        )));
        let accept = r.processor.process("081111111111", "Ya, bersedia").await.unwrap();
        assert_eq!(accept.reply, templates.render(Intent::Accept, &vars));
        assert!(!accept.used_generation);

        let vars = TemplateVars::from_patient(Some(&patient(
            "p-pending-2",
            "Pak Budi",
            VerificationStatus::Pending,
        )));
        let decline = r.processor.process("082222222222", "tidak mau").await.unwrap();
        assert_eq!(decline.intent, Intent::Decline);
        assert_eq!(decline.reply, templates.render(Intent::Decline, &vars));

        let vars = TemplateVars::from_patient(Some(&patient(
            "p-verified",
            "Ibu Ani",
            VerificationStatus::Verified,
        )));
        let unsubscribe = r.processor.process("083333333333", "stop").await.unwrap();
        assert_eq!(unsubscribe.intent, Intent::Unsubscribe);
        assert_eq!(unsubscribe.reply, templates.render(Intent::Unsubscribe, &vars));
        assert!(!unsubscribe.used_generation);
    }
}

// ── E2E: Resilience ──────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_outage_queues_then_redelivery_succeeds() {
    let r = rig(ToggleProvider::down(GOOD_REPLY));

    let during = r
        .processor
        .process("083333333333", "apa efek samping morfin?")
        .await
        .unwrap();
    assert!(!during.used_generation);
    assert_eq!(during.intent, Intent::Inquiry);

    let queued = r.queue.drain();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].reason(), Some("provider unavailable"));
    assert_eq!(queued[0].patient_id, "p-verified");

    r.provider.set_up(true);
    let after = r
        .processor
        .redeliver(queued.into_iter().next().unwrap())
        .await
        .unwrap();
    assert!(after.used_generation);
    assert_eq!(after.reply_source, Some(ReplySource::Provider));
    assert_eq!(after.reply, GOOD_REPLY);
    assert_eq!(after.state_id, during.state_id);
    assert!(r.queue.is_empty());
}

#[tokio::test]
async fn e2e_usage_ceiling_blocks_and_queues() {
    let r = rig_with(
        Arc::new(InMemoryStore::new()),
        ToggleProvider::up(GOOD_REPLY),
        Arc::new(DenyAllLedger),
    );

    let out = r
        .processor
        .process("083333333333", "apa efek samping morfin?")
        .await
        .unwrap();
    assert!(!out.used_generation);
    assert!(!out.reply.is_empty());
    assert_eq!(r.provider.calls(), 0);

    let queued = r.queue.snapshot();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].reason(), Some("usage limits exceeded"));
}

#[tokio::test]
async fn e2e_disallowed_language_falls_back_after_one_retry() {
    let r = rig(ToggleProvider::up(
        "Please take your medicine and remember to drink water.",
    ));

    let out = r
        .processor
        .process("083333333333", "apa efek samping morfin?")
        .await
        .unwrap();
    assert_eq!(r.provider.calls(), 2);
    assert_eq!(out.reply_source, Some(ReplySource::Fallback));
    assert!(!out.used_generation);

    let vars = TemplateVars::from_patient(Some(&patient(
        "p-verified",
        "Ibu Ani",
        VerificationStatus::Verified,
    )));
    assert_eq!(out.reply, TemplateTable::new().render(Intent::Inquiry, &vars));
}

// ── E2E: Identity and safety ─────────────────────────────────────────────

#[tokio::test]
async fn e2e_phone_encodings_share_one_state() {
    let store: Arc<dyn ConversationStore> =
        Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap());
    let r = rig_with(
        store,
        ToggleProvider::up(GOOD_REPLY),
        Arc::new(InMemoryUsageLedger::unlimited()),
    );

    let local = r.processor.process("0812345678901", "halo, apa kabar").await.unwrap();
    let intl = r.processor.process("62812345678901", "halo lagi").await.unwrap();
    assert_eq!(local.state_id, intl.state_id);
    assert_eq!(local.patient_id, intl.patient_id);

    let state = r.store.get(&local.state_id).await.unwrap();
    assert_eq!(state.message_count, 4);
}

#[tokio::test]
async fn e2e_verification_prompt_survives_storage() {
    let store: Arc<dyn ConversationStore> =
        Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap());
    let r = rig_with(
        store.clone(),
        ToggleProvider::up(GOOD_REPLY),
        Arc::new(InMemoryUsageLedger::unlimited()),
    );

    let started = r.processor.start_verification("081111111111").await.unwrap();
    let stored = store.get(&started.id).await.unwrap();
    assert_eq!(stored.current_context, ConversationContext::Verification);

    let history = store.history(&stored.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message_type, MessageType::Verification);
    match stored.state_data {
        StateData::Verification {
            triggered_by_message_id,
            sent_at,
        } => {
            assert_eq!(triggered_by_message_id, Some(history[0].id.clone()));
            assert!(sent_at.is_some());
        }
        other => panic!("unexpected state data: {other:?}"),
    }

    let accept = r.processor.process("081111111111", "Iya").await.unwrap();
    assert_eq!(accept.state_id, stored.id);
    assert_eq!(accept.intent, Intent::Accept);
    assert_eq!(accept.context, ConversationContext::GeneralInquiry);
    assert_eq!(r.provider.calls(), 0);
}

#[tokio::test]
async fn e2e_stopping_medication_keeps_the_subscription() {
    let r = rig(ToggleProvider::down(GOOD_REPLY));

    let out = r
        .processor
        .process("083333333333", "saya sudah berhenti minum morfin karena mual")
        .await
        .unwrap();
    assert_ne!(out.intent, Intent::Unsubscribe);
    assert!(r.store.get(&out.state_id).await.unwrap().is_active);

    let opt_out = r.processor.process("083333333333", "Stop kirim pesan").await.unwrap();
    assert_eq!(opt_out.intent, Intent::Unsubscribe);
    assert!(!r.store.get(&opt_out.state_id).await.unwrap().is_active);
}

#[tokio::test]
async fn e2e_emergency_message_escalates_urgently() {
    let r = rig(ToggleProvider::up(GOOD_REPLY));

    let out = r
        .processor
        .process("083333333333", "saya merasa sangat sesak napas tolong")
        .await
        .unwrap();
    settle().await;

    assert!(out.safety.is_emergency);
    assert_eq!(out.intent, Intent::Emergency);
    assert!(out.escalated);

    let sent = r.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].priority, Priority::Urgent);
    assert_eq!(sent[0].reason, "emergency detected");
    assert_eq!(sent[0].patient_id, "p-verified");
}

#[tokio::test]
async fn e2e_reminder_confirmation_round_trip_on_sqlite() {
    let store: Arc<dyn ConversationStore> =
        Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap());
    let r = rig_with(
        store.clone(),
        ToggleProvider::up(r#"{"intent":"confirm_taken","confidence":0.92}"#),
        Arc::new(InMemoryUsageLedger::unlimited()),
    );

    let state = store
        .get_or_create("p-verified", "083333333333", ConversationContext::GeneralInquiry)
        .await
        .unwrap();
    store
        .switch_context(
            &state.id,
            ContextSwitch::to(ConversationContext::ReminderConfirmation)
                .related("reminder", "rem-p-verified"),
        )
        .await
        .unwrap();

    let out = r.processor.process("083333333333", "udh minum").await.unwrap();
    assert_eq!(out.intent, Intent::ConfirmTaken);
    assert_eq!(out.path, DetectionPath::Provider);
    assert_eq!(out.context, ConversationContext::GeneralInquiry);

    let history = store.history(&state.id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].intent.as_deref(), Some("confirm_taken"));
    assert_eq!(history[0].confidence, Some(92));
}
