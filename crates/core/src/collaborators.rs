//! External collaborators the orchestration engine talks to.
//!
//! The engine only produces calls against these traits: it never drains the
//! retry queue, delivers notifications, or owns patient records. The small
//! implementations at the bottom cover tests and single-process deployments.

use crate::conversation::{ConversationContext, MessageType};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};

// ── Retry queue ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

/// A patient-authored message handed to the redelivery queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub patient_id: String,
    pub phone_number: String,
    pub message: String,
    pub priority: Priority,
    pub message_type: MessageType,
    pub max_retries: u32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl QueuedMessage {
    /// The `reason` recorded when the message was queued, if any.
    pub fn reason(&self) -> Option<&str> {
        self.metadata.get("reason").and_then(|v| v.as_str())
    }
}

#[async_trait]
pub trait RetryQueue: Send + Sync {
    async fn enqueue(&self, message: QueuedMessage) -> Result<(), CollaboratorError>;
}

// ── Human notification ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub patient_id: String,
    pub message: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ConversationContext>,
    pub priority: Priority,
    /// Violation descriptions or emergency indicators behind the escalation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError>;
}

// ── Patient context lookup ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Declined,
    Unsubscribed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientProfile {
    pub name: String,
    pub verification_status: VerificationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveReminder {
    pub id: String,
    pub medication_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientContext {
    pub patient_id: String,
    pub patient: PatientProfile,
    #[serde(default)]
    pub active_reminders: Vec<ActiveReminder>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientLookup {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<PatientContext>,
}

impl PatientLookup {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn found(context: PatientContext) -> Self {
        Self {
            found: true,
            context: Some(context),
        }
    }
}

/// Read-only lookup used to enrich prompts and template variables.
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    async fn get_patient_context(&self, phone_number: &str)
    -> Result<PatientLookup, CollaboratorError>;
}

// ── Outbound transport ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub delivered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[async_trait]
pub trait OutboundTransport: Send + Sync {
    async fn send(&self, phone_number: &str, text: &str)
    -> Result<DeliveryResult, CollaboratorError>;
}

// ── Bundled implementations ─────────────────────────────────────────────

/// Retry queue that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRetryQueue {
    items: Mutex<Vec<QueuedMessage>>,
}

impl InMemoryRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the queued items, oldest first.
    pub fn snapshot(&self) -> Vec<QueuedMessage> {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Remove and return everything queued so far.
    pub fn drain(&self) -> Vec<QueuedMessage> {
        std::mem::take(&mut *self.items.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl RetryQueue for InMemoryRetryQueue {
    async fn enqueue(&self, message: QueuedMessage) -> Result<(), CollaboratorError> {
        info!(
            patient_id = %message.patient_id,
            priority = message.priority.as_str(),
            reason = message.reason().unwrap_or("unspecified"),
            "Message queued for redelivery"
        );
        self.items.lock().unwrap_or_else(|e| e.into_inner()).push(message);
        Ok(())
    }
}

/// Notifier that only writes a structured log line.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError> {
        warn!(
            patient_id = %notification.patient_id,
            reason = %notification.reason,
            priority = notification.priority.as_str(),
            intent = notification.intent.as_deref().unwrap_or("-"),
            details = ?notification.details,
            "Escalation to human responder"
        );
        Ok(())
    }
}

/// Fixed patient directory, keyed by phone number.
#[derive(Debug, Default)]
pub struct StaticPatientDirectory {
    patients: Vec<(String, PatientContext)>,
}

impl StaticPatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_patient(mut self, phone_number: impl Into<String>, context: PatientContext) -> Self {
        self.patients.push((phone_number.into(), context));
        self
    }
}

#[async_trait]
impl PatientDirectory for StaticPatientDirectory {
    async fn get_patient_context(
        &self,
        phone_number: &str,
    ) -> Result<PatientLookup, CollaboratorError> {
        Ok(self
            .patients
            .iter()
            .find(|(phone, _)| phone == phone_number)
            .map(|(_, ctx)| PatientLookup::found(ctx.clone()))
            .unwrap_or_else(PatientLookup::not_found))
    }
}

/// Transport that logs the rendered text instead of sending it.
#[derive(Debug, Default)]
pub struct LoggingTransport;

#[async_trait]
impl OutboundTransport for LoggingTransport {
    async fn send(
        &self,
        phone_number: &str,
        text: &str,
    ) -> Result<DeliveryResult, CollaboratorError> {
        info!(phone_number, chars = text.chars().count(), "Outbound message");
        Ok(DeliveryResult {
            delivered: true,
            message_id: None,
            sent_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(reason: &str) -> QueuedMessage {
        let mut metadata = serde_json::Map::new();
        metadata.insert("reason".into(), serde_json::json!(reason));
        QueuedMessage {
            patient_id: "p-1".into(),
            phone_number: "081234567890".into(),
            message: "halo".into(),
            priority: Priority::Normal,
            message_type: MessageType::General,
            max_retries: 3,
            metadata,
        }
    }

    #[tokio::test]
    async fn in_memory_queue_collects_and_drains() {
        let queue = InMemoryRetryQueue::new();
        queue.enqueue(queued("usage limits exceeded")).await.unwrap();
        queue.enqueue(queued("provider unavailable")).await.unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.snapshot()[0].reason(), Some("usage limits exceeded"));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn static_directory_lookup() {
        let directory = StaticPatientDirectory::new().with_patient(
            "081234567890",
            PatientContext {
                patient_id: "p-1".into(),
                patient: PatientProfile {
                    name: "Budi".into(),
                    verification_status: VerificationStatus::Verified,
                },
                active_reminders: vec![],
            },
        );
        let hit = directory.get_patient_context("081234567890").await.unwrap();
        assert!(hit.found);
        assert_eq!(hit.context.unwrap().patient.name, "Budi");

        let miss = directory.get_patient_context("0899").await.unwrap();
        assert!(!miss.found);
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::Normal > Priority::Low);
    }
}
