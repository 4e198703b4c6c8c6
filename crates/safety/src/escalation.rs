//! Hand-off to a human responder.
//!
//! Notifications are fire-and-forget: delivery runs on its own task and a
//! failure is logged, never returned to the pipeline.

use crate::model::{InboundAnalysis, SafetyContext, SafetyResult, Severity};
use careline_core::{Notification, Notifier, Priority};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct EscalationService {
    notifier: Arc<dyn Notifier>,
}

impl EscalationService {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Spawn delivery of one notification.
    pub fn escalate(&self, notification: Notification) -> JoinHandle<()> {
        let notifier = Arc::clone(&self.notifier);
        info!(
            patient_id = %notification.patient_id,
            reason = %notification.reason,
            priority = notification.priority.as_str(),
            "Escalating to human responder"
        );
        tokio::spawn(async move {
            let patient_id = notification.patient_id.clone();
            if let Err(e) = notifier.notify(notification).await {
                error!(patient_id = %patient_id, error = %e, "Escalation notification failed");
            }
        })
    }

    /// Escalate a generated reply that tripped a high or critical rule.
    pub fn escalate_generated(
        &self,
        text: &str,
        result: &SafetyResult,
        ctx: &SafetyContext,
    ) -> Option<JoinHandle<()>> {
        if !result.escalation_required {
            return None;
        }
        let critical = result.violations.iter().any(|v| v.severity == Severity::Critical);
        Some(self.escalate(Notification {
            patient_id: ctx.patient_id.clone(),
            message: text.to_string(),
            reason: "unsafe generated reply".to_string(),
            intent: ctx.intent.map(|i| i.as_str().to_string()),
            context: ctx.conversation_context,
            priority: if critical { Priority::Urgent } else { Priority::High },
            details: result.violations.iter().map(|v| v.summary()).collect(),
        }))
    }

    /// Escalate an inbound message that signals an emergency or a serious violation.
    pub fn escalate_inbound(
        &self,
        text: &str,
        analysis: &InboundAnalysis,
        ctx: &SafetyContext,
    ) -> Option<JoinHandle<()>> {
        if !analysis.escalation_required {
            return None;
        }
        let (reason, priority) = if analysis.is_emergency {
            ("emergency detected", Priority::Urgent)
        } else {
            ("safety violation in patient message", Priority::High)
        };
        let mut details: Vec<String> = analysis
            .indicators
            .iter()
            .map(|i| format!("indicator: {i}"))
            .collect();
        details.extend(analysis.violations.iter().map(|v| v.summary()));

        Some(self.escalate(Notification {
            patient_id: ctx.patient_id.clone(),
            message: text.to_string(),
            reason: reason.to_string(),
            intent: ctx.intent.map(|i| i.as_str().to_string()),
            context: ctx.conversation_context,
            priority,
            details,
        }))
    }

    /// Escalate a message classified as an emergency that the inbound
    /// patterns did not catch.
    pub fn escalate_emergency_intent(
        &self,
        text: &str,
        confidence: f32,
        ctx: &SafetyContext,
    ) -> JoinHandle<()> {
        self.escalate(Notification {
            patient_id: ctx.patient_id.clone(),
            message: text.to_string(),
            reason: "emergency intent".to_string(),
            intent: ctx.intent.map(|i| i.as_str().to_string()),
            context: ctx.conversation_context,
            priority: Priority::Urgent,
            details: vec![format!("confidence: {confidence:.2}")],
        })
    }

    /// Escalate a message the pipeline could not classify with confidence.
    pub fn escalate_low_confidence(
        &self,
        text: &str,
        confidence: f32,
        ctx: &SafetyContext,
    ) -> JoinHandle<()> {
        self.escalate(Notification {
            patient_id: ctx.patient_id.clone(),
            message: text.to_string(),
            reason: "low confidence".to_string(),
            intent: ctx.intent.map(|i| i.as_str().to_string()),
            context: ctx.conversation_context,
            priority: Priority::Normal,
            details: vec![format!("confidence: {confidence:.2}")],
        })
    }
}
