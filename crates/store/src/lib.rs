//! Conversation state store implementations for Careline.
//!
//! Both backends share the lifecycle rules below (creation, partial update,
//! context switch) so they cannot drift apart.

pub mod in_memory;
pub mod phone;
pub mod sweeper;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use phone::phone_variants;
pub use sweeper::spawn_expiry_sweeper;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use careline_core::conversation::{
    ContextSwitch, ConversationContext, ConversationState, StateData, StateUpdate,
};
use chrono::{DateTime, Duration, Utc};

/// Build a fresh active state expiring `ttl` after `now`.
pub(crate) fn new_state(
    patient_id: &str,
    phone_number: &str,
    context: ConversationContext,
    ttl: Duration,
    now: DateTime<Utc>,
) -> ConversationState {
    ConversationState {
        id: uuid::Uuid::new_v4().to_string(),
        patient_id: patient_id.to_string(),
        phone_number: phone_number.to_string(),
        current_context: context,
        expected_response_type: context.expected_response_type(),
        related_entity_id: None,
        related_entity_type: None,
        state_data: StateData::Empty,
        last_message: None,
        last_message_at: None,
        message_count: 0,
        is_active: true,
        expires_at: now + ttl,
        attempt_count: 0,
        context_set_at: Some(now),
        last_clarification_sent_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Merge the `Some` fields of `update` into `state` and stamp `updated_at`.
pub(crate) fn apply_update(state: &mut ConversationState, update: StateUpdate, now: DateTime<Utc>) {
    if let Some(context) = update.current_context {
        state.current_context = context;
    }
    if let Some(expected) = update.expected_response_type {
        state.expected_response_type = expected;
    }
    if let Some(id) = update.related_entity_id {
        state.related_entity_id = Some(id);
    }
    if let Some(kind) = update.related_entity_type {
        state.related_entity_type = Some(kind);
    }
    if let Some(data) = update.state_data {
        state.state_data = data;
    }
    if let Some(active) = update.is_active {
        state.is_active = active;
    }
    if let Some(expires_at) = update.expires_at {
        state.expires_at = expires_at;
    }
    if let Some(attempts) = update.attempt_count {
        state.attempt_count = attempts;
    }
    if let Some(at) = update.last_clarification_sent_at {
        state.last_clarification_sent_at = Some(at);
    }
    state.updated_at = now;
}

/// Move `state` into a new context. Related entity and data are replaced, not merged.
pub(crate) fn apply_switch(
    state: &mut ConversationState,
    switch: ContextSwitch,
    ttl: Duration,
    now: DateTime<Utc>,
) {
    state.current_context = switch.context;
    state.expected_response_type = switch.context.expected_response_type();
    state.related_entity_id = switch.related_entity_id;
    state.related_entity_type = switch.related_entity_type;
    state.state_data = switch.state_data.unwrap_or_default();
    state.context_set_at = Some(now);
    state.expires_at = now + ttl;
    state.updated_at = now;
}

/// Reset to the neutral context used by `clear_context`.
pub(crate) fn apply_clear(state: &mut ConversationState, now: DateTime<Utc>) {
    state.current_context = ConversationContext::GeneralInquiry;
    state.expected_response_type = ConversationContext::GeneralInquiry.expected_response_type();
    state.related_entity_id = None;
    state.related_entity_type = None;
    state.state_data = StateData::Empty;
    state.context_set_at = Some(now);
    state.updated_at = now;
}

/// New expiry for `extend_expiry`: `now + minutes`, never earlier than the current one.
pub(crate) fn extended_expiry(
    current: DateTime<Utc>,
    minutes: i64,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    (now + Duration::minutes(minutes)).max(current)
}
