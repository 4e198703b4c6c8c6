//! In-memory store: useful for testing and single-process deployments.
//!
//! One `tokio::sync::Mutex` guards states and messages together, so every
//! operation is a single critical section.

use crate::{apply_clear, apply_switch, apply_update, extended_expiry, new_state, phone_variants};
use async_trait::async_trait;
use careline_core::conversation::{
    ContextSwitch, ConversationContext, ConversationMessage, ConversationState, ConversationStats,
    NewMessage, StateUpdate,
};
use careline_core::error::StoreError;
use careline_core::store::{ConversationStore, DEFAULT_STATE_TTL_MINUTES};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    states: HashMap<String, Entry>,
    messages: HashMap<String, Vec<ConversationMessage>>,
    /// Monotonic write counter; breaks `updated_at` ties.
    clock: u64,
}

struct Entry {
    state: ConversationState,
    touched: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut Entry, StoreError> {
        self.states
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Run `f` on a state and bump its write order.
    fn mutate<F>(&mut self, id: &str, f: F) -> Result<ConversationState, StoreError>
    where
        F: FnOnce(&mut ConversationState),
    {
        let touched = self.tick();
        let entry = self.entry_mut(id)?;
        f(&mut entry.state);
        entry.touched = touched;
        Ok(entry.state.clone())
    }
}

/// A store that keeps everything in process memory.
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ttl: Duration::minutes(DEFAULT_STATE_TTL_MINUTES),
        }
    }

    /// Override the state lifetime.
    pub fn with_ttl_minutes(mut self, minutes: i64) -> Self {
        self.ttl = Duration::minutes(minutes);
        self
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_or_create(
        &self,
        patient_id: &str,
        phone_number: &str,
        default_context: ConversationContext,
    ) -> Result<ConversationState, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let alive = inner
            .states
            .values()
            .filter(|e| e.state.patient_id == patient_id && e.state.is_alive_at(now))
            .max_by_key(|e| (e.state.updated_at, e.touched))
            .map(|e| e.state.clone());
        if let Some(state) = alive {
            return Ok(state);
        }

        // Anything still flagged active for this patient is expired.
        for entry in inner.states.values_mut() {
            if entry.state.patient_id == patient_id && entry.state.is_active {
                entry.state.is_active = false;
                entry.state.updated_at = now;
            }
        }

        let state = new_state(patient_id, phone_number, default_context, self.ttl, now);
        let touched = inner.tick();
        debug!(patient_id, state_id = %state.id, context = %default_context, "Created conversation state");
        inner.states.insert(
            state.id.clone(),
            Entry {
                state: state.clone(),
                touched,
            },
        );
        Ok(state)
    }

    async fn get(&self, id: &str) -> Result<ConversationState, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .states
            .get(id)
            .map(|e| e.state.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update(&self, id: &str, update: StateUpdate) -> Result<ConversationState, StoreError> {
        let now = Utc::now();
        self.inner
            .lock()
            .await
            .mutate(id, |state| apply_update(state, update, now))
    }

    async fn append_message(
        &self,
        id: &str,
        message: NewMessage,
    ) -> Result<ConversationMessage, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let text = message.message.clone();
        inner.mutate(id, |state| {
            state.message_count += 1;
            state.last_message = Some(text);
            state.last_message_at = Some(now);
            state.updated_at = now;
        })?;

        let stored = ConversationMessage {
            id: Uuid::new_v4().to_string(),
            conversation_state_id: id.to_string(),
            message: message.message,
            direction: message.direction,
            message_type: message.message_type,
            intent: message.intent,
            confidence: message.confidence,
            processed_at: message.processed_at,
            generation: message.generation,
            created_at: now,
        };
        inner
            .messages
            .entry(id.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn history(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, StoreError> {
        let inner = self.inner.lock().await;
        if !inner.states.contains_key(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let all = inner.messages.get(id).map(Vec::as_slice).unwrap_or(&[]);
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }

    async fn deactivate(&self, id: &str) -> Result<(), StoreError> {
        let now = Utc::now();
        self.inner.lock().await.mutate(id, |state| {
            state.is_active = false;
            state.updated_at = now;
        })?;
        Ok(())
    }

    async fn extend_expiry(&self, id: &str, minutes: i64) -> Result<ConversationState, StoreError> {
        let now = Utc::now();
        self.inner.lock().await.mutate(id, |state| {
            state.expires_at = extended_expiry(state.expires_at, minutes, now);
            state.updated_at = now;
        })
    }

    async fn sweep_expired(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut swept = 0;
        for entry in inner.states.values_mut() {
            if entry.state.is_active && entry.state.expires_at <= now {
                entry.state.is_active = false;
                entry.state.updated_at = now;
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn switch_context(
        &self,
        id: &str,
        switch: ContextSwitch,
    ) -> Result<ConversationState, StoreError> {
        let now = Utc::now();
        let ttl = self.ttl;
        self.inner
            .lock()
            .await
            .mutate(id, |state| apply_switch(state, switch, ttl, now))
    }

    async fn find_by_phone_number(
        &self,
        phone_number: &str,
    ) -> Result<Option<ConversationState>, StoreError> {
        let variants = phone_variants(phone_number);
        let inner = self.inner.lock().await;
        let now = Utc::now();
        Ok(inner
            .states
            .values()
            .filter(|e| e.state.is_alive_at(now) && variants.contains(&e.state.phone_number))
            .max_by_key(|e| (e.state.updated_at, e.touched))
            .map(|e| e.state.clone()))
    }

    async fn clear_context(&self, patient_id: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let touched = inner.tick();
        let mut cleared = 0;
        for entry in inner.states.values_mut() {
            if entry.state.patient_id == patient_id && entry.state.is_active {
                apply_clear(&mut entry.state, now);
                entry.touched = touched;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn stats(&self, patient_id: &str) -> Result<ConversationStats, StoreError> {
        let inner = self.inner.lock().await;
        let now = Utc::now();
        let mut stats = ConversationStats::default();
        let mut message_sum = 0u64;
        for entry in inner.states.values().filter(|e| e.state.patient_id == patient_id) {
            stats.total_conversations += 1;
            if entry.state.is_alive_at(now) {
                stats.active_conversations += 1;
            }
            message_sum += entry.state.message_count as u64;
            *stats
                .by_context
                .entry(entry.state.current_context.as_str().to_string())
                .or_default() += 1;
        }
        if stats.total_conversations > 0 {
            stats.average_message_count = message_sum as f64 / stats.total_conversations as f64;
        }
        Ok(stats)
    }

    async fn record_clarification(&self, id: &str) -> Result<(), StoreError> {
        let now = Utc::now();
        self.inner.lock().await.mutate(id, |state| {
            state.attempt_count += 1;
            state.last_clarification_sent_at = Some(now);
            state.updated_at = now;
        })?;
        Ok(())
    }
}
