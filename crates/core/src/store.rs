//! Conversation store trait: persistence and lifecycle of conversation state.
//!
//! Implementations: SQLite (sqlx), in-memory (for tests and single-process use).

use crate::conversation::{
    ContextSwitch, ConversationContext, ConversationMessage, ConversationState, ConversationStats,
    NewMessage, StateUpdate,
};
use crate::error::StoreError;
use async_trait::async_trait;

/// Default lifetime of a freshly created or re-contextualized state.
pub const DEFAULT_STATE_TTL_MINUTES: i64 = 120;

/// The core ConversationStore trait.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Return the patient's active state, creating one if none is alive.
    async fn get_or_create(
        &self,
        patient_id: &str,
        phone_number: &str,
        default_context: ConversationContext,
    ) -> Result<ConversationState, StoreError>;

    /// Fetch a state by id.
    async fn get(&self, id: &str) -> Result<ConversationState, StoreError>;

    /// Merge `Some` fields into the row and stamp `updated_at`.
    async fn update(&self, id: &str, update: StateUpdate) -> Result<ConversationState, StoreError>;

    /// Insert a message and bump the owning state's counters in one transaction.
    async fn append_message(
        &self,
        id: &str,
        message: NewMessage,
    ) -> Result<ConversationMessage, StoreError>;

    /// The most recent `limit` messages, oldest first.
    async fn history(&self, id: &str, limit: usize)
    -> Result<Vec<ConversationMessage>, StoreError>;

    async fn deactivate(&self, id: &str) -> Result<(), StoreError>;

    async fn extend_expiry(&self, id: &str, minutes: i64) -> Result<ConversationState, StoreError>;

    /// Deactivate every active row whose expiry has passed. Returns the number swept.
    async fn sweep_expired(&self) -> Result<u64, StoreError>;

    async fn switch_context(
        &self,
        id: &str,
        switch: ContextSwitch,
    ) -> Result<ConversationState, StoreError>;

    /// Look up the most recently updated active state for any encoding of the number.
    async fn find_by_phone_number(
        &self,
        phone_number: &str,
    ) -> Result<Option<ConversationState>, StoreError>;

    /// Reset every active state for the patient to general inquiry. Returns rows touched.
    async fn clear_context(&self, patient_id: &str) -> Result<u64, StoreError>;

    async fn stats(&self, patient_id: &str) -> Result<ConversationStats, StoreError>;

    /// Bump clarification bookkeeping (metrics only, no cap enforced).
    async fn record_clarification(&self, id: &str) -> Result<(), StoreError>;
}
