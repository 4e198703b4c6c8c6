//! # Careline Core
//!
//! Domain types, traits, and error definitions for the Careline patient
//! messaging engine. This crate has **no I/O of its own**: it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem and every external collaborator is a trait here.
//! Implementations live in their respective crates. This enables:
//! - Swapping the store or provider via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod collaborators;
pub mod conversation;
pub mod error;
pub mod intent;
pub mod message;
pub mod provider;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use collaborators::{
    ActiveReminder, DeliveryResult, InMemoryRetryQueue, LoggingTransport, Notification, Notifier,
    OutboundTransport, PatientContext, PatientDirectory, PatientLookup, PatientProfile, Priority,
    QueuedMessage, RetryQueue, StaticPatientDirectory, TracingNotifier, VerificationStatus,
};
pub use conversation::{
    ContextSwitch, ConversationContext, ConversationMessage, ConversationState, ConversationStats,
    ExpectedResponseType, GenerationMetadata, MessageDirection, MessageType, NewMessage, StateData,
    StateUpdate, confidence_to_percent,
};
pub use error::{CollaboratorError, Error, GenerationError, ProviderError, Result, StoreError};
pub use intent::{Entities, Intent, IntentResult, Sentiment};
pub use message::{ChatTurn, Role, estimate_tokens};
pub use provider::{GenerationRequest, GenerationResponse, Provider, Usage};
pub use store::{ConversationStore, DEFAULT_STATE_TTL_MINUTES};
