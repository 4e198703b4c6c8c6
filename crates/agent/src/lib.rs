//! The message pipeline: the heart of Careline.
//!
//! Every inbound patient message follows the same path:
//!
//! 1. **Normalize** the text (lowercase, expand shorthand like `udh` → `sudah`)
//! 2. **Load state** for the patient, creating or repairing it as needed
//! 3. **Decide the intent**: verification keywords, unsubscribe, emergency
//!    screening, provider classification or the keyword fallback
//! 4. **Reply** with a fixed template or a validated, safety-checked
//!    generated message
//! 5. **Persist** both sides, move the conversation along, and escalate to
//!    a human when automation is not enough
//!
//! The patient always gets a reply, even when the provider is down.

pub mod generation;
pub mod nlu;
pub mod pipeline;
pub mod templates;

#[cfg(test)]
mod test_helpers;

pub use generation::{
    GeneratedReply, GenerationService, GenerationSettings, LanguageValidator, QueueTarget,
    ReplyRequest, ReplySource, ResponseCache,
};
pub use nlu::{KeywordClassifier, KeywordSets, Normalizer};
pub use pipeline::{
    DetectionPath, MessageProcessor, PipelineSettings, ProcessingOutcome,
    should_use_intent_detection,
};
pub use templates::{TemplateTable, TemplateVars};
