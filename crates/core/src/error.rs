//! Error types for the Careline domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Careline operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Conversation store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Orchestration errors ---
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    // --- Collaborator errors ---
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Circuit breaker open for provider '{0}'")]
    CircuitOpen(String),
}

impl ProviderError {
    /// Whether a retry of the same request may succeed.
    ///
    /// Timeouts, network failures, rate limits, 5xx responses and anything the
    /// provider describes as a temporary failure are transient. Authentication,
    /// bad requests and unknown models are permanent. An open breaker is not
    /// retried in-line; callers queue the request instead.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) | Self::RateLimited { .. } => true,
            Self::ApiError {
                status_code,
                message,
            } => {
                (500..600).contains(status_code)
                    || message.to_lowercase().contains("temporary failure")
            }
            Self::AuthenticationFailed(_)
            | Self::ModelNotFound(_)
            | Self::BadRequest(_)
            | Self::NotConfigured(_)
            | Self::CircuitOpen(_) => false,
        }
    }

    /// Whether the request should be handed to the retry queue rather than dropped.
    pub fn should_queue(&self) -> bool {
        self.is_transient() || matches!(self, Self::CircuitOpen(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Conversation state not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Errors surfaced by the provider orchestration layer.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// Admission control rejected the call; the request was queued.
    #[error("usage limits exceeded: {0}")]
    UsageLimitExceeded(String),

    /// The provider was unavailable after retries (or the breaker was open);
    /// the request was queued for redelivery.
    #[error("provider unavailable, request queued: {0}")]
    Queued(ProviderError),

    /// A permanent provider error. Not retried, not queued.
    #[error("provider rejected request: {0}")]
    Provider(ProviderError),

    #[error("invalid provider output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("Retry queue unavailable: {0}")]
    Queue(String),

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Patient lookup failed: {0}")]
    Lookup(String),

    #[error("Message delivery failed to {phone_number}: {reason}")]
    DeliveryFailed {
        phone_number: String,
        reason: String,
    },
}
