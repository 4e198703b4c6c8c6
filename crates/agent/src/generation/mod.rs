//! Provider orchestration: admission control, resilient calls, output
//! validation, response caching and the intent-detection sub-contract.
//!
//! ```text
//!  ReplyRequest ──▶ cache? ──hit──▶ safety re-check ──▶ reply
//!        │
//!        ▼
//!  UsageLedger::check ──deny──▶ RetryQueue ("usage limits exceeded")
//!        │
//!        ▼
//!  adapt_turns ──▶ Provider (retry + breaker) ──transient──▶ RetryQueue
//!        │
//!        ▼
//!  LanguageValidator ──fail──▶ regenerate (strict) ──fail──▶ fallback template
//!        │
//!        ▼
//!  SafetyFilter ──high──▶ fallback template + flagged text
//! ```

pub mod cache;
pub mod intent;
pub mod validator;

pub use cache::ResponseCache;
pub use intent::{allowed_intents, intent_prompt, parse_intent_output};
pub use validator::{LanguageValidator, ValidationReport};

use careline_config::AppConfig;
use careline_core::{
    ChatTurn, ConversationContext, GenerationError, GenerationMetadata, GenerationRequest,
    GenerationResponse, Intent, IntentResult, MessageType, Priority, Provider, QueuedMessage,
    RetryQueue, estimate_tokens,
};
use careline_providers::adapt_turns;
use careline_safety::{SafetyContext, SafetyFilter, SafetyResult};
use careline_telemetry::{GenerationMetrics, PricingTable, UsageLedger};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Queue reason recorded when admission control rejects a call.
pub const USAGE_LIMIT_REASON: &str = "usage limits exceeded";

/// Queue reason recorded when the provider stays unavailable.
pub const PROVIDER_UNAVAILABLE_REASON: &str = "provider unavailable";

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub intent_max_tokens: u32,
    pub intent_temperature: f32,
    pub max_validation_retries: u32,
    pub queue_max_retries: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl GenerationSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.provider.model.clone(),
            max_tokens: config.generation.max_tokens,
            temperature: config.generation.temperature,
            intent_max_tokens: config.generation.intent_max_tokens,
            intent_temperature: config.generation.intent_temperature,
            max_validation_retries: config.generation.max_validation_retries,
            queue_max_retries: config.resilience.queue_max_retries,
        }
    }
}

/// The patient message a provider call is made on behalf of.
#[derive(Debug, Clone)]
pub struct QueueTarget {
    pub patient_id: String,
    pub phone_number: String,
    pub message: String,
    pub message_type: MessageType,
    pub priority: Priority,
    pub intent: Option<Intent>,
    pub context: Option<ConversationContext>,
}

/// Everything needed to produce one reply.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub target: QueueTarget,
    pub turns: Vec<ChatTurn>,
    pub intent: Intent,
    pub confidence: f32,
    /// Small patient-context fingerprint used as part of the cache key.
    pub fingerprint: String,
    /// Deterministic text used when validation or safety rejects the output.
    pub fallback: String,
    pub safety: SafetyContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Provider,
    Cache,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct GeneratedReply {
    pub text: String,
    pub source: ReplySource,
    pub metadata: GenerationMetadata,
    pub safety: SafetyResult,
    /// The generated text the safety filter rejected, if any.
    pub flagged_text: Option<String>,
    pub validation_retries: u32,
}

pub struct GenerationService {
    provider: Arc<dyn Provider>,
    ledger: Arc<dyn UsageLedger>,
    queue: Arc<dyn RetryQueue>,
    pricing: Arc<PricingTable>,
    metrics: Arc<GenerationMetrics>,
    safety: SafetyFilter,
    validator: LanguageValidator,
    cache: Option<ResponseCache>,
    settings: GenerationSettings,
}

impl GenerationService {
    pub fn new(
        provider: Arc<dyn Provider>,
        ledger: Arc<dyn UsageLedger>,
        queue: Arc<dyn RetryQueue>,
    ) -> Self {
        Self {
            provider,
            ledger,
            queue,
            pricing: Arc::new(PricingTable::with_defaults()),
            metrics: Arc::new(GenerationMetrics::new()),
            safety: SafetyFilter::new(),
            validator: LanguageValidator::indonesian(),
            cache: None,
            settings: GenerationSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_pricing(mut self, pricing: Arc<PricingTable>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GenerationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_cache(mut self, cache: Option<ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_validator(mut self, validator: LanguageValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn metrics(&self) -> &Arc<GenerationMetrics> {
        &self.metrics
    }

    pub fn ledger(&self) -> &Arc<dyn UsageLedger> {
        &self.ledger
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Classify a message through the provider.
    ///
    /// Failures are returned, never queued: the caller still has the keyword
    /// classifier and the message is answered either way.
    pub async fn detect_intent(
        &self,
        text: &str,
        context: ConversationContext,
    ) -> Result<IntentResult, GenerationError> {
        let turns = intent_prompt(text, context);
        let (response, _) = self
            .call(
                &turns,
                self.settings.intent_max_tokens,
                self.settings.intent_temperature,
                None,
            )
            .await?;

        let result = parse_intent_output(&response.content);
        if result.intent != Intent::Unknown && !allowed_intents(context).contains(&result.intent) {
            debug!(intent = %result.intent, context = %context, "Intent not valid in context");
            return Ok(IntentResult::unknown());
        }
        Ok(result)
    }

    /// Produce a validated, safety-checked reply.
    ///
    /// Admission denials and transient provider failures on the first call
    /// queue the patient's message and return an error; the caller answers
    /// with a template.
    pub async fn generate_reply(
        &self,
        request: ReplyRequest,
    ) -> Result<GeneratedReply, GenerationError> {
        let cache_key = self
            .cache
            .as_ref()
            .filter(|c| c.is_cacheable(request.intent, request.confidence))
            .map(|_| ResponseCache::key(request.intent, &request.fingerprint));

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(hit) = cache.get(key) {
                let safety = self.safety.filter_generated(&hit, &request.safety);
                if safety.is_safe {
                    self.metrics.record_cache_hit();
                    debug!(intent = %request.intent, "Serving cached reply");
                    return Ok(GeneratedReply {
                        text: hit,
                        source: ReplySource::Cache,
                        metadata: GenerationMetadata {
                            model: "cache".to_string(),
                            tokens_used: 0,
                            cost_usd: 0.0,
                            response_time_ms: 0,
                        },
                        safety,
                        flagged_text: None,
                        validation_retries: 0,
                    });
                }
                info!(intent = %request.intent, "Cached reply no longer passes safety, dropping");
                cache.invalidate(key);
            }
        }

        let mut turns = request.turns.clone();
        let mut total = GenerationMetadata {
            model: self.settings.model.clone(),
            tokens_used: 0,
            cost_usd: 0.0,
            response_time_ms: 0,
        };
        let mut retries = 0u32;

        let validated = loop {
            let target = (retries == 0).then_some(&request.target);
            let response = match self
                .call(&turns, self.settings.max_tokens, self.settings.temperature, target)
                .await
            {
                Ok((response, meta)) => {
                    total.model = meta.model;
                    total.tokens_used += meta.tokens_used;
                    total.cost_usd += meta.cost_usd;
                    total.response_time_ms += meta.response_time_ms;
                    response
                }
                Err(e) if retries == 0 => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Regeneration failed, using fallback");
                    break None;
                }
            };

            let report = self.validator.validate(&response.content);
            if report.passed {
                break Some(response.content.trim().to_string());
            }
            if retries >= self.settings.max_validation_retries {
                warn!(
                    retries,
                    disallowed = ?report.disallowed,
                    "Reply failed language validation, using fallback"
                );
                break None;
            }
            retries += 1;
            self.metrics.record_validation_retry();
            debug!(attempt = retries, disallowed = ?report.disallowed, "Regenerating with strict language instruction");
            turns = self.validator.strengthen(&request.turns, &report);
        };

        let Some(text) = validated else {
            self.metrics.record_fallback();
            return Ok(GeneratedReply {
                text: request.fallback,
                source: ReplySource::Fallback,
                metadata: total,
                safety: SafetyResult::safe(),
                flagged_text: None,
                validation_retries: retries,
            });
        };

        let safety = self.safety.filter_generated(&text, &request.safety);
        if safety.escalation_required {
            self.metrics.record_fallback();
            return Ok(GeneratedReply {
                text: request.fallback,
                source: ReplySource::Fallback,
                metadata: total,
                safety,
                flagged_text: Some(text),
                validation_retries: retries,
            });
        }
        if !safety.is_safe {
            let sanitized = self.safety.sanitize(&text, &safety.violations);
            return Ok(GeneratedReply {
                text: sanitized,
                source: ReplySource::Provider,
                metadata: total,
                safety,
                flagged_text: None,
                validation_retries: retries,
            });
        }

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.put(key, text.clone());
        }
        Ok(GeneratedReply {
            text,
            source: ReplySource::Provider,
            metadata: total,
            safety,
            flagged_text: None,
            validation_retries: retries,
        })
    }

    /// One admitted, shaped and accounted provider call.
    ///
    /// With a `target`, a denied or transiently failed call queues the
    /// patient's message.
    async fn call(
        &self,
        turns: &[ChatTurn],
        max_tokens: u32,
        temperature: f32,
        target: Option<&QueueTarget>,
    ) -> Result<(GenerationResponse, GenerationMetadata), GenerationError> {
        let estimated = u64::from(estimate_tokens(turns)) + u64::from(max_tokens);
        let admission = self.ledger.check(estimated);
        if !admission.allowed {
            let detail = admission
                .reason
                .unwrap_or_else(|| USAGE_LIMIT_REASON.to_string());
            warn!(estimated, reason = %detail, "Provider call blocked by usage ledger");
            if let Some(target) = target {
                self.enqueue(target, USAGE_LIMIT_REASON).await;
            }
            return Err(GenerationError::UsageLimitExceeded(detail));
        }

        let shaped = adapt_turns(turns, self.provider.supports_system_role());
        let request = GenerationRequest::new(shaped, max_tokens, temperature)
            .with_model(self.settings.model.clone());

        let started = Instant::now();
        match self.provider.generate(request).await {
            Ok(response) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                let (input, output) = response
                    .usage
                    .map(|u| (u.prompt_tokens, u.completion_tokens))
                    .unwrap_or((0, response.tokens_used));
                let model = if response.model.is_empty() {
                    self.settings.model.clone()
                } else {
                    response.model.clone()
                };
                let cost = self.pricing.compute_cost(&model, input, output);

                self.ledger.record(u64::from(response.tokens_used), cost);
                self.metrics
                    .record_call(response.tokens_used, latency_ms, cost);
                debug!(
                    model = %model,
                    tokens = response.tokens_used,
                    latency_ms,
                    cost_usd = cost,
                    "Provider call completed"
                );

                if response.content.trim().is_empty() {
                    warn!(model = %model, "Provider returned an empty completion");
                    return Err(GenerationError::InvalidOutput("empty completion".into()));
                }

                let meta = GenerationMetadata {
                    model,
                    tokens_used: response.tokens_used,
                    cost_usd: cost,
                    response_time_ms: latency_ms,
                };
                Ok((response, meta))
            }
            Err(e) => {
                self.metrics.record_failure();
                match target {
                    Some(target) if e.should_queue() => {
                        self.enqueue(target, PROVIDER_UNAVAILABLE_REASON).await;
                        Err(GenerationError::Queued(e))
                    }
                    _ => Err(GenerationError::Provider(e)),
                }
            }
        }
    }

    /// Hand the patient's message to the retry queue. Failures are logged.
    pub async fn enqueue(&self, target: &QueueTarget, reason: &str) {
        let mut metadata = serde_json::Map::new();
        metadata.insert("reason".into(), reason.into());
        metadata.insert(
            "enqueued_at".into(),
            chrono::Utc::now().to_rfc3339().into(),
        );
        if let Some(intent) = target.intent {
            metadata.insert("intent".into(), intent.as_str().into());
        }
        if let Some(context) = target.context {
            metadata.insert("context".into(), context.as_str().into());
        }

        let message = QueuedMessage {
            patient_id: target.patient_id.clone(),
            phone_number: target.phone_number.clone(),
            message: target.message.clone(),
            priority: target.priority,
            message_type: target.message_type,
            max_retries: self.settings.queue_max_retries,
            metadata,
        };

        match self.queue.enqueue(message).await {
            Ok(()) => {
                self.metrics.record_queued();
                info!(patient_id = %target.patient_id, reason, "Message queued for redelivery");
            }
            Err(e) => {
                error!(patient_id = %target.patient_id, reason, error = %e, "Failed to queue message");
            }
        }
    }
}
