//! Configuration loading, validation, and management for Careline.
//!
//! Loads configuration from `~/.careline/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.careline/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generative provider connection
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Sampling parameters and thresholds for generated replies
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Retry policy and circuit breaker
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Usage ceilings checked before every provider call
    #[serde(default)]
    pub usage: UsageConfig,

    /// Generated-reply cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Conversation store and lifecycle
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Locale-specific keyword tables
    #[serde(default)]
    pub locale: LocaleConfig,

    /// Custom model pricing overrides (model name → pricing)
    #[serde(default)]
    pub pricing: HashMap<String, PricingOverrideConfig>,
}

fn default_true() -> bool {
    true
}

// ── Provider ──────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name used in logs ("openai", "openrouter", "ollama", ...)
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// OpenAI-compatible base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key (env `CARELINE_API_KEY` / `OPENAI_API_KEY` override)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Whether the backend accepts a system role
    #[serde(default = "default_true")]
    pub supports_system_role: bool,

    /// HTTP client timeout in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider_name() -> String {
    "openai".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_http_timeout_secs() -> u64 {
    30
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("supports_system_role", &self.supports_system_role)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            supports_system_role: true,
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

// ── Generation ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Token budget for the intent-detection call
    #[serde(default = "default_intent_max_tokens")]
    pub intent_max_tokens: u32,

    /// Temperature for the intent-detection call
    #[serde(default = "default_intent_temperature")]
    pub intent_temperature: f32,

    /// Minimum intent confidence before a personalized reply is generated
    #[serde(default = "default_generation_threshold")]
    pub confidence_threshold: f32,

    /// Below this confidence the conversation is escalated to a human
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: f32,

    /// Regenerations allowed after a reply fails language validation
    #[serde(default = "default_validation_retries")]
    pub max_validation_retries: u32,

    /// Messages of history included in generation prompts
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Indonesian marker words a generated reply must contain
    #[serde(default = "default_min_language_markers")]
    pub min_language_markers: usize,
}

fn default_max_tokens() -> u32 {
    300
}
fn default_temperature() -> f32 {
    0.7
}
fn default_intent_max_tokens() -> u32 {
    150
}
fn default_intent_temperature() -> f32 {
    0.1
}
fn default_generation_threshold() -> f32 {
    0.6
}
fn default_escalation_threshold() -> f32 {
    0.3
}
fn default_validation_retries() -> u32 {
    1
}
fn default_history_turns() -> usize {
    6
}
fn default_min_language_markers() -> usize {
    1
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            intent_max_tokens: default_intent_max_tokens(),
            intent_temperature: default_intent_temperature(),
            confidence_threshold: default_generation_threshold(),
            escalation_threshold: default_escalation_threshold(),
            max_validation_retries: default_validation_retries(),
            history_turns: default_history_turns(),
            min_language_markers: default_min_language_markers(),
        }
    }
}

// ── Resilience ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Total attempts per call (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Per-attempt timeout; exceeding it counts as a transient failure
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// `max_retries` attached to queued messages
    #[serde(default = "default_queue_max_retries")]
    pub queue_max_retries: u32,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8_000
}
fn default_attempt_timeout_secs() -> u64 {
    20
}
fn default_queue_max_retries() -> u32 {
    3
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            circuit_breaker: CircuitBreakerConfig::default(),
            queue_max_retries: default_queue_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cooldown before a half-open trial call is allowed
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout_secs() -> u64 {
    60
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
        }
    }
}

// ── Usage ceilings ────────────────────────────────────────────────────────

/// Ceilings over rolling periods. `0` means unlimited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageConfig {
    #[serde(default)]
    pub daily_max_tokens: u64,

    #[serde(default)]
    pub daily_max_usd: f64,

    #[serde(default)]
    pub monthly_max_tokens: u64,

    #[serde(default)]
    pub monthly_max_usd: f64,
}

// ── Cache ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_cache_min_confidence")]
    pub min_confidence: f32,

    #[serde(default = "default_cache_capacity")]
    pub max_entries: usize,

    /// Intents whose generated replies may be reused across patients with the same fingerprint
    #[serde(default = "default_cacheable_intents")]
    pub cacheable_intents: Vec<String>,
}

fn default_cache_ttl_secs() -> u64 {
    3_600
}
fn default_cache_min_confidence() -> f32 {
    0.8
}
fn default_cache_capacity() -> usize {
    1_000
}
fn default_cacheable_intents() -> Vec<String> {
    vec![
        "confirm_taken".into(),
        "confirm_later".into(),
        "reminder_inquiry".into(),
        "help".into(),
    ]
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl_secs(),
            min_confidence: default_cache_min_confidence(),
            max_entries: default_cache_capacity(),
            cacheable_intents: default_cacheable_intents(),
        }
    }
}

// ── Conversation ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// SQLite URL (`sqlite://path/careline.db` or `sqlite::memory:`)
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// State lifetime from creation / last context switch
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: i64,

    /// How often the expiry sweeper runs
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_database_url() -> String {
    format!(
        "sqlite://{}",
        AppConfig::config_dir().join("careline.db").display()
    )
}
fn default_ttl_minutes() -> i64 {
    120
}
fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            ttl_minutes: default_ttl_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

// ── Locale ────────────────────────────────────────────────────────────────

/// Deployment-locale keyword tables. Defaults target Indonesian.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocaleConfig {
    /// Language code used in prompts ("id")
    #[serde(default = "default_language")]
    pub language: String,

    /// Shorthand → full word, applied per token during normalization
    #[serde(default = "default_abbreviations")]
    pub abbreviations: HashMap<String, String>,

    /// Words that count as consent in the verification context
    #[serde(default = "default_accept_keywords")]
    pub accept_keywords: Vec<String>,

    /// Broad phrases that route a message to provider-backed unsubscribe detection
    #[serde(default = "default_unsubscribe_phrases")]
    pub unsubscribe_phrases: Vec<String>,

    /// Narrow phrases that force an unsubscribe intent deterministically
    #[serde(default = "default_unsubscribe_keywords")]
    pub unsubscribe_keywords: Vec<String>,
}

fn default_language() -> String {
    "id".into()
}

fn default_abbreviations() -> HashMap<String, String> {
    [
        ("udh", "sudah"),
        ("sdh", "sudah"),
        ("blm", "belum"),
        ("blum", "belum"),
        ("gk", "tidak"),
        ("ga", "tidak"),
        ("gak", "tidak"),
        ("nggak", "tidak"),
        ("engga", "tidak"),
        ("tdk", "tidak"),
        ("yg", "yang"),
        ("dgn", "dengan"),
        ("sy", "saya"),
        ("aja", "saja"),
        ("krn", "karena"),
        ("bsk", "besok"),
        ("nnt", "nanti"),
        ("sm", "sama"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_accept_keywords() -> Vec<String> {
    [
        "ya", "iya", "iyaa", "y", "yes", "ok", "oke", "okay", "setuju", "mau", "boleh", "bersedia",
        "siap", "baik",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_unsubscribe_phrases() -> Vec<String> {
    [
        "berhenti",
        "stop",
        "keluar",
        "tidak mau lagi",
        "jangan kirim",
        "hapus nomor",
        "unsubscribe",
        "tidak perlu lagi",
        "cukup",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_unsubscribe_keywords() -> Vec<String> {
    [
        "berhenti kirim",
        "berhenti pesan",
        "berhenti berlangganan",
        "stop kirim",
        "stop pesan",
        "jangan kirim lagi",
        "unsubscribe",
        "hapus nomor saya",
    ]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            abbreviations: default_abbreviations(),
            accept_keywords: default_accept_keywords(),
            unsubscribe_phrases: default_unsubscribe_phrases(),
            unsubscribe_keywords: default_unsubscribe_keywords(),
        }
    }
}

// ── Pricing ───────────────────────────────────────────────────────────────

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
}

impl AppConfig {
    /// Load configuration from the default path (~/.careline/config.toml).
    ///
    /// Also checks environment variables:
    /// - `CARELINE_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `CARELINE_MODEL`
    /// - `CARELINE_DATABASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let config = Self::load_from(&config_path)?;
        Ok(config.with_env_overrides())
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if self.provider.api_key.is_none() {
            self.provider.api_key = std::env::var("CARELINE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("CARELINE_MODEL") {
            self.provider.model = model;
        }

        if let Ok(url) = std::env::var("CARELINE_DATABASE_URL") {
            self.conversation.database_url = url;
        }

        self
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".careline")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.generation;
        if !(0.0..=2.0).contains(&g.temperature) || !(0.0..=2.0).contains(&g.intent_temperature) {
            return Err(ConfigError::ValidationError(
                "temperatures must be between 0.0 and 2.0".into(),
            ));
        }

        for (name, value) in [
            ("generation.confidence_threshold", g.confidence_threshold),
            ("generation.escalation_threshold", g.escalation_threshold),
            ("cache.min_confidence", self.cache.min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }

        if self.resilience.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "resilience.max_attempts must be at least 1".into(),
            ));
        }

        if self.resilience.circuit_breaker.enabled
            && self.resilience.circuit_breaker.failure_threshold == 0
        {
            return Err(ConfigError::ValidationError(
                "circuit_breaker.failure_threshold must be at least 1".into(),
            ));
        }

        if self.conversation.ttl_minutes <= 0 {
            return Err(ConfigError::ValidationError(
                "conversation.ttl_minutes must be positive".into(),
            ));
        }

        if self.locale.accept_keywords.is_empty() {
            return Err(ConfigError::ValidationError(
                "locale.accept_keywords cannot be empty".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.conversation.ttl_minutes, 120);
        assert_eq!(config.generation.max_validation_retries, 1);
        assert_eq!(config.generation.min_language_markers, 1);
        assert!((config.generation.confidence_threshold - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider.model, config.provider.model);
        assert_eq!(parsed.locale.accept_keywords, config.locale.accept_keywords);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.generation.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut config = AppConfig::default();
        config.resilience.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().provider.name, "openai");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[provider]
name = "ollama"
base_url = "http://localhost:11434/v1"
supports_system_role = false

[usage]
daily_max_tokens = 50000

[locale.abbreviations]
gpp = "tidak apa-apa"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.provider.name, "ollama");
        assert!(!config.provider.supports_system_role);
        assert_eq!(config.provider.model, "gpt-4o-mini");
        assert_eq!(config.usage.daily_max_tokens, 50_000);
        assert_eq!(
            config.locale.abbreviations.get("gpp").map(String::as_str),
            Some("tidak apa-apa")
        );
        // Replacing the table drops the defaults for that table only.
        assert!(!config.locale.accept_keywords.is_empty());
    }

    #[test]
    fn unparseable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "provider = [").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn api_key_redacted_in_debug() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-secret-value".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("accept_keywords"));
    }
}
