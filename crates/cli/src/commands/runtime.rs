//! Wiring shared by the commands: config, store and pipeline construction.

use careline_agent::{
    GenerationService, GenerationSettings, LanguageValidator, MessageProcessor, PipelineSettings,
    ResponseCache,
};
use careline_config::AppConfig;
use careline_core::{
    ConversationStore, InMemoryRetryQueue, LoggingTransport, PatientDirectory, TracingNotifier,
};
use careline_store::SqliteStore;
use careline_telemetry::{InMemoryUsageLedger, ModelPricing, PricingTable, UsageLimits};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Load from `--config` when given, else from the default location.
pub fn load_config(path: Option<&Path>) -> CliResult<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_from(path)?.with_env_overrides(),
        None => AppConfig::load()?,
    };
    Ok(config)
}

/// Open the configured SQLite store, creating the database directory if needed.
pub async fn open_store(config: &AppConfig) -> CliResult<Arc<dyn ConversationStore>> {
    let url = &config.conversation.database_url;
    if let Some(parent) = database_file(url).and_then(|p| p.parent().map(Path::to_path_buf)) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(&parent)?;
        }
    }
    let store = SqliteStore::new(url)
        .await?
        .with_ttl_minutes(config.conversation.ttl_minutes);
    Ok(Arc::new(store))
}

fn database_file(url: &str) -> Option<PathBuf> {
    if url.contains(":memory:") {
        return None;
    }
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .map(|p| PathBuf::from(p.split('?').next().unwrap_or(p)))
}

pub fn usage_limits(config: &AppConfig) -> UsageLimits {
    UsageLimits {
        daily_max_tokens: config.usage.daily_max_tokens,
        daily_max_usd: config.usage.daily_max_usd,
        monthly_max_tokens: config.usage.monthly_max_tokens,
        monthly_max_usd: config.usage.monthly_max_usd,
    }
}

/// Built-in pricing plus any `[pricing]` overrides.
pub fn pricing_table(config: &AppConfig) -> PricingTable {
    PricingTable::with_overrides(config.pricing.iter().map(|(model, p)| {
        (model.clone(), ModelPricing::new(p.input_per_m, p.output_per_m))
    }))
}

/// A ready-to-use pipeline plus the in-process queue it writes to.
pub struct Runtime {
    pub processor: MessageProcessor,
    pub queue: Arc<InMemoryRetryQueue>,
}

pub async fn build(config: &AppConfig, directory: Arc<dyn PatientDirectory>) -> CliResult<Runtime> {
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CARELINE_API_KEY=sk-...   (recommended)");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = careline_providers::from_config(config)?;
    let store = open_store(config).await?;
    let queue = Arc::new(InMemoryRetryQueue::new());

    let generation = GenerationService::new(
        Arc::new(provider),
        Arc::new(InMemoryUsageLedger::new(usage_limits(config))),
        queue.clone(),
    )
    .with_settings(GenerationSettings::from_config(config))
    .with_pricing(Arc::new(pricing_table(config)))
    .with_cache(ResponseCache::from_config(&config.cache))
    .with_validator(
        LanguageValidator::indonesian().with_min_markers(config.generation.min_language_markers),
    );

    let processor = MessageProcessor::new(
        store,
        Arc::new(generation),
        directory,
        Arc::new(TracingNotifier),
    )
    .with_locale(&config.locale)
    .with_settings(PipelineSettings::from_config(&config.generation))
    .with_transport(Arc::new(LoggingTransport));

    info!(
        provider = %config.provider.name,
        model = %config.provider.model,
        database = %config.conversation.database_url,
        "Pipeline ready"
    );
    Ok(Runtime { processor, queue })
}
