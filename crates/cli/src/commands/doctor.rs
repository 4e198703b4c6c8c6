//! `careline doctor`: Diagnose configuration and storage.

use super::runtime::{self, CliResult};
use careline_config::AppConfig;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> CliResult {
    println!("🩺 Careline Doctor — System Diagnostics");
    println!("========================================\n");

    let mut issues = 0;

    println!("  ✅ Rust binary running");

    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    if !path.exists() {
        println!("  ⚠️  No config file at {} — using defaults", path.display());
    }

    let config = match runtime::load_config(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  1 issue(s) found. See above for details.");
            return Ok(());
        }
    };

    if config.has_api_key() {
        println!(
            "  ✅ API key configured for '{}' ({})",
            config.provider.name, config.provider.model
        );
    } else {
        println!("  ⚠️  No API key — set CARELINE_API_KEY or add api_key to config.toml");
        issues += 1;
    }

    match careline_providers::from_config(&config) {
        Ok(provider) => {
            let breaker = if provider.breaker().is_some() {
                "circuit breaker on"
            } else {
                "circuit breaker off"
            };
            println!(
                "  ✅ Provider stack ready ({} attempts, {breaker})",
                provider.policy().max_attempts
            );
        }
        Err(e) => {
            println!("  ❌ Provider: {e}");
            issues += 1;
        }
    }

    match runtime::open_store(&config).await {
        Ok(store) => match store.sweep_expired().await {
            Ok(swept) => println!(
                "  ✅ Conversation store reachable ({}; swept {swept} expired)",
                store.name()
            ),
            Err(e) => {
                println!("  ❌ Conversation store query failed: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ Conversation store: {e}");
            issues += 1;
        }
    }

    let limits = runtime::usage_limits(&config);
    if limits == Default::default() {
        println!("  ⚠️  No usage ceilings configured — provider spend is unbounded");
        issues += 1;
    } else {
        println!("  ✅ Usage ceilings configured");
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
