//! `careline usage` / `careline pricing`: Ceilings and cost lookup.

use super::runtime::{self, CliResult};
use std::path::Path;

fn ceiling<T: PartialEq + Default + std::fmt::Display>(value: T) -> String {
    if value == T::default() {
        "unlimited".into()
    } else {
        value.to_string()
    }
}

/// Show the configured usage ceilings.
pub async fn show(config_path: Option<&Path>) -> CliResult {
    let config = runtime::load_config(config_path)?;
    let limits = runtime::usage_limits(&config);

    println!("🔒 Usage Ceilings");
    println!("─────────────────────────────────────");
    println!("  Daily tokens:     {}", ceiling(limits.daily_max_tokens));
    println!("  Daily USD:        {}", ceiling(limits.daily_max_usd));
    println!("  Monthly tokens:   {}", ceiling(limits.monthly_max_tokens));
    println!("  Monthly USD:      {}", ceiling(limits.monthly_max_usd));
    println!();
    println!(
        "  Calls over a ceiling are not sent; the message is queued with \"usage limits exceeded\"."
    );

    Ok(())
}

/// List available model pricing.
pub async fn pricing(config_path: Option<&Path>) -> CliResult {
    let config = runtime::load_config(config_path)?;
    let table = runtime::pricing_table(&config);
    let models = table.models();

    println!("💰 Model Pricing (per 1M tokens)");
    println!("─────────────────────────────────────────────────────");
    println!("{:<40} {:>10} {:>10}", "Model", "Input", "Output");
    println!("{:<40} {:>10} {:>10}", "─────", "─────", "──────");

    for name in &models {
        if let Some(p) = table.get(name) {
            println!(
                "{:<40} ${:>8.3} ${:>8.3}",
                name, p.input_per_m, p.output_per_m
            );
        }
    }

    println!();
    println!("  {} models with pricing data", models.len());

    Ok(())
}

/// Estimate cost for a given model and token counts.
pub async fn estimate(
    config_path: Option<&Path>,
    model: &str,
    input_tokens: u32,
    output_tokens: u32,
) -> CliResult {
    let config = runtime::load_config(config_path)?;
    let table = runtime::pricing_table(&config);

    let cost = table.compute_cost(model, input_tokens, output_tokens);
    if cost == 0.0 {
        println!("⚠ Model '{}' not found in pricing table.", model);
        println!("  Use `careline pricing` to see available models.");
    } else {
        println!("💵 Cost estimate for {}", model);
        println!("   Input tokens:  {}", input_tokens);
        println!("   Output tokens: {}", output_tokens);
        println!("   Estimated cost: ${:.6}", cost);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_unlimited() {
        assert_eq!(ceiling(0u64), "unlimited");
        assert_eq!(ceiling(0.0f64), "unlimited");
        assert_eq!(ceiling(250_000u64), "250000");
    }
}
