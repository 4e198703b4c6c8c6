//! `careline stats`: Conversation counts for one patient.

use super::runtime::{self, CliResult};
use std::path::Path;

pub async fn run(config_path: Option<&Path>, patient_id: &str) -> CliResult {
    let config = runtime::load_config(config_path)?;
    let store = runtime::open_store(&config).await?;
    let stats = store.stats(patient_id).await?;

    println!("📊 Conversations for {patient_id}");
    println!("─────────────────────────────────────");
    println!("  Total:            {}", stats.total_conversations);
    println!("  Active:           {}", stats.active_conversations);
    println!("  Avg. messages:    {:.1}", stats.average_message_count);
    if !stats.by_context.is_empty() {
        println!();
        println!("  By context:");
        for (context, count) in &stats.by_context {
            println!("    {context:<24} {count}");
        }
    }

    Ok(())
}
