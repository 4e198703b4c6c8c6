//! `careline history`: Message log of the active conversation for a number.

use super::runtime::{self, CliResult};
use careline_core::MessageDirection;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, phone: &str, limit: usize) -> CliResult {
    let config = runtime::load_config(config_path)?;
    let store = runtime::open_store(&config).await?;

    let Some(state) = store.find_by_phone_number(phone).await? else {
        println!("No active conversation for {phone}.");
        return Ok(());
    };

    println!(
        "💬 {} — context: {}, {} message(s), expires {}",
        state.patient_id,
        state.current_context,
        state.message_count,
        state.expires_at.format("%Y-%m-%d %H:%M UTC")
    );
    println!("─────────────────────────────────────");

    for msg in store.history(&state.id, limit).await? {
        let arrow = match msg.direction {
            MessageDirection::Inbound => "→",
            MessageDirection::Outbound => "←",
        };
        let tag = match (&msg.intent, msg.confidence) {
            (Some(intent), Some(conf)) => format!(" [{intent} {conf}%]"),
            (Some(intent), None) => format!(" [{intent}]"),
            _ => String::new(),
        };
        println!(
            "  {} {arrow} {}{tag}",
            msg.created_at.format("%H:%M:%S"),
            msg.message
        );
    }

    Ok(())
}
