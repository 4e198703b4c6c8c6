//! `careline sweep`: Deactivate expired conversation states.

use super::runtime::{self, CliResult};
use careline_store::spawn_expiry_sweeper;
use std::path::Path;
use std::time::Duration;

pub async fn run(config_path: Option<&Path>, watch: bool) -> CliResult {
    let config = runtime::load_config(config_path)?;
    let store = runtime::open_store(&config).await?;

    let swept = store.sweep_expired().await?;
    println!("🧹 Deactivated {swept} expired conversation(s)");

    if watch {
        let interval = Duration::from_secs(config.conversation.sweep_interval_secs.max(1));
        println!("   Sweeping every {}s. Press Ctrl+C to stop.", interval.as_secs());
        let handle = spawn_expiry_sweeper(store, interval);
        tokio::signal::ctrl_c().await?;
        handle.abort();
        println!("   Stopped.");
    }

    Ok(())
}
