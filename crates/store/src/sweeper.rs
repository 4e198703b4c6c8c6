//! Periodic expiry sweep.

use careline_core::store::ConversationStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Run `sweep_expired` every `interval` until the handle is aborted.
///
/// The first sweep happens one full interval after spawning. Failures are
/// logged and the loop keeps going.
pub fn spawn_expiry_sweeper(
    store: Arc<dyn ConversationStore>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.sweep_expired().await {
                Ok(0) => debug!(store = store.name(), "Expiry sweep: nothing to do"),
                Ok(n) => info!(store = store.name(), swept = n, "Expiry sweep deactivated states"),
                Err(e) => warn!(store = store.name(), error = %e, "Expiry sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;
    use careline_core::ConversationContext;

    #[tokio::test(start_paused = true)]
    async fn sweeper_deactivates_expired_states() {
        let store = Arc::new(InMemoryStore::new().with_ttl_minutes(0));
        let state = store
            .get_or_create("p-1", "0812", ConversationContext::GeneralInquiry)
            .await
            .unwrap();
        assert!(store.get(&state.id).await.unwrap().is_active);

        let handle = spawn_expiry_sweeper(store.clone(), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(!store.get(&state.id).await.unwrap().is_active);
        handle.abort();
    }
}
