//! Content-addressed cache for generated replies.
//!
//! Keys are SHA-256 over `(intent, patient fingerprint)`. Only replies that
//! already passed the safety filter are stored, and hits are re-checked by
//! the caller before use.

use careline_config::CacheConfig;
use careline_core::Intent;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

struct CacheEntry {
    reply: String,
    inserted_at: Instant,
}

pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    min_confidence: f32,
    cacheable: HashSet<Intent>,
}

impl ResponseCache {
    pub fn new(
        ttl: Duration,
        max_entries: usize,
        min_confidence: f32,
        cacheable: impl IntoIterator<Item = Intent>,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            min_confidence,
            cacheable: cacheable.into_iter().collect(),
        }
    }

    /// `None` when caching is disabled.
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let intents = config.cacheable_intents.iter().filter_map(|name| {
            name.parse::<Intent>()
                .inspect_err(|e| warn!(error = %e, "Ignoring cacheable intent"))
                .ok()
        });
        Some(Self::new(
            Duration::from_secs(config.ttl_secs),
            config.max_entries,
            config.min_confidence,
            intents,
        ))
    }

    pub fn is_cacheable(&self, intent: Intent, confidence: f32) -> bool {
        self.cacheable.contains(&intent) && confidence >= self.min_confidence
    }

    pub fn key(intent: Intent, fingerprint: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(intent.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(fingerprint.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                return Some(entry.reply.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
            debug!(key, "Cache entry expired");
        }
        None
    }

    pub fn put(&self, key: String, reply: String) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let ttl = self.ttl;
            entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            CacheEntry {
                reply,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ResponseCache {
        ResponseCache::new(
            Duration::from_secs(60),
            2,
            0.8,
            [Intent::ConfirmTaken, Intent::Help],
        )
    }

    #[test]
    fn keys_are_stable_hex() {
        let a = ResponseCache::key(Intent::ConfirmTaken, "sari|verified|morfin");
        let b = ResponseCache::key(Intent::ConfirmTaken, "sari|verified|morfin");
        let c = ResponseCache::key(Intent::Help, "sari|verified|morfin");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn cacheability_needs_intent_and_confidence() {
        let c = cache();
        assert!(c.is_cacheable(Intent::ConfirmTaken, 0.9));
        assert!(!c.is_cacheable(Intent::ConfirmTaken, 0.5));
        assert!(!c.is_cacheable(Intent::Inquiry, 0.99));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let c = cache();
        c.put("k".into(), "balasan".into());
        assert_eq!(c.get("k").as_deref(), Some("balasan"));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(c.get("k").is_none());
        assert!(c.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn oldest_entry_is_evicted_at_capacity() {
        let c = cache();
        c.put("a".into(), "1".into());
        tokio::time::advance(Duration::from_secs(1)).await;
        c.put("b".into(), "2".into());
        tokio::time::advance(Duration::from_secs(1)).await;
        c.put("c".into(), "3".into());
        assert_eq!(c.len(), 2);
        assert!(c.get("a").is_none());
        assert_eq!(c.get("c").as_deref(), Some("3"));
    }

    #[test]
    fn disabled_config_builds_nothing() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        assert!(ResponseCache::from_config(&config).is_none());
        assert!(ResponseCache::from_config(&CacheConfig {
            enabled: true,
            ..CacheConfig::default()
        })
        .is_some());
    }
}
