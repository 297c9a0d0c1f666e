//! Block Registry
//!
//! Map of key to block-expiry instant. Expiry is lazy: an entry past its
//! deadline reads as "not blocked" immediately, but is only physically
//! removed by the janitor sweep (or an explicit unblock).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Operator-facing view of an active block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEntry {
    /// The blocked key.
    pub key: String,

    /// Wall-clock time the block lifts.
    pub blocked_until: DateTime<Utc>,

    /// Seconds remaining until the block lifts.
    pub remaining_secs: u64,
}

/// Registry of temporarily blocked keys.
#[derive(Debug, Clone, Default)]
pub struct BlockRegistry {
    blocks: Arc<RwLock<HashMap<String, Instant>>>,
}

impl BlockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `key` until `now + duration`. Extends or shortens any existing
    /// block for the same key.
    pub async fn block(&self, key: &str, duration: Duration, now: Instant) {
        let mut blocks = self.blocks.write().await;
        blocks.insert(key.to_string(), now + duration);
    }

    /// Lift a block explicitly.
    pub async fn unblock(&self, key: &str) -> bool {
        let mut blocks = self.blocks.write().await;
        blocks.remove(key).is_some()
    }

    /// Whether `key` is currently blocked. Expired entries read as absent.
    pub async fn is_blocked(&self, key: &str, now: Instant) -> bool {
        let blocks = self.blocks.read().await;
        matches!(blocks.get(key), Some(&until) if until > now)
    }

    /// Time remaining on a key's block, if one is active.
    pub async fn remaining(&self, key: &str, now: Instant) -> Option<Duration> {
        let blocks = self.blocks.read().await;
        blocks
            .get(key)
            .and_then(|&until| (until > now).then(|| until - now))
    }

    /// Active blocks as operator-facing entries.
    pub async fn active_entries(&self, now: Instant, now_utc: DateTime<Utc>) -> Vec<BlockEntry> {
        let blocks = self.blocks.read().await;
        blocks
            .iter()
            .filter(|(_, &until)| until > now)
            .map(|(key, &until)| {
                let remaining = until - now;
                BlockEntry {
                    key: key.clone(),
                    blocked_until: now_utc
                        + chrono::Duration::from_std(remaining)
                            .unwrap_or_else(|_| chrono::Duration::zero()),
                    remaining_secs: remaining.as_secs(),
                }
            })
            .collect()
    }

    /// Number of active blocks.
    pub async fn active_count(&self, now: Instant) -> usize {
        let blocks = self.blocks.read().await;
        blocks.values().filter(|&&until| until > now).count()
    }

    /// Physically remove expired entries. Returns how many were removed.
    pub async fn purge_expired(&self, now: Instant) -> usize {
        let mut blocks = self.blocks.write().await;
        let before = blocks.len();
        blocks.retain(|_, &mut until| until > now);
        before - blocks.len()
    }

    /// Remove everything.
    pub async fn clear(&self) {
        self.blocks.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_block_and_check() {
        let registry = BlockRegistry::new();
        let now = Instant::now();

        registry.block("key-1", Duration::from_secs(60), now).await;

        assert!(registry.is_blocked("key-1", now).await);
        assert!(!registry.is_blocked("key-2", now).await);
    }

    #[tokio::test]
    async fn test_lazy_expiry() {
        let registry = BlockRegistry::new();
        let now = Instant::now();

        registry.block("key-1", Duration::from_secs(60), now).await;

        // Past the deadline the entry reads as absent even though it is
        // still physically present.
        let later = now + Duration::from_secs(61);
        assert!(!registry.is_blocked("key-1", later).await);
        assert_eq!(registry.active_count(later).await, 0);

        let removed = registry.purge_expired(later).await;
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_remaining() {
        let registry = BlockRegistry::new();
        let now = Instant::now();

        registry.block("key-1", Duration::from_secs(900), now).await;

        let remaining = registry
            .remaining("key-1", now + Duration::from_secs(300))
            .await;
        assert_eq!(remaining, Some(Duration::from_secs(600)));

        assert!(registry.remaining("key-2", now).await.is_none());
    }

    #[tokio::test]
    async fn test_unblock() {
        let registry = BlockRegistry::new();
        let now = Instant::now();

        registry.block("key-1", Duration::from_secs(60), now).await;
        assert!(registry.unblock("key-1").await);
        assert!(!registry.is_blocked("key-1", now).await);

        // Unblocking an unknown key is a no-op.
        assert!(!registry.unblock("key-1").await);
    }

    #[tokio::test]
    async fn test_active_entries() {
        let registry = BlockRegistry::new();
        let now = Instant::now();
        let now_utc = Utc::now();

        registry.block("live", Duration::from_secs(120), now).await;
        registry.block("dead", Duration::from_secs(10), now).await;

        let later = now + Duration::from_secs(30);
        let entries = registry.active_entries(later, now_utc).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "live");
        assert_eq!(entries[0].remaining_secs, 90);
    }

    #[tokio::test]
    async fn test_reblock_overwrites() {
        let registry = BlockRegistry::new();
        let now = Instant::now();

        registry.block("key-1", Duration::from_secs(60), now).await;
        registry.block("key-1", Duration::from_secs(10), now).await;

        assert!(!registry.is_blocked("key-1", now + Duration::from_secs(30)).await);
    }
}
