//! Request History Store
//!
//! Append-only per-key log of recent request records. The store owns the
//! only copy of each record; readers get clones so the detector always sees
//! a fully-consistent snapshot while other tasks keep appending.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::config::RateLimitConfig;

/// Optional caller-supplied request attributes, fed into abuse detection.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    /// Client user-agent string, if known.
    pub user_agent: Option<String>,

    /// Source address the request arrived from, if known.
    pub source_address: Option<String>,
}

impl RequestMetadata {
    /// Metadata carrying only a user agent.
    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: Some(user_agent.into()),
            source_address: None,
        }
    }
}

/// A single recorded request outcome. Immutable once appended.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// When the request was recorded.
    pub timestamp: Instant,

    /// Whether the underlying operation succeeded.
    pub success: bool,

    /// Endpoint the request targeted.
    pub endpoint: String,

    /// Client user agent, if supplied.
    pub user_agent: Option<String>,

    /// Source address, if supplied.
    pub source_address: Option<String>,
}

impl RequestRecord {
    /// Create a record at the given instant.
    pub fn new(
        timestamp: Instant,
        success: bool,
        endpoint: impl Into<String>,
        metadata: RequestMetadata,
    ) -> Self {
        Self {
            timestamp,
            success,
            endpoint: endpoint.into(),
            user_agent: metadata.user_agent,
            source_address: metadata.source_address,
        }
    }

    /// Whether this record counts toward the quota under the given filters.
    pub fn qualifies(&self, window_start: Instant, config: &RateLimitConfig) -> bool {
        if self.timestamp <= window_start {
            return false;
        }
        if config.skip_successful && self.success {
            return false;
        }
        if config.skip_failed && !self.success {
            return false;
        }
        true
    }
}

/// In-memory per-key request history.
///
/// Insertion order is chronological (the engine only ever appends "now").
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    histories: Arc<RwLock<HashMap<String, Vec<RequestRecord>>>>,
}

impl HistoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return a snapshot of the key's full history,
    /// taken under the same lock acquisition as the append.
    pub async fn append(&self, key: &str, record: RequestRecord) -> Vec<RequestRecord> {
        let mut histories = self.histories.write().await;
        let history = histories.entry(key.to_string()).or_default();
        history.push(record);
        history.clone()
    }

    /// Count records in `(window_start, now]` that pass the skip filters.
    pub async fn qualifying_count(
        &self,
        key: &str,
        window_start: Instant,
        config: &RateLimitConfig,
    ) -> u32 {
        let histories = self.histories.read().await;
        match histories.get(key) {
            Some(history) => history
                .iter()
                .filter(|r| r.qualifies(window_start, config))
                .count() as u32,
            None => 0,
        }
    }

    /// Atomically count qualifying records and, if the quota is not yet
    /// exhausted, append `record`. Returns `(admitted, count_before_append)`.
    ///
    /// This is the single-lock primitive behind `try_consume`; the separate
    /// count and append paths above exist for outcome-dependent call sites.
    pub async fn count_and_admit(
        &self,
        key: &str,
        window_start: Instant,
        config: &RateLimitConfig,
        record: RequestRecord,
    ) -> (bool, u32) {
        let mut histories = self.histories.write().await;
        let history = histories.entry(key.to_string()).or_default();
        let count = history
            .iter()
            .filter(|r| r.qualifies(window_start, config))
            .count() as u32;

        if count >= config.max_requests {
            return (false, count);
        }

        history.push(record);
        (true, count)
    }

    /// Snapshot a key's full, unfiltered history.
    pub async fn snapshot(&self, key: &str) -> Vec<RequestRecord> {
        let histories = self.histories.read().await;
        histories.get(key).cloned().unwrap_or_default()
    }

    /// Drop records at or before `horizon`; remove keys left empty.
    /// Returns the number of records evicted.
    pub async fn prune(&self, horizon: Instant) -> usize {
        let mut histories = self.histories.write().await;
        let mut evicted = 0;

        histories.retain(|_, history| {
            let before = history.len();
            history.retain(|r| r.timestamp > horizon);
            evicted += before - history.len();
            !history.is_empty()
        });

        evicted
    }

    /// Number of keys currently tracked.
    pub async fn key_count(&self) -> usize {
        self.histories.read().await.len()
    }

    /// Total records newer than `cutoff`, across all keys.
    pub async fn records_since(&self, cutoff: Instant) -> usize {
        let histories = self.histories.read().await;
        histories
            .values()
            .map(|h| h.iter().filter(|r| r.timestamp > cutoff).count())
            .sum()
    }

    /// Remove everything.
    pub async fn clear(&self) {
        self.histories.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record_at(timestamp: Instant, success: bool) -> RequestRecord {
        RequestRecord::new(timestamp, success, "api", RequestMetadata::default())
    }

    #[tokio::test]
    async fn test_append_and_snapshot() {
        let store = HistoryStore::new();
        let now = Instant::now();

        store.append("key-1", record_at(now, true)).await;
        store.append("key-1", record_at(now, false)).await;

        let snapshot = store.snapshot("key-1").await;
        assert_eq!(snapshot.len(), 2);
        assert!(store.snapshot("key-2").await.is_empty());
    }

    #[tokio::test]
    async fn test_qualifying_count_window_boundary() {
        let store = HistoryStore::new();
        let config = RateLimitConfig::new(10, Duration::from_secs(60));
        let start = Instant::now();

        // One record exactly at the boundary, one inside the window.
        store.append("key-1", record_at(start, true)).await;
        store
            .append("key-1", record_at(start + Duration::from_secs(30), true))
            .await;

        // Records with timestamp <= window_start are excluded.
        let count = store.qualifying_count("key-1", start, &config).await;
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_skip_successful_filter() {
        let store = HistoryStore::new();
        let config = RateLimitConfig::new(10, Duration::from_secs(60)).skip_successful();
        let start = Instant::now();
        let inside = start + Duration::from_secs(1);

        store.append("key-1", record_at(inside, true)).await;
        store.append("key-1", record_at(inside, false)).await;
        store.append("key-1", record_at(inside, false)).await;

        let count = store.qualifying_count("key-1", start, &config).await;
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_skip_failed_filter() {
        let store = HistoryStore::new();
        let config = RateLimitConfig::new(10, Duration::from_secs(60)).skip_failed();
        let start = Instant::now();
        let inside = start + Duration::from_secs(1);

        store.append("key-1", record_at(inside, true)).await;
        store.append("key-1", record_at(inside, false)).await;

        let count = store.qualifying_count("key-1", start, &config).await;
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_count_and_admit_enforces_quota() {
        let store = HistoryStore::new();
        let config = RateLimitConfig::new(2, Duration::from_secs(60));
        let start = Instant::now();
        let inside = start + Duration::from_secs(1);

        let (admitted, count) = store
            .count_and_admit("key-1", start, &config, record_at(inside, true))
            .await;
        assert!(admitted);
        assert_eq!(count, 0);

        let (admitted, count) = store
            .count_and_admit("key-1", start, &config, record_at(inside, true))
            .await;
        assert!(admitted);
        assert_eq!(count, 1);

        let (admitted, count) = store
            .count_and_admit("key-1", start, &config, record_at(inside, true))
            .await;
        assert!(!admitted);
        assert_eq!(count, 2);

        // The denied request was not appended.
        assert_eq!(store.snapshot("key-1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_prune_removes_empty_keys() {
        let store = HistoryStore::new();
        let start = Instant::now();

        store.append("old", record_at(start, true)).await;
        store
            .append("fresh", record_at(start + Duration::from_secs(7200), true))
            .await;

        let evicted = store.prune(start + Duration::from_secs(3600)).await;
        assert_eq!(evicted, 1);
        assert_eq!(store.key_count().await, 1);
        assert!(store.snapshot("old").await.is_empty());
        assert_eq!(store.snapshot("fresh").await.len(), 1);
    }

    #[tokio::test]
    async fn test_records_since() {
        let store = HistoryStore::new();
        let start = Instant::now();

        store.append("a", record_at(start, true)).await;
        store
            .append("a", record_at(start + Duration::from_secs(100), true))
            .await;
        store
            .append("b", record_at(start + Duration::from_secs(100), true))
            .await;

        assert_eq!(store.records_since(start + Duration::from_secs(50)).await, 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = HistoryStore::new();
        store.append("a", record_at(Instant::now(), true)).await;

        store.clear().await;
        assert_eq!(store.key_count().await, 0);
    }
}
