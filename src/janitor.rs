//! Janitor
//!
//! Periodic sweep that bounds memory growth: request records past the
//! retention horizon are evicted (emptied keys removed outright), expired
//! blocks are physically deleted, and abuse patterns older than the abuse
//! retention horizon are dropped. Reads never evict; this is the only bulk
//! eviction path.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::abuse::AbuseLog;
use crate::block::BlockRegistry;
use crate::clock::Clock;
use crate::history::HistoryStore;

/// What a single sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Request records evicted from per-key histories.
    pub records_evicted: usize,

    /// Expired block entries removed.
    pub blocks_removed: usize,

    /// Abuse patterns dropped.
    pub patterns_dropped: usize,
}

/// Periodic garbage collector over the engine's shared state.
#[derive(Debug, Clone)]
pub struct Janitor {
    history: HistoryStore,
    blocks: BlockRegistry,
    abuse: AbuseLog,
    clock: Arc<dyn Clock>,
    history_retention: Duration,
    abuse_retention: Duration,
}

impl Janitor {
    /// Create a janitor over the given state handles.
    pub fn new(
        history: HistoryStore,
        blocks: BlockRegistry,
        abuse: AbuseLog,
        clock: Arc<dyn Clock>,
        history_retention: Duration,
        abuse_retention: Duration,
    ) -> Self {
        Self {
            history,
            blocks,
            abuse,
            clock,
            history_retention,
            abuse_retention,
        }
    }

    /// Run one sweep now.
    pub async fn sweep(&self) -> SweepReport {
        let now = self.clock.now();

        let records_evicted = match now.checked_sub(self.history_retention) {
            Some(horizon) => self.history.prune(horizon).await,
            None => 0,
        };
        let blocks_removed = self.blocks.purge_expired(now).await;
        let patterns_dropped = match now.checked_sub(self.abuse_retention) {
            Some(horizon) => self.abuse.prune(horizon).await,
            None => 0,
        };

        let report = SweepReport {
            records_evicted,
            blocks_removed,
            patterns_dropped,
        };

        if report != SweepReport::default() {
            tracing::debug!(
                records_evicted = report.records_evicted,
                blocks_removed = report.blocks_removed,
                patterns_dropped = report.patterns_dropped,
                "janitor sweep completed"
            );
        }

        report
    }

    /// Spawn the periodic sweep loop on the current runtime.
    pub fn spawn(self, interval: Duration) -> JanitorHandle {
        let shutdown = Arc::new(Notify::new());
        let stop = Arc::clone(&shutdown);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would sweep an empty engine.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                    _ = stop.notified() => {
                        tracing::debug!("janitor stopping");
                        break;
                    }
                }
            }
        });

        JanitorHandle { shutdown, task }
    }
}

/// Handle to a running janitor loop.
#[derive(Debug)]
pub struct JanitorHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl JanitorHandle {
    /// Stop the sweep loop. Safe to call more than once.
    pub fn stop(&self) {
        self.shutdown.notify_one();
        self.task.abort();
    }
}

impl Drop for JanitorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::history::{RequestMetadata, RequestRecord};

    fn janitor_with_clock(clock: Arc<ManualClock>) -> Janitor {
        Janitor::new(
            HistoryStore::new(),
            BlockRegistry::new(),
            AbuseLog::new(),
            clock,
            Duration::from_secs(3600),
            Duration::from_secs(24 * 3600),
        )
    }

    #[tokio::test]
    async fn test_sweep_evicts_stale_history() {
        let clock = Arc::new(ManualClock::new());
        let janitor = janitor_with_clock(Arc::clone(&clock));

        janitor
            .history
            .append(
                "stale",
                RequestRecord::new(clock.now(), true, "api", RequestMetadata::default()),
            )
            .await;

        clock.advance(Duration::from_secs(3601));
        let report = janitor.sweep().await;

        assert_eq!(report.records_evicted, 1);
        assert_eq!(janitor.history.key_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_history() {
        let clock = Arc::new(ManualClock::new());
        let janitor = janitor_with_clock(Arc::clone(&clock));

        janitor
            .history
            .append(
                "fresh",
                RequestRecord::new(clock.now(), true, "api", RequestMetadata::default()),
            )
            .await;

        clock.advance(Duration::from_secs(1800));
        let report = janitor.sweep().await;

        assert_eq!(report.records_evicted, 0);
        assert_eq!(janitor.history.key_count().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_purges_expired_blocks() {
        let clock = Arc::new(ManualClock::new());
        let janitor = janitor_with_clock(Arc::clone(&clock));

        janitor
            .blocks
            .block("key-1", Duration::from_secs(60), clock.now())
            .await;

        clock.advance(Duration::from_secs(120));
        let report = janitor.sweep().await;
        assert_eq!(report.blocks_removed, 1);
    }

    #[tokio::test]
    async fn test_spawned_janitor_stops_cleanly() {
        let clock = Arc::new(ManualClock::new());
        let janitor = janitor_with_clock(clock);

        let handle = janitor.spawn(Duration::from_secs(300));
        handle.stop();
        // Stopping twice is fine.
        handle.stop();
    }
}
