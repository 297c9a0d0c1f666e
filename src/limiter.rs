//! Rate Limiter Facade
//!
//! Composes the history store, block registry, abuse detector, and janitor
//! behind the public check/record surface. One instance owns all mutable
//! state; nothing outside this module mutates it directly.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::abuse::{AbuseDetector, AbuseLog, AbusePattern, Severity};
use crate::backoff;
use crate::block::{BlockEntry, BlockRegistry};
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, RateLimitConfig};
use crate::error::LimiterError;
use crate::history::{HistoryStore, RequestMetadata, RequestRecord};
use crate::janitor::{Janitor, JanitorHandle, SweepReport};

/// Outcome of a rate limit check. Computed fresh on every call, never stored.
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    /// Whether the request may proceed.
    pub allowed: bool,

    /// Qualifying requests still available in the current window.
    pub remaining: u32,

    /// When the current window ends.
    pub reset_time: Instant,

    /// Seconds to wait before retrying (denials only).
    pub retry_after_secs: Option<u64>,
}

impl RateLimitResult {
    /// Create an allowed result.
    pub fn allowed(remaining: u32, reset_time: Instant) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_time,
            retry_after_secs: None,
        }
    }

    /// Create a denied result.
    pub fn denied(retry_after_secs: u64, reset_time: Instant) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_time,
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

/// Aggregate engine counters for dashboards and operators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Statistics {
    /// Keys with at least one retained request record.
    pub total_keys: usize,

    /// Keys currently under an active block.
    pub blocked_keys: usize,

    /// Abuse patterns currently retained.
    pub abuse_patterns: usize,

    /// Request records newer than the history retention horizon.
    pub requests_last_hour: usize,
}

/// Per-key quota enforcement and abuse detection engine.
///
/// Construct one per isolation domain and inject it into whatever owns
/// request handling; there is deliberately no global instance.
#[derive(Debug)]
pub struct RateLimiter {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    history: HistoryStore,
    blocks: BlockRegistry,
    abuse: AbuseLog,
    detector: AbuseDetector,
    janitor: Janitor,
    janitor_handle: std::sync::Mutex<Option<JanitorHandle>>,
}

impl RateLimiter {
    /// Create an engine on the system clock and start its janitor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an engine with an injected clock (tests use [`crate::clock::ManualClock`]).
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let history = HistoryStore::new();
        let blocks = BlockRegistry::new();
        let abuse = AbuseLog::new();
        let detector = AbuseDetector::new(config.detector.clone());

        let janitor = Janitor::new(
            history.clone(),
            blocks.clone(),
            abuse.clone(),
            Arc::clone(&clock),
            config.history_retention,
            config.abuse_retention,
        );
        let handle = janitor.clone().spawn(config.janitor_interval);

        Self {
            config,
            clock,
            history,
            blocks,
            abuse,
            detector,
            janitor,
            janitor_handle: std::sync::Mutex::new(Some(handle)),
        }
    }

    /// Check whether `key` may make a request under `config`.
    ///
    /// Consults the block registry first; only unblocked keys reach the
    /// window arithmetic. Quota exhaustion with a configured
    /// `block_duration` installs a block as a side effect of this call.
    pub async fn check_rate_limit(
        &self,
        key: &str,
        config: &RateLimitConfig,
        endpoint: &str,
    ) -> Result<RateLimitResult, LimiterError> {
        config.validate()?;
        let now = self.clock.now();

        if let Some(remaining) = self.blocks.remaining(key, now).await {
            return Ok(RateLimitResult::denied(
                remaining.as_secs_f64().ceil() as u64,
                now + remaining,
            ));
        }

        let window_start = now.checked_sub(config.window).unwrap_or(now);
        let count = self.history.qualifying_count(key, window_start, config).await;
        let reset_time = window_start + config.window;

        if count >= config.max_requests {
            self.maybe_block_on_exhaustion(key, config, endpoint, now).await;
            return Ok(RateLimitResult::denied(
                Self::window_retry_secs(config),
                reset_time,
            ));
        }

        Ok(RateLimitResult::allowed(
            config.max_requests - count,
            reset_time,
        ))
    }

    /// Record a completed request's outcome and run abuse detection.
    ///
    /// Detection is observational: findings go to the abuse log and the
    /// operator's logs, and never affect this call's success.
    pub async fn record_request(
        &self,
        key: &str,
        success: bool,
        endpoint: &str,
        metadata: Option<RequestMetadata>,
    ) {
        let now = self.clock.now();
        let record = RequestRecord::new(
            now,
            success,
            endpoint,
            metadata.unwrap_or_default(),
        );

        let snapshot = self.history.append(key, record).await;
        self.detect(key, &snapshot, endpoint, now).await;
    }

    /// Atomic check-and-record: count the window and append the request
    /// under a single lock acquisition, closing the check-then-act race
    /// between [`Self::check_rate_limit`] and [`Self::record_request`].
    ///
    /// The admitted record is stored as successful; call sites that need
    /// to record failures after the fact use the two-call surface.
    pub async fn try_consume(
        &self,
        key: &str,
        config: &RateLimitConfig,
        endpoint: &str,
        metadata: Option<RequestMetadata>,
    ) -> Result<RateLimitResult, LimiterError> {
        config.validate()?;
        let now = self.clock.now();

        if let Some(remaining) = self.blocks.remaining(key, now).await {
            return Ok(RateLimitResult::denied(
                remaining.as_secs_f64().ceil() as u64,
                now + remaining,
            ));
        }

        let window_start = now.checked_sub(config.window).unwrap_or(now);
        let reset_time = window_start + config.window;
        let record = RequestRecord::new(now, true, endpoint, metadata.unwrap_or_default());

        let (admitted, count) = self
            .history
            .count_and_admit(key, window_start, config, record)
            .await;

        if !admitted {
            self.maybe_block_on_exhaustion(key, config, endpoint, now).await;
            return Ok(RateLimitResult::denied(
                Self::window_retry_secs(config),
                reset_time,
            ));
        }

        let snapshot = self.history.snapshot(key).await;
        self.detect(key, &snapshot, endpoint, now).await;

        Ok(RateLimitResult::allowed(
            config.max_requests - count - 1,
            reset_time,
        ))
    }

    /// Run `operation` under the rate limit for `key`.
    ///
    /// Denials short-circuit with [`LimiterError::RateLimited`] before the
    /// operation runs; otherwise the operation's outcome is recorded and
    /// its error, if any, surfaces as [`LimiterError::Operation`].
    pub async fn call<F, Fut, T>(
        &self,
        key: &str,
        config: &RateLimitConfig,
        endpoint: &str,
        operation: F,
    ) -> Result<T, LimiterError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let check = self.check_rate_limit(key, config, endpoint).await?;
        if !check.allowed {
            return Err(LimiterError::RateLimited {
                retry_after_secs: check.retry_after_secs.unwrap_or(0),
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_request(key, true, endpoint, None).await;
                Ok(value)
            }
            Err(err) => {
                self.record_request(key, false, endpoint, None).await;
                Err(LimiterError::Operation(err))
            }
        }
    }

    /// Check `key` against the general API preset.
    pub async fn check_api(&self, key: &str) -> Result<RateLimitResult, LimiterError> {
        self.check_rate_limit(key, &RateLimitConfig::api(), "api").await
    }

    /// Check `key` against the AI inference preset.
    pub async fn check_ai_inference(&self, key: &str) -> Result<RateLimitResult, LimiterError> {
        self.check_rate_limit(key, &RateLimitConfig::ai_inference(), "ai-inference")
            .await
    }

    /// Check `key` against the file upload preset.
    pub async fn check_file_upload(&self, key: &str) -> Result<RateLimitResult, LimiterError> {
        self.check_rate_limit(key, &RateLimitConfig::file_upload(), "file-upload")
            .await
    }

    /// Check `key` against the search preset.
    pub async fn check_search(&self, key: &str) -> Result<RateLimitResult, LimiterError> {
        self.check_rate_limit(key, &RateLimitConfig::search(), "search")
            .await
    }

    /// Check `key` against the authentication preset (lockout on exhaustion).
    pub async fn check_auth(&self, key: &str) -> Result<RateLimitResult, LimiterError> {
        self.check_rate_limit(key, &RateLimitConfig::auth(), "auth").await
    }

    /// Block `key` for `duration` (engine default when `None`).
    pub async fn block_key(&self, key: &str, duration: Option<Duration>) {
        let duration = duration.unwrap_or(self.config.default_block_duration);
        self.blocks.block(key, duration, self.clock.now()).await;
        tracing::info!(key, duration_secs = duration.as_secs(), "key blocked");
    }

    /// Lift a block explicitly. Returns whether a block was present.
    pub async fn unblock_key(&self, key: &str) -> bool {
        let removed = self.blocks.unblock(key).await;
        if removed {
            tracing::info!(key, "key unblocked");
        }
        removed
    }

    /// Whether `key` is currently blocked.
    pub async fn is_blocked(&self, key: &str) -> bool {
        self.blocks.is_blocked(key, self.clock.now()).await
    }

    /// Active blocks, for operators.
    pub async fn blocked_keys(&self) -> Vec<BlockEntry> {
        self.blocks
            .active_entries(self.clock.now(), self.clock.now_utc())
            .await
    }

    /// Retained abuse patterns, optionally filtered by severity.
    pub async fn abuse_patterns(&self, severity: Option<Severity>) -> Vec<AbusePattern> {
        self.abuse.patterns(severity).await
    }

    /// Aggregate counters over the engine's current state.
    pub async fn statistics(&self) -> Statistics {
        let now = self.clock.now();
        let hour_ago = now.checked_sub(self.config.history_retention).unwrap_or(now);

        Statistics {
            total_keys: self.history.key_count().await,
            blocked_keys: self.blocks.active_count(now).await,
            abuse_patterns: self.abuse.count().await,
            requests_last_hour: self.history.records_since(hour_ago).await,
        }
    }

    /// Retry delay for the given attempt (1-based), with jitter.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        backoff::calculate_backoff(attempt, backoff::DEFAULT_BASE_DELAY)
    }

    /// Force a janitor pass now.
    pub async fn sweep(&self) -> SweepReport {
        self.janitor.sweep().await
    }

    /// Clear all state. Intended for test isolation; the janitor keeps
    /// running.
    pub async fn reset(&self) {
        self.history.clear().await;
        self.blocks.clear().await;
        self.abuse.clear().await;
    }

    /// Stop the janitor and clear all state.
    pub async fn destroy(&self) {
        if let Some(handle) = self.janitor_handle.lock().unwrap().take() {
            handle.stop();
        }
        self.reset().await;
    }

    async fn maybe_block_on_exhaustion(
        &self,
        key: &str,
        config: &RateLimitConfig,
        endpoint: &str,
        now: Instant,
    ) {
        if let Some(duration) = config.block_duration {
            self.blocks.block(key, duration, now).await;
            tracing::warn!(
                key,
                endpoint,
                duration_secs = duration.as_secs(),
                "quota exhausted, key blocked"
            );
        }
    }

    async fn detect(&self, key: &str, snapshot: &[RequestRecord], endpoint: &str, now: Instant) {
        let findings = self
            .detector
            .evaluate(key, snapshot, endpoint, now, self.clock.now_utc());

        for pattern in findings {
            tracing::warn!(
                key,
                kind = ?pattern.kind,
                severity = ?pattern.severity,
                description = %pattern.description,
                "abuse pattern detected"
            );

            if pattern.severity == Severity::Critical {
                self.blocks
                    .block(key, self.config.detector.critical_block_duration, now)
                    .await;
                tracing::warn!(key, "critical pattern, key auto-blocked");
            }

            self.abuse.append(pattern).await;
        }
    }

    fn window_retry_secs(config: &RateLimitConfig) -> u64 {
        config.window.as_secs_f64().ceil() as u64
    }
}
