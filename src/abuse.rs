//! Abuse Detection
//!
//! Four independent heuristics evaluated over the trailing slice of a key's
//! history every time a request is recorded. Findings are observational:
//! they go to the abuse log (and the operator's logs) and never deny the
//! request that triggered the evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::config::DetectorConfig;
use crate::history::RequestRecord;

/// Kind of suspicious behavior a heuristic flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// High request volume with a dense trailing burst.
    RapidRequests,
    /// Failure ratio far above normal.
    FailedRequests,
    /// Many distinct user agents from one key.
    SuspiciousPattern,
    /// Heavy traffic against expensive endpoints.
    ResourceExhaustion,
}

/// How urgent a finding is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A single detector finding. Append-only; retained for a rolling 24 hours.
#[derive(Debug, Clone, Serialize)]
pub struct AbusePattern {
    /// Which heuristic fired.
    pub kind: PatternKind,

    /// Severity of the finding.
    pub severity: Severity,

    /// The key whose behavior triggered the finding.
    pub key: String,

    /// Human-readable summary for operators.
    pub description: String,

    /// Wall-clock detection time.
    pub detected_at: DateTime<Utc>,

    /// Structured evidence backing the finding.
    pub evidence: serde_json::Value,

    /// Monotonic detection time, used for retention.
    #[serde(skip)]
    pub detected_mono: Instant,
}

/// Rolling log of detector findings.
#[derive(Debug, Clone, Default)]
pub struct AbuseLog {
    patterns: Arc<RwLock<Vec<AbusePattern>>>,
}

impl AbuseLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finding.
    pub async fn append(&self, pattern: AbusePattern) {
        self.patterns.write().await.push(pattern);
    }

    /// Findings, optionally filtered by severity.
    pub async fn patterns(&self, severity: Option<Severity>) -> Vec<AbusePattern> {
        let patterns = self.patterns.read().await;
        match severity {
            Some(severity) => patterns
                .iter()
                .filter(|p| p.severity == severity)
                .cloned()
                .collect(),
            None => patterns.clone(),
        }
    }

    /// Number of retained findings.
    pub async fn count(&self) -> usize {
        self.patterns.read().await.len()
    }

    /// Drop findings detected at or before `horizon`. Returns how many.
    pub async fn prune(&self, horizon: Instant) -> usize {
        let mut patterns = self.patterns.write().await;
        let before = patterns.len();
        patterns.retain(|p| p.detected_mono > horizon);
        before - patterns.len()
    }

    /// Remove everything.
    pub async fn clear(&self) {
        self.patterns.write().await.clear();
    }
}

/// Evaluates a key's recent history against the configured heuristics.
#[derive(Debug, Clone)]
pub struct AbuseDetector {
    config: DetectorConfig,
}

impl AbuseDetector {
    /// Create a detector with the given thresholds.
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Run every heuristic over `history` and return the findings.
    ///
    /// `history` is the full unfiltered log for `key`; each heuristic looks
    /// only at the slice inside the evaluation window. Pure computation,
    /// no shared state.
    pub fn evaluate(
        &self,
        key: &str,
        history: &[RequestRecord],
        endpoint: &str,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Vec<AbusePattern> {
        let window_start = now
            .checked_sub(self.config.evaluation_window)
            .unwrap_or(now);
        let recent: Vec<&RequestRecord> = history
            .iter()
            .filter(|r| r.timestamp > window_start)
            .collect();

        let mut findings = Vec::new();

        if let Some(p) = self.check_rapid_requests(key, &recent, endpoint, now, now_utc) {
            findings.push(p);
        }
        if let Some(p) = self.check_failed_requests(key, &recent, now, now_utc) {
            findings.push(p);
        }
        if let Some(p) = self.check_suspicious_pattern(key, &recent, now, now_utc) {
            findings.push(p);
        }
        if let Some(p) = self.check_resource_exhaustion(key, &recent, endpoint, now, now_utc) {
            findings.push(p);
        }

        findings
    }

    fn check_rapid_requests(
        &self,
        key: &str,
        recent: &[&RequestRecord],
        endpoint: &str,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Option<AbusePattern> {
        if recent.len() < self.config.rapid_min_requests {
            return None;
        }

        let burst_start = now
            .checked_sub(self.config.rapid_burst_window)
            .unwrap_or(now);
        let burst_count = recent
            .iter()
            .filter(|r| r.timestamp > burst_start)
            .count();

        if burst_count < self.config.rapid_burst_requests {
            return None;
        }

        Some(AbusePattern {
            kind: PatternKind::RapidRequests,
            severity: Severity::High,
            key: key.to_string(),
            description: format!(
                "{} requests in the last {}s",
                burst_count,
                self.config.rapid_burst_window.as_secs()
            ),
            detected_at: now_utc,
            evidence: json!({
                "request_count": burst_count,
                "time_window_ms": self.config.rapid_burst_window.as_millis() as u64,
                "endpoint": endpoint,
            }),
            detected_mono: now,
        })
    }

    fn check_failed_requests(
        &self,
        key: &str,
        recent: &[&RequestRecord],
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Option<AbusePattern> {
        let total = recent.len();
        if total < self.config.failed_min_requests {
            return None;
        }

        let failed = recent.iter().filter(|r| !r.success).count();
        let failure_rate = failed as f64 / total as f64;

        if failure_rate <= self.config.failure_ratio_threshold {
            return None;
        }

        Some(AbusePattern {
            kind: PatternKind::FailedRequests,
            severity: Severity::Medium,
            key: key.to_string(),
            description: format!(
                "{:.0}% of {} recent requests failed",
                failure_rate * 100.0,
                total
            ),
            detected_at: now_utc,
            evidence: json!({
                "failure_rate": failure_rate,
                "total_requests": total,
                "failed_requests": failed,
            }),
            detected_mono: now,
        })
    }

    fn check_suspicious_pattern(
        &self,
        key: &str,
        recent: &[&RequestRecord],
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Option<AbusePattern> {
        let user_agents: HashSet<&str> = recent
            .iter()
            .filter_map(|r| r.user_agent.as_deref())
            .filter(|ua| !ua.is_empty())
            .collect();

        if user_agents.len() <= self.config.max_distinct_user_agents {
            return None;
        }

        let mut agents: Vec<&str> = user_agents.into_iter().collect();
        agents.sort_unstable();

        Some(AbusePattern {
            kind: PatternKind::SuspiciousPattern,
            severity: Severity::Medium,
            key: key.to_string(),
            description: format!("{} distinct user agents from one key", agents.len()),
            detected_at: now_utc,
            evidence: json!({
                "user_agents": agents,
                "request_count": recent.len(),
            }),
            detected_mono: now,
        })
    }

    fn check_resource_exhaustion(
        &self,
        key: &str,
        recent: &[&RequestRecord],
        endpoint: &str,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Option<AbusePattern> {
        if !self
            .config
            .resource_endpoints
            .iter()
            .any(|e| e.as_str() == endpoint)
        {
            return None;
        }

        let resource_requests = recent
            .iter()
            .filter(|r| self.config.resource_endpoints.iter().any(|e| *e == r.endpoint))
            .count();

        if resource_requests < self.config.resource_min_requests {
            return None;
        }

        Some(AbusePattern {
            kind: PatternKind::ResourceExhaustion,
            severity: Severity::High,
            key: key.to_string(),
            description: format!(
                "{} requests to expensive endpoints in the evaluation window",
                resource_requests
            ),
            detected_at: now_utc,
            evidence: json!({
                "resource_requests": resource_requests,
                "endpoints": self.config.resource_endpoints,
            }),
            detected_mono: now,
        })
    }
}
