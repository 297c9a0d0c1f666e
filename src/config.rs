//! Rate Limit Configuration
//!
//! Per-call window configuration, category presets, and the detector
//! thresholds. All heuristic magic numbers live here as named,
//! overridable fields rather than constants buried in the detector.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LimiterError;

/// Category preset: general API traffic (100 requests / minute).
pub const DEFAULT_API_MAX_REQUESTS: u32 = 100;
/// Category preset: AI inference (20 requests / minute).
pub const DEFAULT_AI_INFERENCE_MAX_REQUESTS: u32 = 20;
/// Category preset: file uploads (10 requests / 5 minutes).
pub const DEFAULT_FILE_UPLOAD_MAX_REQUESTS: u32 = 10;
/// Category preset: search (50 requests / minute).
pub const DEFAULT_SEARCH_MAX_REQUESTS: u32 = 50;
/// Category preset: authentication (5 attempts / 5 minutes, 15 minute lockout).
pub const DEFAULT_AUTH_MAX_REQUESTS: u32 = 5;

/// Sliding-window configuration for a single rate limit check.
///
/// Supplied by the caller per invocation; the engine does not persist it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum qualifying requests allowed within the window.
    pub max_requests: u32,

    /// Sliding window length.
    pub window: Duration,

    /// If set, quota exhaustion installs a block for this duration.
    pub block_duration: Option<Duration>,

    /// Successful requests do not count toward the quota.
    pub skip_successful: bool,

    /// Failed requests do not count toward the quota.
    pub skip_failed: bool,
}

impl RateLimitConfig {
    /// Create a config with the given quota and window and no blocking.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            block_duration: None,
            skip_successful: false,
            skip_failed: false,
        }
    }

    /// Set the block duration applied on quota exhaustion.
    pub fn block_for(mut self, duration: Duration) -> Self {
        self.block_duration = Some(duration);
        self
    }

    /// Exclude successful requests from the quota count.
    pub fn skip_successful(mut self) -> Self {
        self.skip_successful = true;
        self
    }

    /// Exclude failed requests from the quota count.
    pub fn skip_failed(mut self) -> Self {
        self.skip_failed = true;
        self
    }

    /// General API traffic: 100 requests per minute.
    pub fn api() -> Self {
        Self::new(DEFAULT_API_MAX_REQUESTS, Duration::from_secs(60))
    }

    /// AI inference: 20 requests per minute.
    pub fn ai_inference() -> Self {
        Self::new(DEFAULT_AI_INFERENCE_MAX_REQUESTS, Duration::from_secs(60))
    }

    /// File uploads: 10 requests per 5 minutes.
    pub fn file_upload() -> Self {
        Self::new(DEFAULT_FILE_UPLOAD_MAX_REQUESTS, Duration::from_secs(300))
    }

    /// Search: 50 requests per minute.
    pub fn search() -> Self {
        Self::new(DEFAULT_SEARCH_MAX_REQUESTS, Duration::from_secs(60))
    }

    /// Authentication: 5 attempts per 5 minutes, 15 minute lockout on
    /// exhaustion.
    pub fn auth() -> Self {
        Self::new(DEFAULT_AUTH_MAX_REQUESTS, Duration::from_secs(300))
            .block_for(Duration::from_secs(900))
    }

    /// Reject non-positive quota or window values.
    ///
    /// The engine fails fast here instead of clamping; see DESIGN.md.
    pub fn validate(&self) -> Result<(), LimiterError> {
        if self.max_requests == 0 {
            return Err(LimiterError::InvalidConfig(
                "max_requests must be greater than zero".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(LimiterError::InvalidConfig(
                "window must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Thresholds for the abuse heuristics.
///
/// Defaults match the reference policy; every knob can be overridden via
/// environment variables (`KEYGATE_*`) or direct construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// History slice each evaluation looks at.
    pub evaluation_window: Duration,

    /// rapid_requests: minimum records in the evaluation window.
    pub rapid_min_requests: usize,

    /// rapid_requests: trailing burst slice.
    pub rapid_burst_window: Duration,

    /// rapid_requests: minimum records within the burst slice.
    pub rapid_burst_requests: usize,

    /// failed_requests: minimum records before the ratio is considered.
    pub failed_min_requests: usize,

    /// failed_requests: failure ratio above which the pattern fires.
    pub failure_ratio_threshold: f64,

    /// suspicious_pattern: distinct non-empty user agents above which the
    /// pattern fires.
    pub max_distinct_user_agents: usize,

    /// resource_exhaustion: endpoints considered expensive.
    pub resource_endpoints: Vec<String>,

    /// resource_exhaustion: minimum requests to the expensive endpoint set.
    pub resource_min_requests: usize,

    /// Block applied to a key when a critical-severity pattern fires.
    pub critical_block_duration: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            evaluation_window: Duration::from_secs(300),
            rapid_min_requests: 50,
            rapid_burst_window: Duration::from_secs(10),
            rapid_burst_requests: 20,
            failed_min_requests: 10,
            failure_ratio_threshold: 0.8,
            max_distinct_user_agents: 5,
            resource_endpoints: vec![
                "ai-inference".to_string(),
                "file-upload".to_string(),
                "search".to_string(),
            ],
            resource_min_requests: 15,
            critical_block_duration: Duration::from_secs(3600),
        }
    }
}

/// Engine-level configuration: retention horizons and the janitor interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between janitor sweeps.
    pub janitor_interval: Duration,

    /// How long request records are retained.
    pub history_retention: Duration,

    /// How long abuse patterns are retained.
    pub abuse_retention: Duration,

    /// Default duration for operator blocks without an explicit duration.
    pub default_block_duration: Duration,

    /// Detector thresholds.
    pub detector: DetectorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            janitor_interval: Duration::from_secs(300),
            history_retention: Duration::from_secs(3600),
            abuse_retention: Duration::from_secs(24 * 3600),
            default_block_duration: Duration::from_secs(3600),
            detector: DetectorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("KEYGATE_JANITOR_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                config.janitor_interval = Duration::from_secs(secs);
            }
        }

        if let Ok(val) = std::env::var("KEYGATE_HISTORY_RETENTION_SECS") {
            if let Ok(secs) = val.parse() {
                config.history_retention = Duration::from_secs(secs);
            }
        }

        if let Ok(val) = std::env::var("KEYGATE_ABUSE_RETENTION_SECS") {
            if let Ok(secs) = val.parse() {
                config.abuse_retention = Duration::from_secs(secs);
            }
        }

        if let Ok(val) = std::env::var("KEYGATE_RAPID_MIN_REQUESTS") {
            if let Ok(n) = val.parse() {
                config.detector.rapid_min_requests = n;
            }
        }

        if let Ok(val) = std::env::var("KEYGATE_RAPID_BURST_REQUESTS") {
            if let Ok(n) = val.parse() {
                config.detector.rapid_burst_requests = n;
            }
        }

        if let Ok(val) = std::env::var("KEYGATE_FAILURE_RATIO_THRESHOLD") {
            if let Ok(ratio) = val.parse() {
                config.detector.failure_ratio_threshold = ratio;
            }
        }

        if let Ok(val) = std::env::var("KEYGATE_MAX_DISTINCT_USER_AGENTS") {
            if let Ok(n) = val.parse() {
                config.detector.max_distinct_user_agents = n;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_presets() {
        let api = RateLimitConfig::api();
        assert_eq!(api.max_requests, 100);
        assert_eq!(api.window, Duration::from_secs(60));
        assert!(api.block_duration.is_none());

        let auth = RateLimitConfig::auth();
        assert_eq!(auth.max_requests, 5);
        assert_eq!(auth.window, Duration::from_secs(300));
        assert_eq!(auth.block_duration, Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_validate_rejects_zero_quota() {
        let config = RateLimitConfig::new(0, Duration::from_secs(60));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = RateLimitConfig::new(10, Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_positive_values() {
        let config = RateLimitConfig::new(10, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_skip_flags_builder() {
        let config = RateLimitConfig::api().skip_successful();
        assert!(config.skip_successful);
        assert!(!config.skip_failed);
    }

    #[test]
    fn test_detector_defaults() {
        let detector = DetectorConfig::default();
        assert_eq!(detector.rapid_min_requests, 50);
        assert_eq!(detector.rapid_burst_requests, 20);
        assert_eq!(detector.failed_min_requests, 10);
        assert_eq!(detector.max_distinct_user_agents, 5);
        assert_eq!(detector.resource_min_requests, 15);
        assert_eq!(detector.resource_endpoints.len(), 3);
    }

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.janitor_interval, Duration::from_secs(300));
        assert_eq!(config.history_retention, Duration::from_secs(3600));
        assert_eq!(config.abuse_retention, Duration::from_secs(86400));
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(
            config.detector.rapid_min_requests,
            parsed.detector.rapid_min_requests
        );
    }
}
