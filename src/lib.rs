//! Keygate: Per-Key Rate Limiting and Abuse Detection
//!
//! In-process engine that throttles repeated or malicious usage of a shared
//! resource and flags suspicious traffic patterns for operators. Quotas are
//! tracked per caller-supplied key (user id, IP, API token) over sliding
//! time windows, with temporary blocking, exponential backoff computation,
//! and periodic garbage collection of stale state.
//!
//! # Features
//!
//! - Sliding-window quota accounting with success/failure filters
//! - Four independent abuse heuristics over recent per-key history
//! - Temporary blocks with lazy expiry, installable by quota exhaustion,
//!   the detector, or operators
//! - Exponential backoff with jitter for denied clients
//! - Injectable clock for deterministic tests
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Rate Limiter                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐          │
//! │  │ History     │  │ Block       │  │ Abuse       │          │
//! │  │ Store       │  │ Registry    │  │ Detector    │          │
//! │  └─────────────┘  └─────────────┘  └─────────────┘          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │          Janitor (periodic state eviction)          │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Not a distributed limiter: all state is in-memory and owned by a single
//! [`RateLimiter`] instance. Construct one per isolation domain and inject
//! it wherever requests are handled.

pub mod abuse;
pub mod backoff;
pub mod block;
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod janitor;
pub mod limiter;

pub use abuse::{AbuseDetector, AbuseLog, AbusePattern, PatternKind, Severity};
pub use backoff::{calculate_backoff, calculate_backoff_with};
pub use block::{BlockEntry, BlockRegistry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DetectorConfig, EngineConfig, RateLimitConfig};
pub use error::LimiterError;
pub use history::{HistoryStore, RequestMetadata, RequestRecord};
pub use janitor::{Janitor, SweepReport};
pub use limiter::{RateLimitResult, RateLimiter, Statistics};
