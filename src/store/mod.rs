//! The quota state store abstraction.
//!
//! `Store` captures the operations the admission path needs atomically —
//! bucket refill, sliding-window prune+count, counter increment, all
//! behind per-key TTLs — as a trait, so the admission scheduler can run
//! against either a real Redis-backed implementation or an in-memory
//! double in tests.

pub mod keys;
pub mod memory_store;
pub mod redis_store;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;

use crate::error::BrokerError;
use async_trait::async_trait;

/// Everything the atomic admission step needs.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub prefix: String,
    pub rpm_limit: u64,
    pub tpm_limit: u64,
    pub burst_factor: f64,
    pub input_tokens: u64,
    pub unique_id: String,
    pub now: f64,
}

/// Result of the atomic admission step — mirrors the original Lua script's
/// `{'OK'}` / `{'WAIT_RPM'}` / `{'WAIT_TOKENS', wait}` return shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdmissionOutcome {
    Admitted,
    WaitRpm,
    WaitTokens { seconds: f64 },
}

/// Everything the accounting step needs to record a success.
#[derive(Debug, Clone)]
pub struct SuccessRecord {
    pub apim_prefix: String,
    pub llm_prefix: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub unique_id: String,
    pub now: f64,
    pub day: String,
    pub seconds_until_midnight: i64,
}

/// Daily usage snapshot for the outer (non-atomic) daily-quota check.
#[derive(Debug, Clone, Copy, Default)]
pub struct DailyUsage {
    pub requests: u64,
    pub tokens: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Atomically prune the RPM window, check it, refill both token
    /// buckets, and — on success — consume and record, all in one round trip.
    async fn try_admit(&self, req: AdmissionRequest) -> Result<AdmissionOutcome, BrokerError>;

    /// Read current daily counters without mutating them — used by the
    /// scheduler's outer daily check.
    async fn daily_usage(&self, prefix: &str, day: &str) -> Result<DailyUsage, BrokerError>;

    /// Record a successful dispatch: bump daily counters, prune+append the
    /// RPM/TPM windows, mirrored under both prefixes.
    async fn record_success(&self, rec: SuccessRecord) -> Result<(), BrokerError>;

    /// Re-seed the capacity buckets and today's window/daily keys at
    /// startup.
    async fn reset_on_startup(&self, apim_prefix: &str) -> Result<(), BrokerError>;
}
