//! In-process `Store` double used by tests and by the mock upstream's own
//! limiter. Reproduces the admission script's refill/prune/consume
//! arithmetic as a single critical section under one mutex, since there is
//! no server-side scripting to lean on outside of real Redis.

use super::{AdmissionOutcome, AdmissionRequest, DailyUsage, Store, SuccessRecord};
use crate::error::BrokerError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    available: f64,
    last_ts: f64,
}

impl Bucket {
    fn refill(&mut self, max_cap: f64, rate: f64, now: f64) -> f64 {
        let elapsed = now - self.last_ts;
        if elapsed > 0.0 {
            self.available = (self.available + elapsed * rate).min(max_cap);
            self.last_ts = now;
        }
        self.available
    }
}

/// A sliding window as a set of (member, score) pairs — the in-memory
/// analogue of a Redis sorted set restricted to the operations the
/// admission path actually uses (prune, count, add).
#[derive(Debug, Clone, Default)]
struct Window {
    members: HashMap<String, f64>,
}

impl Window {
    fn prune(&mut self, cutoff: f64) {
        self.members.retain(|_, &mut score| score >= cutoff);
    }

    fn count(&self) -> u64 {
        self.members.len() as u64
    }

    fn add(&mut self, member: String, score: f64) {
        self.members.insert(member, score);
    }
}

#[derive(Debug, Default)]
struct PrefixState {
    rpm_capacity: Option<Bucket>,
    tpm_capacity: Option<Bucket>,
    rpm_window: Window,
    tpm_window: Window,
    daily: HashMap<String, DailyUsage>,
}

#[derive(Debug, Default)]
struct Inner {
    prefixes: HashMap<String, PrefixState>,
    seen_unique_ids: HashSet<String>,
}

/// In-memory `Store`, one process-wide table protected by a single mutex.
///
/// This is deliberately not sharded or lock-free: the point is to
/// reproduce the atomicity the real deployment gets from a Lua `EVAL`,
/// and a single critical section is the simplest way to guarantee that
/// in a test double.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn try_admit(&self, req: AdmissionRequest) -> Result<AdmissionOutcome, BrokerError> {
        let mut inner = self.inner.lock().await;
        let one_minute_ago = req.now - 60.0;
        let state = inner.prefixes.entry(req.prefix.clone()).or_default();

        state.rpm_window.prune(one_minute_ago);
        if state.rpm_window.count() >= req.rpm_limit {
            return Ok(AdmissionOutcome::WaitRpm);
        }

        let rpm_cap = req.rpm_limit as f64 * req.burst_factor;
        let tpm_cap = req.tpm_limit as f64 * req.burst_factor;
        let rpm_rate = req.rpm_limit as f64 / 60.0;
        let tpm_rate = req.tpm_limit as f64 / 60.0;

        let rpm_bucket = state.rpm_capacity.get_or_insert(Bucket {
            available: rpm_cap,
            last_ts: req.now,
        });
        let rpm_available = rpm_bucket.refill(rpm_cap, rpm_rate, req.now);

        let tpm_bucket = state.tpm_capacity.get_or_insert(Bucket {
            available: tpm_cap,
            last_ts: req.now,
        });
        let tpm_available = tpm_bucket.refill(tpm_cap, tpm_rate, req.now);

        let rpm_needed = 1.0;
        let tpm_needed = req.input_tokens as f64;

        if rpm_available < rpm_needed {
            let seconds = (rpm_needed - rpm_available) / rpm_rate;
            return Ok(AdmissionOutcome::WaitTokens { seconds });
        }
        if tpm_available < tpm_needed {
            let seconds = (tpm_needed - tpm_available) / tpm_rate;
            return Ok(AdmissionOutcome::WaitTokens { seconds });
        }

        state.rpm_capacity.as_mut().unwrap().available -= rpm_needed;
        state.tpm_capacity.as_mut().unwrap().available -= tpm_needed;
        state.rpm_window.add(req.unique_id.clone(), req.now);
        inner.seen_unique_ids.insert(req.unique_id);

        Ok(AdmissionOutcome::Admitted)
    }

    async fn daily_usage(&self, prefix: &str, day: &str) -> Result<DailyUsage, BrokerError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .prefixes
            .get(prefix)
            .and_then(|state| state.daily.get(day))
            .copied()
            .unwrap_or_default())
    }

    async fn record_success(&self, rec: SuccessRecord) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        let one_minute_ago = rec.now - 60.0;
        let total_tokens = rec.input_tokens + rec.output_tokens;
        let tpm_member = format!("{}:{}:{}", rec.input_tokens, rec.output_tokens, rec.unique_id);

        // The apim rpm_window already received this request's entry during
        // the matching `try_admit` call; only the llm mirror needs it added
        // here, or every success would double-count towards RPM_LIMIT.
        for (prefix, is_llm) in [(rec.llm_prefix.clone(), true), (rec.apim_prefix.clone(), false)] {
            let state = inner.prefixes.entry(prefix).or_default();
            state.rpm_window.prune(one_minute_ago);
            state.tpm_window.prune(one_minute_ago);
            if is_llm {
                state.rpm_window.add(rec.unique_id.clone(), rec.now);
            }
            state.tpm_window.add(tpm_member.clone(), rec.now);

            let usage = state.daily.entry(rec.day.clone()).or_default();
            usage.requests += 1;
            usage.tokens += total_tokens;
        }

        Ok(())
    }

    async fn reset_on_startup(&self, apim_prefix: &str) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        inner.prefixes.remove(apim_prefix);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;

    fn req(prefix: &str, now: f64, input_tokens: u64) -> AdmissionRequest {
        AdmissionRequest {
            prefix: prefix.to_string(),
            rpm_limit: 3,
            tpm_limit: 100,
            burst_factor: 1.0,
            input_tokens,
            unique_id: clock::new_id(),
            now,
        }
    }

    #[tokio::test]
    async fn admits_until_rpm_limit_then_waits() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            let outcome = store.try_admit(req("p", 1000.0, 1)).await.unwrap();
            assert_eq!(outcome, AdmissionOutcome::Admitted);
        }
        let outcome = store.try_admit(req("p", 1000.0, 1)).await.unwrap();
        assert_eq!(outcome, AdmissionOutcome::WaitRpm);
    }

    #[tokio::test]
    async fn refills_over_time() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            store.try_admit(req("p", 1000.0, 1)).await.unwrap();
        }
        // 60s later the RPM window has fully drained and capacity refilled.
        let outcome = store.try_admit(req("p", 1060.0, 1)).await.unwrap();
        assert_eq!(outcome, AdmissionOutcome::Admitted);
    }

    #[tokio::test]
    async fn waits_on_tpm_exhaustion_not_rpm() {
        let store = MemoryStore::new();
        let outcome = store.try_admit(req("p", 1000.0, 50)).await.unwrap();
        assert_eq!(outcome, AdmissionOutcome::Admitted);
        let outcome = store.try_admit(req("p", 1000.0, 60)).await.unwrap();
        match outcome {
            AdmissionOutcome::WaitTokens { seconds } => assert!(seconds > 0.0),
            other => panic!("expected WaitTokens, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn record_success_mirrors_both_prefixes() {
        let store = MemoryStore::new();
        store
            .record_success(SuccessRecord {
                apim_prefix: "apim_usage:key".to_string(),
                llm_prefix: "llm_usage:key".to_string(),
                input_tokens: 10,
                output_tokens: 5,
                unique_id: clock::new_id(),
                now: 1000.0,
                day: "2026-07-26".to_string(),
                seconds_until_midnight: 3600,
            })
            .await
            .unwrap();

        let apim = store.daily_usage("apim_usage:key", "2026-07-26").await.unwrap();
        let llm = store.daily_usage("llm_usage:key", "2026-07-26").await.unwrap();
        assert_eq!(apim.requests, 1);
        assert_eq!(apim.tokens, 15);
        assert_eq!(llm.requests, 1);
        assert_eq!(llm.tokens, 15);
    }

    #[tokio::test]
    async fn reset_on_startup_clears_prefix() {
        let store = MemoryStore::new();
        store.try_admit(req("apim_usage:key", 1000.0, 1)).await.unwrap();
        store.reset_on_startup("apim_usage:key").await.unwrap();
        let outcome = store.try_admit(req("apim_usage:key", 1000.0, 1)).await.unwrap();
        assert_eq!(outcome, AdmissionOutcome::Admitted);
    }
}
