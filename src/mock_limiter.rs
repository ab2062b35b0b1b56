//! The mock upstream's own enforcer.
//!
//! Unlike the broker's own scheduler (`store::RedisStore`/`store::MemoryStore`),
//! this enforcer folds the RPD/TPD check *inside* the same atomic step as
//! the RPM/TPM check. There is exactly one enforcer per mock-upstream
//! process (no prefix/sharding), so a single mutex-guarded state is the
//! whole "atomic script".

use crate::clock;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Which limit rejected the request, mirroring the Lua script's
/// `{'RPD_EXCEEDED'|'TPD_EXCEEDED'|'RPM_EXCEEDED'|'TPM_EXCEEDED'}` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    RequestsPerDay,
    TokensPerDay,
    RequestsPerMinute,
    TokensPerMinute,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitExceeded {
    pub kind: LimitKind,
    pub limit: u64,
}

impl RateLimitExceeded {
    pub fn message(&self) -> String {
        let unit = match self.kind {
            LimitKind::RequestsPerDay => "requests per day",
            LimitKind::TokensPerDay => "tokens per day",
            LimitKind::RequestsPerMinute => "requests per minute",
            LimitKind::TokensPerMinute => "tokens per minute",
        };
        format!("Rate limit exceeded: {} {}.", self.limit, unit)
    }
}

struct State {
    rpm_window: HashMap<String, f64>,
    tpm_window: HashMap<String, (u64, f64)>,
    daily: HashMap<String, (u64, u64)>,
}

/// Configured limits, already scaled down by `LATENCY` headroom. The mock
/// upstream is the consumer of this knob, not the broker's scheduler.
pub struct MockLimiter {
    rpm_limit: u64,
    tpm_limit: u64,
    rpd_limit: u64,
    tpd_limit: u64,
    state: Mutex<State>,
}

impl MockLimiter {
    pub fn new(rpm_limit: u64, tpm_limit: u64, rpd_limit: u64, tpd_limit: u64, latency: f64) -> Self {
        Self {
            rpm_limit: scale(rpm_limit, latency),
            tpm_limit: scale(tpm_limit, latency),
            rpd_limit: scale(rpd_limit, latency),
            tpd_limit: scale(tpd_limit, latency),
            state: Mutex::new(State {
                rpm_window: HashMap::new(),
                tpm_window: HashMap::new(),
                daily: HashMap::new(),
            }),
        }
    }

    /// One atomic check-and-consume, folding RPD/TPD/RPM/TPM into a single
    /// critical section (the Lua script's exact order: RPD, TPD, RPM, TPM,
    /// then increment everything).
    pub async fn check_and_record(&self, request_tokens: u64) -> Result<(), RateLimitExceeded> {
        let now = clock::now_secs();
        let today = clock::today_utc();
        let one_minute_ago = now - 60.0;

        let mut state = self.state.lock().await;

        let (rpd, tpd) = state.daily.get(&today).copied().unwrap_or((0, 0));
        if rpd >= self.rpd_limit {
            return Err(RateLimitExceeded {
                kind: LimitKind::RequestsPerDay,
                limit: self.rpd_limit,
            });
        }
        if tpd + request_tokens > self.tpd_limit {
            return Err(RateLimitExceeded {
                kind: LimitKind::TokensPerDay,
                limit: self.tpd_limit,
            });
        }

        state.rpm_window.retain(|_, &mut ts| ts >= one_minute_ago);
        state.tpm_window.retain(|_, &mut (_, ts)| ts >= one_minute_ago);

        if state.rpm_window.len() as u64 >= self.rpm_limit {
            return Err(RateLimitExceeded {
                kind: LimitKind::RequestsPerMinute,
                limit: self.rpm_limit,
            });
        }

        let current_tpm: u64 = state.tpm_window.values().map(|(tokens, _)| tokens).sum();
        if current_tpm + request_tokens > self.tpm_limit {
            return Err(RateLimitExceeded {
                kind: LimitKind::TokensPerMinute,
                limit: self.tpm_limit,
            });
        }

        let entry = state.daily.entry(today).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += request_tokens;

        let member = format!("{now}:{}", clock::new_id());
        state.rpm_window.insert(member.clone(), now);
        state.tpm_window.insert(member, (request_tokens, now));

        Ok(())
    }
}

fn scale(limit: u64, latency: f64) -> u64 {
    ((limit as f64) * latency).floor().max(1.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_until_rpm_limit_then_rejects() {
        let limiter = MockLimiter::new(3, 1_000, 100, 100_000, 1.0);
        for _ in 0..3 {
            limiter.check_and_record(1).await.unwrap();
        }
        let err = limiter.check_and_record(1).await.unwrap_err();
        assert_eq!(err.kind, LimitKind::RequestsPerMinute);
    }

    #[tokio::test]
    async fn rejects_on_tpm_before_rpm_exhausted() {
        let limiter = MockLimiter::new(100, 50, 100, 100_000, 1.0);
        limiter.check_and_record(40).await.unwrap();
        let err = limiter.check_and_record(20).await.unwrap_err();
        assert_eq!(err.kind, LimitKind::TokensPerMinute);
    }

    #[tokio::test]
    async fn rejects_on_rpd_once_daily_cap_reached() {
        let limiter = MockLimiter::new(1_000, 100_000, 2, 100_000, 1.0);
        limiter.check_and_record(1).await.unwrap();
        limiter.check_and_record(1).await.unwrap();
        let err = limiter.check_and_record(1).await.unwrap_err();
        assert_eq!(err.kind, LimitKind::RequestsPerDay);
    }

    #[tokio::test]
    async fn latency_headroom_scales_limits_down() {
        // latency=0.5 over an rpm_limit of 10 yields an effective cap of 5.
        let limiter = MockLimiter::new(10, 100_000, 1_000, 100_000, 0.5);
        for _ in 0..5 {
            limiter.check_and_record(1).await.unwrap();
        }
        let err = limiter.check_and_record(1).await.unwrap_err();
        assert_eq!(err.kind, LimitKind::RequestsPerMinute);
    }

    #[test]
    fn message_matches_expected_shape() {
        let err = RateLimitExceeded {
            kind: LimitKind::TokensPerDay,
            limit: 5_000_000,
        };
        assert_eq!(err.message(), "Rate limit exceeded: 5000000 tokens per day.");
    }
}
