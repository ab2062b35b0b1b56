//! Redis-backed `Store`, the production implementation.
//!
//! The admission check runs as a single `EVAL` — prune-count-refill-consume
//! in one round trip — so no other caller can observe a partially-applied
//! admission decision.

use super::keys;
use super::{AdmissionOutcome, AdmissionRequest, DailyUsage, Store, SuccessRecord};
use crate::config::StoreConfig;
use crate::error::BrokerError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

/// KEYS[1]=rpm_capacity KEYS[2]=tpm_capacity KEYS[3]=rpm_window
/// ARGV[1]=rpm_max_cap ARGV[2]=rpm_rate_per_sec ARGV[3]=rpm_needed(=1)
/// ARGV[4]=tpm_max_cap ARGV[5]=tpm_rate_per_sec ARGV[6]=tpm_needed
/// ARGV[7]=now ARGV[8]=one_minute_ago ARGV[9]=rpm_limit ARGV[10]=unique_id
const ADMISSION_SCRIPT: &str = r#"
local function refill(key, max_cap, rate, now)
    local data = redis.call('HMGET', key, 'available', 'last_ts')
    local available, last_ts = tonumber(data[1]), tonumber(data[2])
    if not available or not last_ts then available, last_ts = max_cap, now end
    local elapsed = now - last_ts
    if elapsed > 0 then
        available = math.min(max_cap, available + elapsed * rate)
    end
    return available
end

local now = tonumber(ARGV[7])
local one_minute_ago = tonumber(ARGV[8])
local rpm_limit = tonumber(ARGV[9])

redis.call('ZREMRANGEBYSCORE', KEYS[3], '-inf', one_minute_ago)
local current_rpm = redis.call('ZCARD', KEYS[3])
if current_rpm >= rpm_limit then
    return {'WAIT_RPM'}
end

local rpm_available = refill(KEYS[1], tonumber(ARGV[1]), tonumber(ARGV[2]), now)
local tpm_available = refill(KEYS[2], tonumber(ARGV[4]), tonumber(ARGV[5]), now)

local rpm_needed = tonumber(ARGV[3])
local tpm_needed = tonumber(ARGV[6])

if rpm_available < rpm_needed then
    local wait = (rpm_needed - rpm_available) / tonumber(ARGV[2])
    return {'WAIT_TOKENS', tostring(wait)}
end
if tpm_available < tpm_needed then
    local wait = (tpm_needed - tpm_available) / tonumber(ARGV[5])
    return {'WAIT_TOKENS', tostring(wait)}
end

redis.call('HMSET', KEYS[1], 'available', rpm_available - rpm_needed, 'last_ts', now)
redis.call('HMSET', KEYS[2], 'available', tpm_available - tpm_needed, 'last_ts', now)
redis.call('ZADD', KEYS[3], now, ARGV[10])
redis.call('EXPIRE', KEYS[3], 120)
return {'OK'}
"#;

pub struct RedisStore {
    apim_conn: ConnectionManager,
    llm_conn: ConnectionManager,
    admission_script: Script,
}

impl RedisStore {
    pub async fn connect(cfg: &StoreConfig) -> Result<Self, BrokerError> {
        let apim_url = format!(
            "redis://{}:{}/{}",
            cfg.redis_host, cfg.redis_port, cfg.apim_redis_db
        );
        let llm_url = format!(
            "redis://{}:{}/{}",
            cfg.redis_host, cfg.redis_port, cfg.llm_redis_db
        );

        let apim_client = redis::Client::open(apim_url)
            .map_err(|e| BrokerError::StoreUnavailable(e.to_string()))?;
        let llm_client = redis::Client::open(llm_url)
            .map_err(|e| BrokerError::StoreUnavailable(e.to_string()))?;

        let apim_conn = apim_client
            .get_connection_manager()
            .await
            .map_err(|e| BrokerError::StoreUnavailable(e.to_string()))?;
        let llm_conn = llm_client
            .get_connection_manager()
            .await
            .map_err(|e| BrokerError::StoreUnavailable(e.to_string()))?;

        Ok(Self {
            apim_conn,
            llm_conn,
            admission_script: Script::new(ADMISSION_SCRIPT),
        })
    }

    /// Prune both sliding windows for entries older than 60s. The original
    /// deployment does this as a separate pipeline right before recording a
    /// success, independent of the admission script's own RPM-window prune.
    async fn prune_windows(
        conn: &mut ConnectionManager,
        prefix: &str,
        one_minute_ago: f64,
    ) -> Result<(), BrokerError> {
        redis::pipe()
            .atomic()
            .zrembyscore(keys::rpm_window(prefix), "-inf", one_minute_ago)
            .zrembyscore(keys::tpm_window(prefix), "-inf", one_minute_ago)
            .query_async::<_, ()>(conn)
            .await
            .map_err(|e| BrokerError::StoreUnavailable(e.to_string()))
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn try_admit(&self, req: AdmissionRequest) -> Result<AdmissionOutcome, BrokerError> {
        let rpm_cap = req.rpm_limit as f64 * req.burst_factor;
        let tpm_cap = req.tpm_limit as f64 * req.burst_factor;
        let rpm_rate = req.rpm_limit as f64 / 60.0;
        let tpm_rate = req.tpm_limit as f64 / 60.0;
        let one_minute_ago = req.now - 60.0;

        let mut conn = self.apim_conn.clone();
        let result: Vec<String> = self
            .admission_script
            .key(keys::rpm_capacity(&req.prefix))
            .key(keys::tpm_capacity(&req.prefix))
            .key(keys::rpm_window(&req.prefix))
            .arg(rpm_cap)
            .arg(rpm_rate)
            .arg(1.0)
            .arg(tpm_cap)
            .arg(tpm_rate)
            .arg(req.input_tokens as f64)
            .arg(req.now)
            .arg(one_minute_ago)
            .arg(req.rpm_limit)
            .arg(&req.unique_id)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| BrokerError::StoreUnavailable(e.to_string()))?;

        match result.first().map(String::as_str) {
            Some("OK") => Ok(AdmissionOutcome::Admitted),
            Some("WAIT_RPM") => Ok(AdmissionOutcome::WaitRpm),
            Some("WAIT_TOKENS") => {
                let seconds = result
                    .get(1)
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(0.02);
                Ok(AdmissionOutcome::WaitTokens { seconds })
            }
            _ => Err(BrokerError::Internal(
                "admission script returned an unrecognized outcome".to_string(),
            )),
        }
    }

    async fn daily_usage(&self, prefix: &str, day: &str) -> Result<DailyUsage, BrokerError> {
        let mut conn = self.apim_conn.clone();
        let (requests, tokens): (Option<u64>, Option<u64>) = redis::pipe()
            .get(keys::rpd_counter(prefix, day))
            .get(keys::tpd_counter(prefix, day))
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::StoreUnavailable(e.to_string()))?;

        Ok(DailyUsage {
            requests: requests.unwrap_or(0),
            tokens: tokens.unwrap_or(0),
        })
    }

    async fn record_success(&self, rec: SuccessRecord) -> Result<(), BrokerError> {
        let one_minute_ago = rec.now - 60.0;
        let mut llm_conn = self.llm_conn.clone();
        let mut apim_conn = self.apim_conn.clone();

        Self::prune_windows(&mut llm_conn, &rec.llm_prefix, one_minute_ago).await?;
        Self::prune_windows(&mut apim_conn, &rec.apim_prefix, one_minute_ago).await?;

        let total_tokens = rec.input_tokens + rec.output_tokens;
        let tpm_member = format!("{}:{}:{}", rec.input_tokens, rec.output_tokens, rec.unique_id);

        // Mirror onto the companion prefix first (matches the original's
        // ordering: llm server counters, then apim server counters).
        redis::pipe()
            .atomic()
            .incr(keys::rpd_counter(&rec.llm_prefix, &rec.day), 1)
            .expire(
                keys::rpd_counter(&rec.llm_prefix, &rec.day),
                rec.seconds_until_midnight,
            )
            .incr(keys::tpd_counter(&rec.llm_prefix, &rec.day), total_tokens)
            .expire(
                keys::tpd_counter(&rec.llm_prefix, &rec.day),
                rec.seconds_until_midnight,
            )
            .zadd(keys::rpm_window(&rec.llm_prefix), &rec.unique_id, rec.now)
            .expire(keys::rpm_window(&rec.llm_prefix), 120)
            .zadd(keys::tpm_window(&rec.llm_prefix), &tpm_member, rec.now)
            .expire(keys::tpm_window(&rec.llm_prefix), 120)
            .query_async::<_, ()>(&mut llm_conn)
            .await
            .map_err(|e| BrokerError::StoreUnavailable(e.to_string()))?;

        redis::pipe()
            .atomic()
            .incr(keys::rpd_counter(&rec.apim_prefix, &rec.day), 1)
            .expire(
                keys::rpd_counter(&rec.apim_prefix, &rec.day),
                rec.seconds_until_midnight,
            )
            .incr(keys::tpd_counter(&rec.apim_prefix, &rec.day), total_tokens)
            .expire(
                keys::tpd_counter(&rec.apim_prefix, &rec.day),
                rec.seconds_until_midnight,
            )
            .zadd(keys::tpm_window(&rec.apim_prefix), &tpm_member, rec.now)
            .expire(keys::tpm_window(&rec.apim_prefix), 120)
            .query_async::<_, ()>(&mut apim_conn)
            .await
            .map_err(|e| BrokerError::StoreUnavailable(e.to_string()))?;

        Ok(())
    }

    async fn reset_on_startup(&self, apim_prefix: &str) -> Result<(), BrokerError> {
        let today = crate::clock::today_utc();
        let mut conn = self.apim_conn.clone();
        let _: () = conn
            .del(&[
                keys::rpm_capacity(apim_prefix),
                keys::tpm_capacity(apim_prefix),
                keys::rpm_window(apim_prefix),
                keys::tpm_window(apim_prefix),
                keys::rpd_counter(apim_prefix, &today),
                keys::tpd_counter(apim_prefix, &today),
            ])
            .await
            .map_err(|e| BrokerError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}
