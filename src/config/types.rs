use serde::{Deserialize, Serialize};

/// Top-level broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Key prefix this broker's own accounting lives under.
    #[serde(default = "default_apim_prefix")]
    pub apim_prefix: String,

    /// Mirror prefix the upstream enforcer / external monitor reads.
    #[serde(default = "default_llm_prefix")]
    pub llm_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            upstream: UpstreamConfig::default(),
            limits: LimitsConfig::default(),
            scheduler: SchedulerConfig::default(),
            apim_prefix: default_apim_prefix(),
            llm_prefix: default_llm_prefix(),
        }
    }
}

fn default_apim_prefix() -> String {
    "apim_usage".to_string()
}

fn default_llm_prefix() -> String {
    "llm_usage".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    /// DB index the upstream enforcer / mirror entries live in.
    #[serde(default)]
    pub llm_redis_db: i64,

    /// DB index the broker's own accounting lives in.
    #[serde(default = "default_apim_redis_db")]
    pub apim_redis_db: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            llm_redis_db: 0,
            apim_redis_db: default_apim_redis_db(),
        }
    }
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_apim_redis_db() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_apim_url")]
    pub apim_url: String,

    #[serde(default = "default_api_key")]
    pub api_key: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            apim_url: default_apim_url(),
            api_key: default_api_key(),
        }
    }
}

fn default_apim_url() -> String {
    "http://127.0.0.1:8000/v1/chat/completions".to_string()
}

fn default_api_key() -> String {
    "DUMMY_API_KEY".to_string()
}

/// The four interlocking quota limits plus the burst/headroom knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_rpm_limit")]
    pub rpm_limit: u64,

    #[serde(default = "default_tpm_limit")]
    pub tpm_limit: u64,

    #[serde(default = "default_rpd_limit")]
    pub rpd_limit: u64,

    #[serde(default = "default_tpd_limit")]
    pub tpd_limit: u64,

    /// Initial bucket capacity as a fraction of the per-minute limit, in [0, 1].
    #[serde(default = "default_burst_factor")]
    pub burst_factor: f64,

    /// Safety headroom multiplier applied by the mock upstream's own enforcer.
    #[serde(default = "default_latency")]
    pub latency: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rpm_limit: default_rpm_limit(),
            tpm_limit: default_tpm_limit(),
            rpd_limit: default_rpd_limit(),
            tpd_limit: default_tpd_limit(),
            burst_factor: default_burst_factor(),
            latency: default_latency(),
        }
    }
}

fn default_rpm_limit() -> u64 {
    100
}
fn default_tpm_limit() -> u64 {
    100_000
}
fn default_rpd_limit() -> u64 {
    5_000
}
fn default_tpd_limit() -> u64 {
    5_000_000
}
fn default_burst_factor() -> f64 {
    1.0
}
fn default_latency() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_cooldown_secs")]
    pub retry_cooldown_secs: u64,

    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,

    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_cooldown_secs: default_retry_cooldown_secs(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}
fn default_retry_cooldown_secs() -> u64 {
    10
}
fn default_upstream_timeout_secs() -> u64 {
    60
}
fn default_job_timeout_secs() -> u64 {
    300
}
