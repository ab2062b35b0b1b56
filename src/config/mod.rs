pub mod types;

pub use types::*;

use anyhow::Result;
use std::path::Path;

impl BrokerConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults
    /// are used — allowing the broker to start with zero configuration for
    /// local development.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: BrokerConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            BrokerConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!("loaded broker configuration");
        Ok(config)
    }

    /// Apply environment variable overrides for store/upstream connection
    /// settings and the quota limits.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("REDIS_HOST") {
            self.store.redis_host = v;
        }
        if let Ok(v) = std::env::var("REDIS_PORT") {
            if let Ok(n) = v.parse::<u16>() {
                self.store.redis_port = n;
            }
        }
        if let Ok(v) = std::env::var("LLM_REDIS_DB") {
            if let Ok(n) = v.parse::<i64>() {
                self.store.llm_redis_db = n;
            }
        }
        if let Ok(v) = std::env::var("APIM_REDIS_DB") {
            if let Ok(n) = v.parse::<i64>() {
                self.store.apim_redis_db = n;
            }
        }
        if let Ok(v) = std::env::var("APIM_URL") {
            self.upstream.apim_url = v;
        }
        if let Ok(v) = std::env::var("LLM_APIM_API_KEY") {
            self.upstream.api_key = v;
        }

        if let Ok(v) = std::env::var("RPM_LIMIT") {
            if let Ok(n) = v.parse::<u64>() {
                self.limits.rpm_limit = n;
            }
        }
        if let Ok(v) = std::env::var("TPM_LIMIT") {
            if let Ok(n) = v.parse::<u64>() {
                self.limits.tpm_limit = n;
            }
        }
        if let Ok(v) = std::env::var("RPD_LIMIT") {
            if let Ok(n) = v.parse::<u64>() {
                self.limits.rpd_limit = n;
            }
        }
        if let Ok(v) = std::env::var("TPD_LIMIT") {
            if let Ok(n) = v.parse::<u64>() {
                self.limits.tpd_limit = n;
            }
        }
        if let Ok(v) = std::env::var("BURST_FACTOR") {
            if let Ok(n) = v.parse::<f64>() {
                self.limits.burst_factor = n;
            }
        }
        if let Ok(v) = std::env::var("LATENCY") {
            if let Ok(n) = v.parse::<f64>() {
                self.limits.latency = n;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.redis_host.is_empty() {
            anyhow::bail!("store.redis_host cannot be empty");
        }
        if self.upstream.apim_url.is_empty() {
            anyhow::bail!("upstream.apim_url cannot be empty");
        }
        if !(0.0..=1.0).contains(&self.limits.burst_factor) {
            anyhow::bail!("limits.burst_factor must be within [0, 1]");
        }
        if self.limits.latency <= 0.0 || self.limits.latency > 1.0 {
            anyhow::bail!("limits.latency must be within (0, 1]");
        }
        if self.limits.rpm_limit == 0
            || self.limits.tpm_limit == 0
            || self.limits.rpd_limit == 0
            || self.limits.tpd_limit == 0
        {
            anyhow::bail!("all rate limits must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = BrokerConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_burst_factor_out_of_range() {
        let mut cfg = BrokerConfig::default();
        cfg.limits.burst_factor = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_limit() {
        let mut cfg = BrokerConfig::default();
        cfg.limits.rpm_limit = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        // Scoped to this test via save/restore to avoid bleeding into others.
        let prev = std::env::var("RPM_LIMIT").ok();
        std::env::set_var("RPM_LIMIT", "42");

        let mut cfg = BrokerConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.limits.rpm_limit, 42);

        match prev {
            Some(v) => std::env::set_var("RPM_LIMIT", v),
            None => std::env::remove_var("RPM_LIMIT"),
        }
    }
}
