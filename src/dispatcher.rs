//! Outbound HTTP call to the upstream with bounded retries.
//!
//! Same shape as a typical proxy retry loop — attempt loop, per-attempt
//! timeout, retryable-status classification — simplified down to a single
//! fixed upstream instead of cluster/node selection, circuit breakers, or
//! load balancing, none of which this component needs.

use crate::config::{SchedulerConfig, UpstreamConfig};
use crate::error::BrokerError;
use std::time::Duration;
use tracing::{debug, warn};

pub struct DispatchOutcome {
    pub body: String,
    pub status: u16,
    pub attempts: u32,
}

/// POST `payload` to the configured upstream, retrying on 5xx/transport
/// failure up to `MAX_RETRIES` times with a fixed `RETRY_COOLDOWN` between
/// attempts and a per-attempt `UPSTREAM_TIMEOUT`. A `status < 500` response
/// (including 4xx) is terminal and returned as-is — the dispatcher never
/// retries client errors.
pub async fn dispatch(
    client: &reqwest::Client,
    upstream: &UpstreamConfig,
    scheduler: &SchedulerConfig,
    payload: &serde_json::Value,
) -> DispatchOutcome {
    let timeout = Duration::from_secs(scheduler.upstream_timeout_secs);
    let cooldown = Duration::from_secs(scheduler.retry_cooldown_secs);

    for attempt in 1..=scheduler.max_retries {
        let attempt_start = std::time::Instant::now();
        let sent = client
            .post(&upstream.apim_url)
            .bearer_auth(&upstream.api_key)
            .json(payload)
            .timeout(timeout)
            .send()
            .await;
        metrics::histogram!("broker_upstream_request_duration_seconds")
            .record(attempt_start.elapsed().as_secs_f64());

        match sent {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();

                if status < 500 {
                    return DispatchOutcome {
                        body,
                        status,
                        attempts: attempt,
                    };
                }

                let err = BrokerError::UpstreamTransient(format!("upstream returned {}", status));
                warn!(
                    "dispatcher: {}, attempt={}/{}",
                    err, attempt, scheduler.max_retries
                );
                metrics::counter!("broker_upstream_retries_total").increment(1);
            }
            Err(e) => {
                let err = BrokerError::UpstreamTransient(e.to_string());
                warn!(
                    "dispatcher: {}, attempt={}/{}",
                    err, attempt, scheduler.max_retries
                );
                metrics::counter!("broker_upstream_retries_total").increment(1);
            }
        }

        if attempt < scheduler.max_retries {
            tokio::time::sleep(cooldown).await;
        }
    }

    let exhausted = BrokerError::UpstreamExhausted {
        attempts: scheduler.max_retries,
    };
    debug!("dispatcher: {}", exhausted);
    DispatchOutcome {
        body: exhausted.to_body(),
        status: exhausted.status_code(),
        attempts: scheduler.max_retries,
    }
}
