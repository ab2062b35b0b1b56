//! The admission scheduler — the core of this repository.
//!
//! A single FIFO queue plus exactly one worker task pulling from its head.
//! Concurrency between the many Front Door callers and the one worker is
//! cooperative: the queue is behind a mutex, completion is a one-shot
//! channel per job.

pub mod job;

use crate::clock;
use crate::config::BrokerConfig;
use crate::dispatcher;
use crate::store::{AdmissionRequest, AdmissionOutcome, Store, SuccessRecord};
use crate::tokens;
pub use job::{Job, JobResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

const MIN_BACKOFF: Duration = Duration::from_millis(20);

/// The in-memory FIFO of pending jobs.
pub struct Queue {
    jobs: Mutex<VecDeque<Job>>,
    wake: Notify,
    depth: AtomicUsize,
}

impl Queue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            depth: AtomicUsize::new(0),
        })
    }

    /// Enqueue at the tail — used both by the Front Door (new submissions)
    /// and by the worker re-queuing a denied job.
    pub async fn push(&self, job: Job) {
        let mut guard = self.jobs.lock().await;
        guard.push_back(job);
        let depth = guard.len();
        drop(guard);
        self.depth.store(depth, Ordering::Relaxed);
        metrics::gauge!("broker_queue_depth").set(depth as f64);
        self.wake.notify_one();
    }

    async fn pop(&self) -> Job {
        loop {
            {
                let mut guard = self.jobs.lock().await;
                if let Some(job) = guard.pop_front() {
                    let depth = guard.len();
                    drop(guard);
                    self.depth.store(depth, Ordering::Relaxed);
                    metrics::gauge!("broker_queue_depth").set(depth as f64);
                    return job;
                }
            }
            self.wake.notified().await;
        }
    }

    /// Approximate current depth, for the readiness endpoint — racy but
    /// good enough for an operator-facing gauge.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// Run the single scheduler worker until `shutdown` fires: the state
/// machine is `IDLE → ADMIT → DISPATCH → RECORD → IDLE`, with
/// `ADMIT → BACKOFF → IDLE` on denial.
pub async fn run_worker(
    queue: Arc<Queue>,
    store: Arc<dyn Store>,
    config: Arc<BrokerConfig>,
    client: reqwest::Client,
    shutdown: Arc<Notify>,
) {
    info!("scheduler: worker starting");
    loop {
        let job = tokio::select! {
            job = queue.pop() => job,
            _ = shutdown.notified() => {
                info!("scheduler: worker stopping");
                return;
            }
        };

        if let Some(job) = admit(job, &store, &config, &client).await {
            // Denied: backoff already happened inside `admit`; re-enqueue at tail.
            queue.push(job).await;
        }
    }
}

/// One ADMIT attempt for the head job. Returns `Some(job)` if denied (to be
/// re-enqueued), or `None` once the job has been dispatched and completed.
async fn admit(
    job: Job,
    store: &Arc<dyn Store>,
    config: &Arc<BrokerConfig>,
    client: &reqwest::Client,
) -> Option<Job> {
    let now = clock::now_secs();

    let req = AdmissionRequest {
        prefix: config.apim_prefix.clone(),
        rpm_limit: config.limits.rpm_limit,
        tpm_limit: config.limits.tpm_limit,
        burst_factor: config.limits.burst_factor,
        input_tokens: job.input_tokens,
        unique_id: job.request_id.clone(),
        now,
    };

    let outcome = match store.try_admit(req).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("scheduler: store error during admission, error={}", e);
            metrics::counter!("broker_store_errors_total").increment(1);
            job.complete(JobResult {
                body: e.to_body(),
                status: e.status_code(),
            });
            return None;
        }
    };

    match outcome {
        AdmissionOutcome::Admitted => {
            metrics::histogram!("broker_job_queue_duration_seconds")
                .record(job.enqueued_at.elapsed().as_secs_f64());
        }
        AdmissionOutcome::WaitRpm => {
            metrics::counter!("broker_admission_wait_total", "reason" => "rpm").increment(1);
            tokio::time::sleep(MIN_BACKOFF).await;
            return Some(job);
        }
        AdmissionOutcome::WaitTokens { seconds } => {
            metrics::counter!("broker_admission_wait_total", "reason" => "tokens").increment(1);
            tokio::time::sleep(MIN_BACKOFF.max(Duration::from_secs_f64(seconds))).await;
            return Some(job);
        }
    }

    // Daily-quota check, layered outside the atomic admission script.
    let today = clock::today_utc();
    match store.daily_usage(&config.apim_prefix, &today).await {
        Ok(usage) => {
            let rpd_ok = usage.requests < config.limits.rpd_limit;
            let tpd_ok = usage.tokens + job.input_tokens <= config.limits.tpd_limit;
            if !rpd_ok || !tpd_ok {
                metrics::counter!("broker_admission_wait_total", "reason" => "daily").increment(1);
                let wait = clock::seconds_until_utc_midnight();
                debug!("scheduler: daily quota exceeded, sleeping {}s", wait);
                tokio::time::sleep(Duration::from_secs(wait as u64)).await;
                return Some(job);
            }
        }
        Err(e) => {
            warn!("scheduler: store error during daily check, error={}", e);
            metrics::counter!("broker_store_errors_total").increment(1);
            job.complete(JobResult {
                body: e.to_body(),
                status: e.status_code(),
            });
            return None;
        }
    }

    dispatch_and_record(job, store, config, client).await;
    None
}

async fn dispatch_and_record(
    job: Job,
    store: &Arc<dyn Store>,
    config: &Arc<BrokerConfig>,
    client: &reqwest::Client,
) {
    let outcome = dispatcher::dispatch(client, &config.upstream, &config.scheduler, &job.payload).await;
    debug!(
        "scheduler: request_id={} dispatched, status={}, attempts={}",
        job.request_id, outcome.status, outcome.attempts
    );

    metrics::counter!(
        "broker_jobs_completed_total",
        "outcome" => if outcome.status == 200 { "success" } else { "error" },
    )
    .increment(1);

    if outcome.status == 200 {
        if let Ok(response) = serde_json::from_str::<serde_json::Value>(&outcome.body) {
            let output = tokens::output_tokens(&response);
            let now = clock::now_secs();
            let day = clock::today_utc();
            let record = SuccessRecord {
                apim_prefix: config.apim_prefix.clone(),
                llm_prefix: config.llm_prefix.clone(),
                input_tokens: job.input_tokens,
                output_tokens: output,
                unique_id: job.request_id.clone(),
                now,
                day,
                seconds_until_midnight: clock::seconds_until_utc_midnight(),
            };
            if let Err(e) = store.record_success(record).await {
                warn!("scheduler: accounting write failed, error={}", e);
                metrics::counter!("broker_store_errors_total").increment(1);
            }
        }
    }

    job.complete(JobResult {
        body: outcome.body,
        status: outcome.status,
    });
}
