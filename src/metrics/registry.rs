use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`,
/// `histogram!`) can be used anywhere in the codebase. The `PrometheusHandle`
/// is retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    ///
    /// Idempotent: the global recorder can only be installed once per
    /// process, so repeated calls (every `BrokerState::new`, including the
    /// several independent brokers spun up across one test binary) return a
    /// handle to the already-installed recorder instead of panicking.
    pub fn install() -> Self {
        let handle = HANDLE.get_or_init(build_recorder).clone();
        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn build_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )
        .expect("valid matcher")
        .install_recorder()
        .expect("failed to install metrics recorder");

    // --- Describe all metrics (adds HELP / TYPE lines) ---

    // front door / queue
    describe_counter!(
        "broker_jobs_enqueued_total",
        Unit::Count,
        "Total chat-completion jobs accepted by the front door"
    );
    describe_counter!(
        "broker_jobs_completed_total",
        Unit::Count,
        "Total jobs that reached a terminal dispatch outcome, by outcome"
    );
    describe_gauge!(
        "broker_queue_depth",
        Unit::Count,
        "Current depth of the in-memory admission queue"
    );
    describe_histogram!(
        "broker_job_queue_duration_seconds",
        Unit::Seconds,
        "Time a job spent waiting in queue before admission"
    );

    // admission scheduler
    describe_counter!(
        "broker_admission_wait_total",
        Unit::Count,
        "Admission denials by reason (rpm/tokens/daily)"
    );
    describe_counter!(
        "broker_store_errors_total",
        Unit::Count,
        "Store operations (admission/accounting) that returned an error"
    );

    // dispatcher
    describe_histogram!(
        "broker_upstream_request_duration_seconds",
        Unit::Seconds,
        "Upstream HTTP call duration, per attempt"
    );
    describe_counter!(
        "broker_upstream_retries_total",
        Unit::Count,
        "Total upstream retry attempts (5xx or transport failure)"
    );

    // mock upstream enforcer
    describe_counter!(
        "mock_upstream_requests_total",
        Unit::Count,
        "Total requests received by the mock upstream, by outcome"
    );

    handle
}
