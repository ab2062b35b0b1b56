//! Front-door-to-dispatcher round trip, driven against an in-memory
//! `Store` and a tiny in-process fake upstream instead of Redis/a real
//! LLM API, so the admission/dispatch/accounting path is testable without
//! any external service running.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use llm_broker::clock;
use llm_broker::config::BrokerConfig;
use llm_broker::scheduler;
use llm_broker::server::{self, BrokerState};
use llm_broker::store::{MemoryStore, Store, SuccessRecord};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

/// Reserve a free loopback port and hand back its address string. There is
/// a small race between releasing the listener and the real bind, but it
/// is the common pattern for picking an ephemeral port in tests.
async fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// A fake upstream that returns 500 for the first `fail_times` requests,
/// then 200 with an echoed chat-completion body.
async fn spawn_fake_upstream(fail_times: u32) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let counter = Arc::new(AtomicU32::new(0));

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            let counter = counter.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let svc = service_fn(move |_req: Request<Incoming>| {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        let resp = if n < fail_times {
                            Response::builder().status(500).body(full_body("{}")).unwrap()
                        } else {
                            let body = serde_json::json!({
                                "choices": [{"message": {"role": "assistant", "content": "hi"}}]
                            });
                            Response::builder()
                                .status(200)
                                .body(full_body(body.to_string()))
                                .unwrap()
                        };
                        Ok::<_, hyper::Error>(resp)
                    }
                });
                let _ = auto::Builder::new(TokioExecutor::new())
                    .http1()
                    .serve_connection(io, svc)
                    .await;
            });
        }
    });

    format!("http://{addr}/v1/chat/completions")
}

struct TestBroker {
    front_door_addr: String,
    shutdown: Arc<Notify>,
}

async fn start_broker(config: BrokerConfig, upstream_url: String) -> TestBroker {
    start_broker_with_store(config, upstream_url, Arc::new(MemoryStore::new())).await
}

async fn start_broker_with_store(
    mut config: BrokerConfig,
    upstream_url: String,
    store: Arc<dyn Store>,
) -> TestBroker {
    config.upstream.apim_url = upstream_url;
    let front_door_addr = free_addr().await;

    let config = Arc::new(config);
    let state = BrokerState::new(config.clone(), store.clone());
    let shutdown = Arc::new(Notify::new());
    let client = reqwest::Client::new();

    tokio::spawn({
        let queue = state.queue.clone();
        let store = store.clone();
        let config = config.clone();
        let shutdown = shutdown.clone();
        async move { scheduler::run_worker(queue, store, config, client, shutdown).await }
    });

    tokio::spawn({
        let addr = front_door_addr.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move {
            let _ = server::run_broker_server(&addr, state, shutdown).await;
        }
    });

    // Give the listener a moment to bind.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestBroker {
        front_door_addr,
        shutdown,
    }
}

fn default_test_config() -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.limits.rpm_limit = 100;
    config.limits.tpm_limit = 100_000;
    config.limits.rpd_limit = 5_000;
    config.limits.tpd_limit = 5_000_000;
    config.scheduler.max_retries = 3;
    config.scheduler.retry_cooldown_secs = 1;
    config.scheduler.upstream_timeout_secs = 5;
    config.scheduler.job_timeout_secs = 30;
    config
}

#[tokio::test]
async fn successful_round_trip_returns_upstream_body_verbatim() {
    let upstream = spawn_fake_upstream(0).await;
    let broker = start_broker(default_test_config(), upstream).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{}/v1/chat/completions", broker.front_door_addr))
        .json(&serde_json::json!({"messages": [{"role": "user", "content": "hello"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "hi");

    broker.shutdown.notify_waiters();
}

/// A job whose upstream returns 500 twice, then 200, completes
/// successfully with the retried attempts visible as a client-perceived
/// latency of at least two cooldown periods.
#[tokio::test]
async fn upstream_retries_until_success_within_bound() {
    let upstream = spawn_fake_upstream(2).await;
    let broker = start_broker(default_test_config(), upstream).await;

    let start = std::time::Instant::now();
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{}/v1/chat/completions", broker.front_door_addr))
        .json(&serde_json::json!({"messages": [{"role": "user", "content": "hello"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert!(
        start.elapsed() >= Duration::from_secs(2),
        "expected at least two retry cooldowns before success"
    );

    broker.shutdown.notify_waiters();
}

/// Upstream dead: exhausts all retries and returns the synthetic 503 body.
#[tokio::test]
async fn upstream_exhaustion_returns_synthetic_503() {
    let upstream = spawn_fake_upstream(u32::MAX).await;
    let mut config = default_test_config();
    config.scheduler.max_retries = 2;
    config.scheduler.retry_cooldown_secs = 1;
    let broker = start_broker(config, upstream).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{}/v1/chat/completions", broker.front_door_addr))
        .json(&serde_json::json!({"messages": [{"role": "user", "content": "hello"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 503);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Failed after 2 attempts.");

    broker.shutdown.notify_waiters();
}

/// Client timeout: with `JOB_TIMEOUT` shorter than admission takes, the
/// client gets a 504 while the worker keeps running in the background.
#[tokio::test]
async fn client_queue_timeout_returns_504() {
    let upstream = spawn_fake_upstream(0).await;
    let mut config = default_test_config();
    // RPM_LIMIT=1 with burst_factor effectively saturated by a first
    // request means the second request waits past its job timeout.
    config.limits.rpm_limit = 1;
    config.limits.burst_factor = 0.0;
    config.scheduler.job_timeout_secs = 1;
    let broker = start_broker(config, upstream).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{}/v1/chat/completions", broker.front_door_addr))
        .json(&serde_json::json!({"messages": [{"role": "user", "content": "hello"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 504);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Request timed out in APIM queue.");

    broker.shutdown.notify_waiters();
}

/// Daily ceiling already reached: admission succeeds (RPM/TPM have
/// headroom) but the outer daily check re-queues the job to sleep until
/// midnight, so with a short `JOB_TIMEOUT` the client sees a 504 instead
/// of a dispatched response.
#[tokio::test]
async fn daily_quota_exceeded_is_not_dispatched() {
    let upstream = spawn_fake_upstream(0).await;
    let mut config = default_test_config();
    config.limits.rpd_limit = 1;
    config.scheduler.job_timeout_secs = 1;

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    store
        .record_success(SuccessRecord {
            apim_prefix: config.apim_prefix.clone(),
            llm_prefix: config.llm_prefix.clone(),
            input_tokens: 1,
            output_tokens: 1,
            unique_id: clock::new_id(),
            now: clock::now_secs(),
            day: clock::today_utc(),
            seconds_until_midnight: clock::seconds_until_utc_midnight(),
        })
        .await
        .unwrap();

    let broker = start_broker_with_store(config, upstream, store).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{}/v1/chat/completions", broker.front_door_addr))
        .json(&serde_json::json!({"messages": [{"role": "user", "content": "hello"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 504);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Request timed out in APIM queue.");

    broker.shutdown.notify_waiters();
}
