//! Companion mock upstream.
//!
//! Exposes the same `POST /v1/chat/completions` shape the real upstream
//! would, echoes a synthetic assistant message, and enforces its own
//! RPM/TPM/RPD/TPD limits via `mock_limiter::MockLimiter` — the one place
//! in this repository where the daily check is folded into the same
//! atomic step as the per-minute check.
//!
//! No streaming SSE support, matching the broker's own non-streaming
//! contract.

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use llm_broker::mock_limiter::MockLimiter;
use llm_broker::tokens;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

#[derive(Parser)]
#[command(name = "mock-upstream", about = "Rate-limit-enforcing mock of the upstream LLM API")]
struct Cli {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8000")]
    listen: String,

    #[arg(long, default_value_t = 100)]
    rpm_limit: u64,

    #[arg(long, default_value_t = 100_000)]
    tpm_limit: u64,

    #[arg(long, default_value_t = 5_000)]
    rpd_limit: u64,

    #[arg(long, default_value_t = 5_000_000)]
    tpd_limit: u64,

    /// Safety headroom multiplier applied to every enforced limit.
    #[arg(long, default_value_t = 1.0)]
    latency: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let limiter = Arc::new(MockLimiter::new(
        cli.rpm_limit,
        cli.tpm_limit,
        cli.rpd_limit,
        cli.tpd_limit,
        cli.latency,
    ));

    let addr: SocketAddr = cli.listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("mock_upstream: listening, addr={}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let limiter = limiter.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let limiter = limiter.clone();
                async move { handle(req, limiter).await }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    tracing::error!("mock_upstream: connection error, error={}", e);
                }
            }
        });
    }
}

async fn handle(
    req: Request<Incoming>,
    limiter: Arc<MockLimiter>,
) -> Result<Response<BoxBody>, hyper::Error> {
    if req.method() != hyper::Method::POST || req.uri().path() != "/v1/chat/completions" {
        return Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(full_body(r#"{"error":"not found"}"#))
            .unwrap());
    }

    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => {
            return Ok(json_response(
                StatusCode::BAD_REQUEST,
                json!({ "error": "malformed request body" }),
            ))
        }
    };

    let payload: serde_json::Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => {
            return Ok(json_response(
                StatusCode::BAD_REQUEST,
                json!({ "error": format!("malformed request body: {}", e) }),
            ))
        }
    };

    let model = payload
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("gpt-4o")
        .to_string();
    let input_tokens = tokens::input_tokens(&payload);

    if let Err(rejected) = limiter.check_and_record(input_tokens).await {
        metrics_note("rejected");
        return Ok(json_response(
            StatusCode::TOO_MANY_REQUESTS,
            json!({ "error": rejected.message() }),
        ));
    }
    metrics_note("accepted");

    Ok(json_response(StatusCode::OK, echo_response(&model)))
}

fn metrics_note(outcome: &str) {
    metrics::counter!("mock_upstream_requests_total", "outcome" => outcome.to_string()).increment(1);
}

/// Synthetic assistant reply: `"<timestamp>-<uuid>"`.
fn echo_response(model: &str) -> serde_json::Value {
    let now = chrono::Utc::now();
    let content = format!("{}-{}", now.format("%Y-%m-%d %H:%M:%S%.6f"), uuid::Uuid::new_v4());

    json!({
        "id": format!("chat_completions-{}", uuid::Uuid::new_v4().simple()),
        "object": "chat.completion",
        "created": now.timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
        "usage": { "prompt_tokens": 15, "completion_tokens": 20, "total_tokens": 35 },
    })
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full_body(body.to_string()))
        .unwrap()
}
