use crate::error::BrokerError;
use crate::proxy::context::{broker_error_response, error_response, full_body, BoxBody};
use crate::scheduler::Job;
use crate::server::BrokerState;
use crate::tokens;
use http::StatusCode;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// The Front Door: parse → enqueue → await completion → respond.
pub async fn handle_request(
    req: Request<Incoming>,
    state: BrokerState,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if method != hyper::Method::POST || path != "/v1/chat/completions" {
        return Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(full_body(r#"{"error":"not found"}"#))
            .unwrap());
    }

    let start = Instant::now();
    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let err = BrokerError::Parse(e.to_string());
            warn!("front_door: failed to read request body, error={}", err);
            return Ok(broker_error_response(&err));
        }
    };

    let payload: serde_json::Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => {
            let err = BrokerError::Parse(e.to_string());
            debug!("front_door: body is not valid JSON, error={}", err);
            return Ok(broker_error_response(&err));
        }
    };

    let request_id = crate::clock::new_id();
    let input_tokens = tokens::input_tokens(&payload);

    let (job, completion) = Job::new(request_id.clone(), payload, input_tokens);
    metrics::counter!("broker_jobs_enqueued_total").increment(1);
    state.queue.push(job).await;

    let job_timeout = Duration::from_secs(state.config.scheduler.job_timeout_secs);
    let response = match tokio::time::timeout(job_timeout, completion).await {
        Ok(Ok(result)) => Response::builder()
            .status(result.status)
            .header("content-type", "application/json")
            .body(full_body(result.body))
            .unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")),
        Ok(Err(_)) => {
            // Worker dropped the sender without completing — treat as internal error.
            broker_error_response(&BrokerError::Internal(
                "worker dropped completion channel".to_string(),
            ))
        }
        Err(_) => {
            debug!("front_door: request_id={} timed out in queue", request_id);
            broker_error_response(&BrokerError::QueueTimeout)
        }
    };

    debug!(
        "front_door: request_id={} status={} latency_ms={}",
        request_id,
        response.status(),
        start.elapsed().as_millis()
    );

    Ok(response)
}
