use super::BrokerState;
use crate::proxy::context::full_body;
use crate::proxy::BoxBody;
use hyper::body::Incoming;
use hyper::{Request, Response};

pub fn handle_admin(
    req: Request<Incoming>,
    state: BrokerState,
) -> Result<Response<BoxBody>, hyper::Error> {
    match req.uri().path() {
        "/health" | "/healthz" => Ok(Response::builder()
            .status(200)
            .body(full_body(r#"{"status":"ok"}"#))
            .unwrap()),

        "/ready" | "/readyz" => Ok(Response::builder()
            .status(200)
            .body(full_body(format!(
                r#"{{"status":"ready","queue_depth":{}}}"#,
                state.queue.len()
            )))
            .unwrap()),

        "/metrics" => {
            let body = state.metrics.render();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap())
        }

        _ => Ok(Response::builder()
            .status(404)
            .body(full_body(r#"{"error":"not found"}"#))
            .unwrap()),
    }
}
