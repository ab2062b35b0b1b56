use crate::error::BrokerError;
use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Build a JSON error response, matching the broker's `{"error": "..."}`
/// body shape used by every error surface.
pub fn error_response(status: StatusCode, msg: &str) -> hyper::Response<BoxBody> {
    hyper::Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full_body(format!(r#"{{"error":"{}"}}"#, msg)))
        .unwrap()
}

/// Build the HTTP surface for a `BrokerError` — status + `{"error": "..."}`
/// body straight from the error type, matching spec §7's kind-to-surface table.
pub fn broker_error_response(err: &BrokerError) -> hyper::Response<BoxBody> {
    hyper::Response::builder()
        .status(err.status_code())
        .header("content-type", "application/json")
        .body(full_body(err.to_body()))
        .unwrap()
}
