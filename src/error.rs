use std::fmt;

/// Error kinds a broker operation can fail with.
///
/// `AdmissionDenied` deliberately has no variant here — a denial always
/// drives a backoff + re-enqueue inside the scheduler, it never surfaces
/// past that loop.
#[derive(Debug)]
pub enum BrokerError {
    Parse(String),
    UpstreamTransient(String),
    UpstreamExhausted { attempts: u32 },
    QueueTimeout,
    StoreUnavailable(String),
    Internal(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Parse(msg) => write!(f, "malformed request body: {}", msg),
            BrokerError::UpstreamTransient(msg) => write!(f, "upstream transient error: {}", msg),
            BrokerError::UpstreamExhausted { attempts } => {
                write!(f, "Failed after {} attempts.", attempts)
            }
            BrokerError::QueueTimeout => write!(f, "Request timed out in APIM queue."),
            BrokerError::StoreUnavailable(msg) => write!(f, "store unavailable: {}", msg),
            BrokerError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {}

impl BrokerError {
    /// HTTP status this error surfaces to the client as.
    pub fn status_code(&self) -> u16 {
        match self {
            BrokerError::Parse(_) => 400,
            BrokerError::UpstreamTransient(_) => 502,
            BrokerError::UpstreamExhausted { .. } => 503,
            BrokerError::QueueTimeout => 504,
            BrokerError::StoreUnavailable(_) => 500,
            BrokerError::Internal(_) => 500,
        }
    }

    /// The JSON body shape every error surface uses: `{"error": "<message>"}`.
    pub fn to_body(&self) -> String {
        serde_json::json!({ "error": self.to_string() }).to_string()
    }
}
