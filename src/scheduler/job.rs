//! The unit of work the scheduler moves through ADMIT → DISPATCH → RECORD.

use tokio::sync::oneshot;

/// The result the Front Door is waiting on — upstream body + status, or
/// whatever terminal error short-circuited dispatch.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub body: String,
    pub status: u16,
}

/// A queued chat-completion request.
///
/// `completion` collapses "signal done" and "hand back the result" into a
/// single channel: sending on it both delivers the result and wakes the
/// Front Door's waiter. If the Front Door has already timed out and
/// dropped its receiver, the send silently fails — the worker still runs
/// dispatch and accounting to completion; it does not cancel the
/// in-flight upstream call.
pub struct Job {
    pub request_id: String,
    pub payload: serde_json::Value,
    pub input_tokens: u64,
    pub enqueued_at: std::time::Instant,
    completion: oneshot::Sender<JobResult>,
}

impl Job {
    pub fn new(
        request_id: String,
        payload: serde_json::Value,
        input_tokens: u64,
    ) -> (Self, oneshot::Receiver<JobResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request_id,
                payload,
                input_tokens,
                enqueued_at: std::time::Instant::now(),
                completion: tx,
            },
            rx,
        )
    }

    /// Deliver the result to whoever is still waiting. A dropped receiver
    /// (Front Door timed out) is not an error.
    pub fn complete(self, result: JobResult) {
        let _ = self.completion.send(result);
    }
}
