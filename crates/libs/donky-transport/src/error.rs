use thiserror::Error;

/// Failures surfaced by a synchronise submission.
///
/// Channel-level failures never escape the selector: they are retried on
/// the stateless fallback inside the same call, so callers only see the
/// variants below.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// Connectivity failure or server-side 5xx on the stateless path.
    #[error("network failure: {0}")]
    Network(String),

    /// The submission deadline elapsed before a response arrived.
    #[error("submission timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The server answered but the body could not be interpreted.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// No usable path: the channel failed and the fallback failed too.
    #[error("all transports failed: {0}")]
    Exhausted(String),
}

impl TransportError {
    /// Every transport failure leaves the outbound batch retryable on a
    /// later cycle; a malformed response is treated the same way (fail
    /// closed, retry later) per the engine's error policy.
    pub fn retryable(&self) -> bool {
        true
    }
}
