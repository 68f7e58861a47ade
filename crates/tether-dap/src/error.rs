//! DAP runtime error types.

use thiserror::Error;

/// Errors from DAP runtime operations.
#[derive(Debug, Error)]
pub enum DapError {
    /// An incoming message parsed as JSON but failed schema requirements,
    /// or the wire framing itself was malformed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A response body lacked the structure required for its command.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The underlying pipe closed, a write was cut short, or the broker
    /// shut down while a caller was waiting.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The adapter refused a request or was uncooperative during the
    /// handshake. Carries the adapter's message when it sent one.
    #[error("adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// The operation is gated on a capability the adapter did not
    /// advertise, or on a host delegate that is not configured.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// A runtime operation was attempted outside the Running state.
    #[error("session is not active")]
    SessionNotActive,

    /// The adapter process could not be started.
    #[error("adapter process launch failed: {0}")]
    ProcessLaunchFailed(String),
}

impl From<std::io::Error> for DapError {
    fn from(err: std::io::Error) -> Self {
        DapError::TransportFailure(err.to_string())
    }
}
