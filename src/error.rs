//! Error types for programmer operations

use thiserror::Error;

/// Everything that can go wrong while talking to the programmer.
///
/// `SizeViolation` is raised before anything is written to the transport.
/// `Nack` and `UnexpectedResponse` mean the exchange completed but the
/// programmer answered something other than the acknowledgment.
#[derive(Debug, Error)]
pub enum Error {
    /// An exact-count read did not complete in time
    #[error("timed out after {timeout_ms} ms: expected {expected} bytes, received {received}")]
    TransportTimeout {
        expected: usize,
        received: usize,
        timeout_ms: u64,
    },

    /// The received bytes match no valid outcome of the running operation
    #[error("unexpected response to {operation}: expected {expected}, received [{}]", hex::encode(.received))]
    UnexpectedResponse {
        operation: &'static str,
        expected: &'static str,
        received: Vec<u8>,
    },

    /// The programmer answered with the reject token
    #[error("{operation} rejected by programmer")]
    Nack { operation: &'static str },

    /// Image or chip shape does not fit the operation
    #[error("size violation: {0}")]
    SizeViolation(String),

    /// Operation issued outside of its session-state precondition
    #[error("protocol usage error: {0}")]
    ProtocolUsage(String),

    /// Operation not implemented by the selected command set
    #[error("{0} is not supported by this protocol variant")]
    Unsupported(&'static str),

    #[error("encoding error: {0}")]
    Encode(#[from] scroll::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Result type for programmer operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The transport itself failed; the session cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Serial(_))
    }

    /// Whether repeating the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransportTimeout { .. } | Error::UnexpectedResponse { .. } | Error::Nack { .. }
        )
    }

    pub(crate) fn unexpected(
        operation: &'static str,
        expected: &'static str,
        received: &[u8],
    ) -> Self {
        Error::UnexpectedResponse {
            operation,
            expected,
            received: received.to_vec(),
        }
    }
}
