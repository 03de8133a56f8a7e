//! Client-side RPC error types.
//!
//! This module provides [`ClientError`], the error type for every client
//! operation. Cancellation and deadline expiry are distinct variants so a
//! caller can tell "timed out" from "cancelled" without inspecting codes.

use piperpc_core::{Code, FrameError, Status};

/// Client-side error variants.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// The call was cancelled locally (call token or per-read token).
    #[error("call cancelled")]
    Cancelled,

    /// The call deadline expired.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The server finished the call with a non-OK status.
    #[error("{code}: {}", .message.as_deref().unwrap_or(""))]
    Status {
        code: Code,
        message: Option<String>,
    },

    /// Transport-level error (connect failed, pipe broken, peer went away).
    #[error("transport error: {0}")]
    Transport(String),

    /// Message encoding error.
    #[error("encode error: {0}")]
    Encode(String),

    /// Message decoding error.
    #[error("decode error: {0}")]
    Decode(String),

    /// Protocol error (malformed or unexpected frames).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation not valid in the current call state.
    #[error("invalid call state: {0}")]
    InvalidState(String),
}

impl ClientError {
    /// Create a new status error with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        ClientError::Status {
            code,
            message: Some(message.into()),
        }
    }

    /// Create a new status error with just a code.
    pub fn from_code(code: Code) -> Self {
        ClientError::Status {
            code,
            message: None,
        }
    }

    /// Get the status code for this error.
    ///
    /// For non-Status variants, returns an appropriate code:
    /// - Cancelled: `Canceled`
    /// - DeadlineExceeded: `DeadlineExceeded`
    /// - Transport: `Unavailable`
    /// - Encode/Decode/Protocol: `Internal`
    /// - InvalidState: `FailedPrecondition`
    pub fn code(&self) -> Code {
        match self {
            ClientError::Cancelled => Code::Canceled,
            ClientError::DeadlineExceeded => Code::DeadlineExceeded,
            ClientError::Status { code, .. } => *code,
            ClientError::Transport(_) => Code::Unavailable,
            ClientError::Encode(_) | ClientError::Decode(_) | ClientError::Protocol(_) => {
                Code::Internal
            }
            ClientError::InvalidState(_) => Code::FailedPrecondition,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> Option<&str> {
        match self {
            ClientError::Cancelled | ClientError::DeadlineExceeded => None,
            ClientError::Status { message, .. } => message.as_deref(),
            ClientError::Transport(msg)
            | ClientError::Encode(msg)
            | ClientError::Decode(msg)
            | ClientError::Protocol(msg)
            | ClientError::InvalidState(msg) => Some(msg),
        }
    }

    /// Whether this error is a local cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }

    /// Whether this error is a local deadline expiry.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, ClientError::DeadlineExceeded)
    }

    /// Returns whether this error indicates a transient condition that may
    /// be resolved by retrying.
    ///
    /// # Example
    ///
    /// ```
    /// use piperpc_client::ClientError;
    ///
    /// assert!(ClientError::Transport("pipe busy".into()).is_retryable());
    /// assert!(!ClientError::Cancelled.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    pub(crate) fn invalid_state<S: Into<String>>(message: S) -> Self {
        ClientError::InvalidState(message.into())
    }
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        ClientError::Status {
            code: status.code(),
            message: status.message().map(str::to_owned),
        }
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => ClientError::Transport(e.to_string()),
            other => ClientError::Protocol(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_new() {
        let err = ClientError::new(Code::NotFound, "resource not found");
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.message(), Some("resource not found"));
        assert_eq!(err.to_string(), "not_found: resource not found");
    }

    #[test]
    fn test_client_error_variants_code() {
        assert_eq!(ClientError::Cancelled.code(), Code::Canceled);
        assert_eq!(ClientError::DeadlineExceeded.code(), Code::DeadlineExceeded);
        assert_eq!(ClientError::Transport("eof".into()).code(), Code::Unavailable);
        assert_eq!(ClientError::Encode("x".into()).code(), Code::Internal);
        assert_eq!(ClientError::Decode("x".into()).code(), Code::Internal);
        assert_eq!(ClientError::Protocol("x".into()).code(), Code::Internal);
        assert_eq!(
            ClientError::invalid_state("no trailers").code(),
            Code::FailedPrecondition
        );
    }

    #[test]
    fn test_from_status() {
        let err = ClientError::from(Status::cancelled("server gave up"));
        assert_eq!(err.code(), Code::Canceled);
        assert_eq!(err.message(), Some("server gave up"));
        // A server-reported cancellation is not a local one.
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_from_frame_error() {
        let err = ClientError::from(FrameError::UnknownKind(9));
        assert!(matches!(err, ClientError::Protocol(_)));

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken");
        let err = ClientError::from(FrameError::Io(io));
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[test]
    fn test_client_error_is_retryable() {
        assert!(ClientError::new(Code::Unavailable, "down").is_retryable());
        assert!(ClientError::Transport("connection reset".into()).is_retryable());
        assert!(!ClientError::DeadlineExceeded.is_retryable());
        assert!(!ClientError::new(Code::NotFound, "missing").is_retryable());
    }
}
