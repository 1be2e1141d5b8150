//! Error types for the native object layer.

use capturekit_types::{ErrorKind, InvalidConfiguration, Status, StreamErrorCode, StreamState};
use thiserror::Error;

use crate::handle::HandleId;

/// A caller broke the handle ownership rules.
///
/// At the C boundary every variant except `Null` is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContractViolation {
    /// The handle was never issued by this table.
    #[error("handle {0} was never issued")]
    Unknown(HandleId),

    /// The handle was issued but its last reference is gone.
    #[error("handle {0} was already released")]
    Released(HandleId),

    /// The handle refers to a different kind of object.
    #[error("handle {id} is a {actual}, expected a {expected}")]
    TypeMismatch {
        id: HandleId,
        expected: &'static str,
        actual: &'static str,
    },

    /// A null handle was passed where one is required.
    #[error("null handle")]
    Null,
}

impl ContractViolation {
    /// Null handles are ordinary parameter errors, everything else is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Null)
    }
}

/// Errors from the surface lock protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("surface is not locked")]
    NotLocked,

    #[error("no outstanding lock with options {0:#x}")]
    LockMismatch(u32),

    #[error("unsupported lock options {0:#x}")]
    InvalidOptions(u32),

    #[error("plane index {index} out of range (plane count {count})")]
    PlaneOutOfRange { index: usize, count: usize },

    #[error("surface is being written by the provider")]
    Busy,

    #[error("surface is locked and read-write access is exclusive")]
    Contended,
}

impl SurfaceError {
    /// C ABI status for this error.
    pub fn status(&self) -> Status {
        match self {
            Self::NotLocked => Status::NotLocked,
            Self::LockMismatch(_) => Status::LockMismatch,
            Self::InvalidOptions(_) => Status::InvalidParameter,
            Self::PlaneOutOfRange { .. } => Status::OutOfRange,
            Self::Busy | Self::Contended => Status::InvalidState,
        }
    }
}

/// Errors returned synchronously by bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Contract(#[from] ContractViolation),

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("cannot {operation} a stream in state {state}")]
    InvalidState {
        operation: &'static str,
        state: StreamState,
    },

    #[error("index {index} out of range (count {count})")]
    OutOfRange { index: usize, count: usize },

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error("invalid configuration: {0}")]
    Configuration(#[from] InvalidConfiguration),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl BridgeError {
    /// Status code reported across the C boundary.
    pub fn status(&self) -> Status {
        match self {
            Self::Contract(_) | Self::InvalidParameter(_) => Status::InvalidParameter,
            Self::InvalidState { .. } => Status::InvalidState,
            Self::OutOfRange { .. } => Status::OutOfRange,
            Self::Surface(e) => e.status(),
            Self::Configuration(_) => Status::ConfigurationError,
            Self::Unsupported(_) | Self::Spawn(_) => Status::Unsupported,
        }
    }
}

/// The payload of an error object handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct NativeError {
    pub kind: ErrorKind,

    /// Provider domain code, or 0.
    pub code: i32,

    pub message: String,
}

impl NativeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: 0,
            message: message.into(),
        }
    }

    /// An error carrying one of the provider's stream codes.
    pub fn from_stream_code(code: StreamErrorCode) -> Self {
        Self {
            kind: code.kind(),
            code: code.as_raw(),
            message: code.description().to_string(),
        }
    }

    /// Replace the description, keeping kind and code.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Human-readable description. Stable for a given error.
    pub fn describe(&self) -> String {
        if self.code == 0 {
            self.to_string()
        } else {
            format!("{} (code {})", self, self.code)
        }
    }

    /// The provider stream code, if this error carries one.
    pub fn stream_code(&self) -> Option<StreamErrorCode> {
        StreamErrorCode::from_raw(self.code)
    }
}

impl From<InvalidConfiguration> for NativeError {
    fn from(err: InvalidConfiguration) -> Self {
        Self::new(ErrorKind::Configuration, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            BridgeError::from(SurfaceError::LockMismatch(1)).status(),
            Status::LockMismatch
        );
        assert_eq!(
            BridgeError::InvalidState {
                operation: "start",
                state: StreamState::Capturing,
            }
            .status(),
            Status::InvalidState
        );
        assert_eq!(
            BridgeError::from(InvalidConfiguration::ChannelCount(3)).status(),
            Status::ConfigurationError
        );
    }

    #[test]
    fn test_describe_includes_code() {
        let err = NativeError::from_stream_code(StreamErrorCode::UserDeclined);
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert!(err.describe().contains("-3801"));
        assert_eq!(err.describe(), err.describe());
        assert_eq!(err.stream_code(), Some(StreamErrorCode::UserDeclined));
    }

    #[test]
    fn test_null_is_not_fatal() {
        assert!(!ContractViolation::Null.is_fatal());
        assert!(ContractViolation::Unknown(HandleId::MIN).is_fatal());
    }
}
