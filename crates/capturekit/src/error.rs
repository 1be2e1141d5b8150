//! Error types for the safe wrapper.

use capturekit_types::{ErrorKind, Status, StreamErrorCode};
use thiserror::Error;

use crate::handle::ErrorObject;

/// Errors returned by the safe wrapper.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    /// A call was rejected synchronously at the boundary.
    #[error("{operation} failed: {status}")]
    Rejected {
        operation: &'static str,
        status: Status,
    },

    /// The provider reported a failure through an error object.
    #[error("{message}")]
    Native {
        kind: ErrorKind,
        code: i32,
        message: String,
    },

    /// A call that should return a handle returned none.
    #[error("{0} returned no handle")]
    NullHandle(&'static str),

    /// A string argument contained an interior NUL.
    #[error("{0} contains a NUL byte")]
    InteriorNul(&'static str),

    /// The completion was dropped without being resolved.
    #[error("completion abandoned before it resolved")]
    Abandoned,

    /// Waiting for a completion timed out. The operation keeps running.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Buffer size is unknown for this pixel format or plane.
    #[error("unknown pixel format {0:#010x}")]
    UnknownPixelFormat(u32),
}

impl CaptureError {
    /// Classify the error in the capture taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Rejected { status, .. } => match status {
                Status::ConfigurationError => ErrorKind::Configuration,
                Status::InvalidState => ErrorKind::Stream,
                Status::InvalidParameter
                | Status::OutOfRange
                | Status::NotLocked
                | Status::LockMismatch => ErrorKind::InvalidParameter,
                Status::Ok | Status::Unsupported => ErrorKind::Unknown,
            },
            Self::Native { kind, .. } => *kind,
            Self::NullHandle(_) | Self::Abandoned | Self::Timeout(_) => ErrorKind::Unknown,
            Self::InteriorNul(_) | Self::UnknownPixelFormat(_) => ErrorKind::InvalidParameter,
        }
    }

    /// The synchronous status, for rejected calls.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The provider's stream error code, when it reported one.
    pub fn stream_error_code(&self) -> Option<StreamErrorCode> {
        match self {
            Self::Native { code, .. } => StreamErrorCode::from_raw(*code),
            _ => None,
        }
    }

    /// Returns true if the user has to act (grant permission) before a retry can succeed.
    pub fn requires_user_action(&self) -> bool {
        self.kind().requires_user_action()
    }

    pub(crate) fn from_error_object(error: &ErrorObject) -> Self {
        Self::Native {
            kind: error.kind(),
            code: error.code(),
            message: error.describe(),
        }
    }
}

/// Result type for the safe wrapper.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Turn a boundary status code into a result.
pub(crate) fn check(operation: &'static str, code: i32) -> Result<()> {
    match Status::from_raw(code) {
        Some(Status::Ok) => Ok(()),
        Some(status) => Err(CaptureError::Rejected { operation, status }),
        None => Err(CaptureError::Rejected {
            operation,
            status: Status::InvalidParameter,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_maps_status_codes() {
        assert!(check("op", 0).is_ok());

        let err = check("start", -2).unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidState));
        assert_eq!(err.kind(), ErrorKind::Stream);
        assert_eq!(err.to_string(), "start failed: invalid state");

        assert_eq!(check("lock", -4).unwrap_err().kind(), ErrorKind::InvalidParameter);
        assert_eq!(check("create", -6).unwrap_err().kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_native_error_classification() {
        let err = CaptureError::Native {
            kind: ErrorKind::PermissionDenied,
            code: StreamErrorCode::UserDeclined.as_raw(),
            message: "declined".into(),
        };
        assert!(err.requires_user_action());
        assert_eq!(err.stream_error_code(), Some(StreamErrorCode::UserDeclined));
        assert_eq!(err.status(), None);
    }
}
