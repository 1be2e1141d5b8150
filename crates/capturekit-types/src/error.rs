//! Error taxonomy and boundary status codes.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of every failure the bridge reports.
///
/// The numeric values are stable and are what `sc_error_get_kind` returns.
#[repr(i32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[default]
    Unknown = 0,
    ContentUnavailable = 1,
    Stream = 2,
    Configuration = 3,
    Screenshot = 4,
    Recording = 5,
    Picker = 6,
    InvalidParameter = 7,
    PermissionDenied = 8,
}

impl ErrorKind {
    pub const fn from_raw(value: i32) -> Self {
        match value {
            1 => Self::ContentUnavailable,
            2 => Self::Stream,
            3 => Self::Configuration,
            4 => Self::Screenshot,
            5 => Self::Recording,
            6 => Self::Picker,
            7 => Self::InvalidParameter,
            8 => Self::PermissionDenied,
            _ => Self::Unknown,
        }
    }

    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Returns true if retrying cannot help until the user intervenes.
    pub const fn requires_user_action(self) -> bool {
        matches!(self, Self::PermissionDenied)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown error",
            Self::ContentUnavailable => "content unavailable",
            Self::Stream => "stream error",
            Self::Configuration => "configuration error",
            Self::Screenshot => "screenshot error",
            Self::Recording => "recording error",
            Self::Picker => "picker error",
            Self::InvalidParameter => "invalid parameter",
            Self::PermissionDenied => "permission denied",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Domain codes reported by the capture provider for stream failures.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamErrorCode {
    UserDeclined = -3801,
    FailedToStartAudioCapture = -3802,
    FailedToStart = -3803,
    AttemptToStartStreamState = -3804,
    AttemptToStopStreamState = -3805,
    AttemptToUpdateFilterState = -3806,
    AttemptToConfigState = -3807,
    InternalError = -3808,
    InvalidParameter = -3809,
    NoWindowList = -3810,
    NoDisplayList = -3811,
    NoCaptureSource = -3812,
    RemovingStream = -3813,
    UserStopped = -3814,
    FailedToStartExtension = -3815,
    FailedToStartMicrophoneCapture = -3816,
    SystemStoppedStream = -3817,
}

impl StreamErrorCode {
    const ALL: [StreamErrorCode; 17] = [
        Self::UserDeclined,
        Self::FailedToStartAudioCapture,
        Self::FailedToStart,
        Self::AttemptToStartStreamState,
        Self::AttemptToStopStreamState,
        Self::AttemptToUpdateFilterState,
        Self::AttemptToConfigState,
        Self::InternalError,
        Self::InvalidParameter,
        Self::NoWindowList,
        Self::NoDisplayList,
        Self::NoCaptureSource,
        Self::RemovingStream,
        Self::UserStopped,
        Self::FailedToStartExtension,
        Self::FailedToStartMicrophoneCapture,
        Self::SystemStoppedStream,
    ];

    pub fn from_raw(value: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_raw() == value)
    }

    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Taxonomy bucket for this code.
    pub const fn kind(self) -> ErrorKind {
        match self {
            Self::UserDeclined => ErrorKind::PermissionDenied,
            Self::NoWindowList | Self::NoDisplayList | Self::NoCaptureSource => {
                ErrorKind::ContentUnavailable
            }
            Self::InvalidParameter => ErrorKind::InvalidParameter,
            _ => ErrorKind::Stream,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::UserDeclined => "the user declined capture permission",
            Self::FailedToStartAudioCapture => "failed to start audio capture",
            Self::FailedToStart => "failed to start the stream",
            Self::AttemptToStartStreamState => "the stream is already started",
            Self::AttemptToStopStreamState => "the stream is already stopped",
            Self::AttemptToUpdateFilterState => "cannot update the filter in this state",
            Self::AttemptToConfigState => "cannot update the configuration in this state",
            Self::InternalError => "internal capture error",
            Self::InvalidParameter => "invalid parameter",
            Self::NoWindowList => "no window list available",
            Self::NoDisplayList => "no display list available",
            Self::NoCaptureSource => "the capture source is not available",
            Self::RemovingStream => "failed to remove the stream",
            Self::UserStopped => "the user stopped the stream",
            Self::FailedToStartExtension => "failed to start the capture extension",
            Self::FailedToStartMicrophoneCapture => "failed to start microphone capture",
            Self::SystemStoppedStream => "the system stopped the stream",
        }
    }
}

impl fmt::Display for StreamErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_raw())
    }
}

/// Status returned synchronously by every boundary call that can fail locally.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok = 0,
    InvalidParameter = -1,
    InvalidState = -2,
    OutOfRange = -3,
    NotLocked = -4,
    LockMismatch = -5,
    ConfigurationError = -6,
    Unsupported = -7,
}

impl Status {
    pub const fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            -1 => Some(Self::InvalidParameter),
            -2 => Some(Self::InvalidState),
            -3 => Some(Self::OutOfRange),
            -4 => Some(Self::NotLocked),
            -5 => Some(Self::LockMismatch),
            -6 => Some(Self::ConfigurationError),
            -7 => Some(Self::Unsupported),
            _ => None,
        }
    }

    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::InvalidParameter => "invalid parameter",
            Self::InvalidState => "invalid state",
            Self::OutOfRange => "index out of range",
            Self::NotLocked => "not locked",
            Self::LockMismatch => "lock options mismatch",
            Self::ConfigurationError => "configuration error",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stream configuration failed validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidConfiguration {
    #[error("{field} must be between 1 and {max}, got {value}")]
    Dimension {
        field: &'static str,
        value: u32,
        max: u32,
    },

    #[error("queue depth must be between 1 and {max}, got {value}")]
    QueueDepth { value: u32, max: u32 },

    #[error("unsupported sample rate {0}")]
    SampleRate(u32),

    #[error("channel count must be 1 or 2, got {0}")]
    ChannelCount(u32),

    #[error("minimum frame interval must be finite and non-negative, got {0}")]
    FrameInterval(f64),

    #[error("source rect must have a positive size")]
    SourceRect,

    #[error("a stream requires an error handler")]
    MissingErrorHandler,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_permission_denied_requires_user_action() {
        for raw in 0..=8 {
            let kind = ErrorKind::from_raw(raw);
            assert_eq!(kind.as_raw(), raw);
            assert_eq!(kind.requires_user_action(), kind == ErrorKind::PermissionDenied);
        }
    }

    #[test]
    fn test_unknown_kind_fallback() {
        assert_eq!(ErrorKind::from_raw(42), ErrorKind::Unknown);
    }

    #[test]
    fn test_stream_error_codes() {
        assert_eq!(StreamErrorCode::UserDeclined.as_raw(), -3801);
        assert_eq!(StreamErrorCode::NoCaptureSource.as_raw(), -3812);
        assert_eq!(StreamErrorCode::SystemStoppedStream.as_raw(), -3817);
        assert_eq!(StreamErrorCode::from_raw(-3814), Some(StreamErrorCode::UserStopped));
        assert_eq!(StreamErrorCode::from_raw(-3800), None);
        assert_eq!(StreamErrorCode::from_raw(-3818), None);
    }

    #[test]
    fn test_stream_error_kinds() {
        assert_eq!(StreamErrorCode::UserDeclined.kind(), ErrorKind::PermissionDenied);
        assert_eq!(StreamErrorCode::NoCaptureSource.kind(), ErrorKind::ContentUnavailable);
        assert_eq!(StreamErrorCode::InternalError.kind(), ErrorKind::Stream);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Ok.as_raw(), 0);
        assert_eq!(Status::Unsupported.as_raw(), -7);
        assert_eq!(Status::from_raw(-4), Some(Status::NotLocked));
        assert_eq!(Status::from_raw(-8), None);
    }
}
