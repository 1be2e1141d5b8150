//! Stream session state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a capture stream.
#[repr(i32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamState {
    /// Stream exists but has not been started.
    #[default]
    Created = 0,

    /// Start accepted, completion pending.
    Starting = 1,

    /// Provider session is delivering frames.
    Capturing = 2,

    /// Stop accepted, completion pending.
    Stopping = 3,

    /// Capture has ended.
    Stopped = 4,

    /// The provider reported a failure.
    Error = 5,

    /// The last reference to the stream was dropped.
    Released = 6,
}

impl StreamState {
    /// Maps the C ABI values 0 (created) through 6 (released).
    pub const fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Created),
            1 => Some(Self::Starting),
            2 => Some(Self::Capturing),
            3 => Some(Self::Stopping),
            4 => Some(Self::Stopped),
            5 => Some(Self::Error),
            6 => Some(Self::Released),
            _ => None,
        }
    }

    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Returns true if `start` is accepted in this state.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Created)
    }

    /// Returns true if `stop` is accepted in this state.
    pub fn can_stop(self) -> bool {
        matches!(self, Self::Capturing)
    }

    /// Returns true if the configuration may be replaced in this state.
    pub fn can_update(self) -> bool {
        matches!(self, Self::Created | Self::Capturing)
    }

    /// Returns true if output handlers may be registered in this state.
    pub fn can_add_output(self) -> bool {
        matches!(self, Self::Created | Self::Starting | Self::Capturing)
    }

    /// Returns true if the provider is (or is about to be) delivering frames.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Capturing | Self::Stopping)
    }

    /// Returns true if no further transition other than release is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error | Self::Released)
    }

    /// Returns a simple string representation of the state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Starting => "Starting",
            Self::Capturing => "Capturing",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
            Self::Released => "Released",
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_only_from_created() {
        assert!(StreamState::Created.can_start());
        for state in [
            StreamState::Starting,
            StreamState::Capturing,
            StreamState::Stopping,
            StreamState::Stopped,
            StreamState::Error,
            StreamState::Released,
        ] {
            assert!(!state.can_start(), "{state} should reject start");
        }
    }

    #[test]
    fn test_stop_only_from_capturing() {
        assert!(StreamState::Capturing.can_stop());
        assert!(!StreamState::Created.can_stop());
        assert!(!StreamState::Stopped.can_stop());
    }

    #[test]
    fn test_update_allowed_states() {
        assert!(StreamState::Created.can_update());
        assert!(StreamState::Capturing.can_update());
        assert!(!StreamState::Starting.can_update());
        assert!(!StreamState::Error.can_update());
    }

    #[test]
    fn test_raw_round_trip() {
        for raw in 0..7 {
            assert_eq!(StreamState::from_raw(raw).map(StreamState::as_raw), Some(raw));
        }
        assert_eq!(StreamState::from_raw(-1), None);
    }
}
