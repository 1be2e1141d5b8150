//! Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stream::{FrameStreamOptions, OverflowPolicy};

/// Default frame queue capacity, matching the default surface queue depth.
pub const DEFAULT_FRAME_QUEUE_CAPACITY: usize = 3;

/// Errors loading a [`ClientConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid client configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame queue capacity must be at least 1")]
    ZeroCapacity,
}

/// How the wrapper buffers and waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Samples a frame stream holds before the overflow policy applies.
    pub frame_queue_capacity: usize,

    pub overflow_policy: OverflowPolicy,

    /// How long blocking waits on completions last (None waits forever).
    pub completion_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            frame_queue_capacity: DEFAULT_FRAME_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::DropNewest,
            completion_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }

    /// Timeout for blocking waits, if one is configured.
    pub fn completion_timeout(&self) -> Option<Duration> {
        self.completion_timeout_ms.map(Duration::from_millis)
    }

    /// Frame queue options for [`CaptureStream::frames`](crate::CaptureStream::frames).
    pub fn frame_options(&self) -> FrameStreamOptions {
        FrameStreamOptions {
            capacity: self.frame_queue_capacity,
            overflow: self.overflow_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_json("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.frame_options().capacity, 3);
        assert_eq!(config.completion_timeout(), None);
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_json(
            r#"{"frame_queue_capacity": 8, "overflow_policy": "drop_oldest", "completion_timeout_ms": 2500}"#,
        )
        .unwrap();
        assert_eq!(config.frame_options().overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.completion_timeout(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = ClientConfig::from_json(r#"{"frame_queue_capacity": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroCapacity));
    }
}
