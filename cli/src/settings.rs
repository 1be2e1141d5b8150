//! Config file loading and flag overrides.

use std::path::Path;

use anyhow::{Context, Result};
use capturekit::{ClientConfig, DiscoveryOptions, StreamSettings};
use serde::{Deserialize, Serialize};

use crate::cli::CaptureArgs;

/// Everything the tool reads from `--config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub client: ClientConfig,
    pub stream: StreamSettings,
    pub discovery: DiscoveryOptions,
}

impl FileConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("invalid config file")?;
        config.client.validate()?;
        Ok(config)
    }

    /// Load `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&json)
    }
}

impl CaptureArgs {
    /// Layer the flags that were given over `settings`.
    pub fn apply(&self, settings: &mut StreamSettings) {
        if let Some(width) = self.width {
            settings.width = width;
        }
        if let Some(height) = self.height {
            settings.height = height;
        }
        if let Some(fps) = self.fps {
            settings.minimum_frame_interval = if fps > 0.0 { 1.0 / fps } else { 0.0 };
        }
        if self.hide_cursor {
            settings.shows_cursor = false;
        }
        if self.audio {
            settings.captures_audio = true;
        }
        if let Some(depth) = self.queue_depth {
            settings.queue_depth = depth;
        }
    }
}
