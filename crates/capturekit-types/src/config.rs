//! Stream configuration and discovery options.

use serde::{Deserialize, Serialize};

use crate::error::InvalidConfiguration;
use crate::geometry::Rect;
use crate::pixel_format::PixelFormat;
use crate::sample::MediaTime;
use crate::{DEFAULT_QUEUE_DEPTH, MAX_DIMENSION};

/// Audio sample rates a stream may request.
pub const SUPPORTED_SAMPLE_RATES: [u32; 5] = [8000, 16000, 24000, 44100, 48000];

/// Largest accepted surface queue depth.
pub const MAX_QUEUE_DEPTH: u32 = 8;

/// Options for shareable-content discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryOptions {
    /// Leave desktop windows (wallpaper, desktop icons) out of the window list.
    pub exclude_desktop_windows: bool,

    /// Only report windows currently on screen.
    pub on_screen_windows_only: bool,
}

/// Scalar options controlling a stream or a screenshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfiguration {
    /// Output width in pixels.
    pub width: u32,

    /// Output height in pixels.
    pub height: u32,

    pub pixel_format: PixelFormat,

    pub shows_cursor: bool,

    /// Scale content to fit the output size.
    pub scales_to_fit: bool,

    pub preserves_aspect_ratio: bool,

    /// Region of the source to capture (None for the whole source).
    pub source_rect: Option<Rect>,

    pub captures_audio: bool,

    /// Audio sample rate in Hz.
    pub sample_rate: u32,

    pub channel_count: u32,

    pub captures_microphone: bool,

    pub excludes_current_process_audio: bool,

    /// Minimum interval between frames, in seconds (0 for unthrottled).
    pub minimum_frame_interval: f64,

    /// Number of surfaces the provider may have in flight.
    pub queue_depth: u32,

    /// Name shown by the system for this stream.
    pub stream_name: Option<String>,
}

impl Default for StreamConfiguration {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            pixel_format: PixelFormat::Bgra32,
            shows_cursor: true,
            scales_to_fit: true,
            preserves_aspect_ratio: true,
            source_rect: None,
            captures_audio: false,
            sample_rate: 48_000,
            channel_count: 2,
            captures_microphone: false,
            excludes_current_process_audio: false,
            minimum_frame_interval: 1.0 / 60.0,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            stream_name: None,
        }
    }
}

impl StreamConfiguration {
    /// Check every field against its accepted range.
    pub fn validate(&self) -> Result<(), InvalidConfiguration> {
        for (field, value) in [("width", self.width), ("height", self.height)] {
            if !(1..=MAX_DIMENSION).contains(&value) {
                return Err(InvalidConfiguration::Dimension {
                    field,
                    value,
                    max: MAX_DIMENSION,
                });
            }
        }

        if !(1..=MAX_QUEUE_DEPTH).contains(&self.queue_depth) {
            return Err(InvalidConfiguration::QueueDepth {
                value: self.queue_depth,
                max: MAX_QUEUE_DEPTH,
            });
        }

        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(InvalidConfiguration::SampleRate(self.sample_rate));
        }

        if !(1..=2).contains(&self.channel_count) {
            return Err(InvalidConfiguration::ChannelCount(self.channel_count));
        }

        if !self.minimum_frame_interval.is_finite() || self.minimum_frame_interval < 0.0 {
            return Err(InvalidConfiguration::FrameInterval(self.minimum_frame_interval));
        }

        if self.source_rect.is_some_and(|r| r.is_empty()) {
            return Err(InvalidConfiguration::SourceRect);
        }

        Ok(())
    }

    /// Minimum frame interval as a media time with a 600 timescale.
    pub fn minimum_frame_interval_time(&self) -> MediaTime {
        MediaTime::from_seconds(self.minimum_frame_interval, 600)
    }

    /// Set the minimum frame interval from a media time. Invalid times clear it.
    pub fn set_minimum_frame_interval_time(&mut self, time: MediaTime) {
        self.minimum_frame_interval = if time.is_valid() { time.seconds() } else { 0.0 };
    }

    /// Frame pacing as a `Duration`, or None when unthrottled.
    pub fn frame_interval(&self) -> Option<std::time::Duration> {
        if self.minimum_frame_interval > 0.0 && self.minimum_frame_interval.is_finite() {
            Some(std::time::Duration::from_secs_f64(self.minimum_frame_interval))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = StreamConfiguration::default();
        assert_eq!((config.width, config.height), (1920, 1080));
        assert_eq!(config.queue_depth, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_width() {
        let config = StreamConfiguration {
            width: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(InvalidConfiguration::Dimension { field: "width", .. })
        ));
    }

    #[test]
    fn test_rejects_oversized_height() {
        let config = StreamConfiguration {
            height: MAX_DIMENSION + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_audio() {
        let rate = StreamConfiguration {
            sample_rate: 22_050,
            ..Default::default()
        };
        assert_eq!(rate.validate(), Err(InvalidConfiguration::SampleRate(22_050)));

        let channels = StreamConfiguration {
            channel_count: 6,
            ..Default::default()
        };
        assert_eq!(channels.validate(), Err(InvalidConfiguration::ChannelCount(6)));
    }

    #[test]
    fn test_rejects_bad_interval_and_depth() {
        let interval = StreamConfiguration {
            minimum_frame_interval: f64::NAN,
            ..Default::default()
        };
        assert!(interval.validate().is_err());

        let depth = StreamConfiguration {
            queue_depth: 9,
            ..Default::default()
        };
        assert!(depth.validate().is_err());
    }

    #[test]
    fn test_frame_interval_media_time() {
        let mut config = StreamConfiguration::default();
        assert_eq!(config.minimum_frame_interval_time(), MediaTime::new(10, 600));

        config.set_minimum_frame_interval_time(MediaTime::new(1, 30));
        assert!((config.minimum_frame_interval - 1.0 / 30.0).abs() < 1e-9);

        config.set_minimum_frame_interval_time(MediaTime::new(1, 0));
        assert_eq!(config.frame_interval(), None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: StreamConfiguration =
            serde_json::from_str(r#"{ "width": 640, "captures_audio": true }"#).unwrap();
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 1080);
        assert!(config.captures_audio);
    }
}
