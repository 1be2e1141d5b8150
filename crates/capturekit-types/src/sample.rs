//! Output channels, timing and per-frame metadata.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::Rect;

/// Buffer-type tag of an output channel.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputType {
    /// Video frames.
    Screen = 0,

    /// System audio.
    Audio = 1,

    /// Microphone audio.
    Microphone = 2,
}

impl OutputType {
    pub const fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Screen),
            1 => Some(Self::Audio),
            2 => Some(Self::Microphone),
            _ => None,
        }
    }

    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    pub const fn is_audio(self) -> bool {
        matches!(self, Self::Audio | Self::Microphone)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Screen => "screen",
            Self::Audio => "audio",
            Self::Microphone => "microphone",
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status of a delivered video frame.
#[repr(i32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameStatus {
    /// The frame carries new content.
    #[default]
    Complete = 0,

    /// Nothing changed since the previous frame.
    Idle = 1,

    /// The frame is blank.
    Blank = 2,

    /// Capture is suspended.
    Suspended = 3,

    /// First frame after start.
    Started = 4,

    /// Last frame before stop.
    Stopped = 5,
}

impl FrameStatus {
    pub const fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Complete),
            1 => Some(Self::Idle),
            2 => Some(Self::Blank),
            3 => Some(Self::Suspended),
            4 => Some(Self::Started),
            5 => Some(Self::Stopped),
            _ => None,
        }
    }

    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Frames with this status carry a pixel buffer.
    pub const fn has_content(self) -> bool {
        matches!(self, Self::Complete | Self::Started)
    }
}

/// A rational timestamp: `value / timescale` seconds.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
}

impl MediaTime {
    /// Nanosecond timescale used for capture clocks.
    pub const NANOSECOND_TIMESCALE: i32 = 1_000_000_000;

    pub const fn new(value: i64, timescale: i32) -> Self {
        Self { value, timescale }
    }

    pub const fn zero() -> Self {
        Self::new(0, 1)
    }

    /// Build from seconds using the given timescale.
    pub fn from_seconds(seconds: f64, timescale: i32) -> Self {
        Self::new((seconds * f64::from(timescale)).round() as i64, timescale)
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Self::new(nanos as i64, Self::NANOSECOND_TIMESCALE)
    }

    /// Seconds as a float. An invalid timescale yields 0.
    pub fn seconds(&self) -> f64 {
        if self.timescale <= 0 {
            return 0.0;
        }
        self.value as f64 / f64::from(self.timescale)
    }

    /// Returns false unless the timescale is positive.
    pub fn is_valid(&self) -> bool {
        self.timescale > 0
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::zero()
    }
}

/// Metadata attached to a video frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub status: FrameStatus,

    /// Host time at which the frame was composed, in nanoseconds.
    pub display_time: u64,

    /// Region of the output that holds captured content.
    pub content_rect: Rect,

    /// Scale applied to fit content into the output.
    pub content_scale: f64,

    /// Point-to-pixel scale of the source.
    pub scale_factor: f64,

    /// Monotonically increasing per stream.
    pub sequence: u64,
}

/// Format of an audio sample buffer: interleaved 32-bit float PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channel_count: u32,
}

impl AudioFormat {
    pub const BYTES_PER_SAMPLE: usize = 4;

    /// Bytes of one interleaved frame across all channels.
    pub fn bytes_per_frame(&self) -> usize {
        self.channel_count as usize * Self::BYTES_PER_SAMPLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_type_round_trip() {
        for raw in 0..3 {
            let ty = OutputType::from_raw(raw).unwrap();
            assert_eq!(ty.as_raw(), raw);
        }
        assert_eq!(OutputType::from_raw(7), None);
        assert!(OutputType::Microphone.is_audio());
        assert!(!OutputType::Screen.is_audio());
    }

    #[test]
    fn test_media_time_seconds() {
        let t = MediaTime::from_seconds(1.0 / 60.0, 600);
        assert_eq!(t, MediaTime::new(10, 600));
        assert!((t.seconds() - 1.0 / 60.0).abs() < 1e-9);
        assert_eq!(MediaTime::new(5, 0).seconds(), 0.0);
    }

    #[test]
    fn test_frame_status_content() {
        assert!(FrameStatus::Complete.has_content());
        assert!(!FrameStatus::Idle.has_content());
        assert_eq!(FrameStatus::from_raw(5), Some(FrameStatus::Stopped));
    }
}
