//! Media samples delivered to output handlers.

use bytes::Bytes;
use capturekit_types::{AudioFormat, FrameInfo, MediaTime, OutputType};

use crate::pixel_buffer::PixelBuffer;

/// What a sample carries.
#[derive(Debug, Clone)]
pub enum SamplePayload {
    Video {
        info: FrameInfo,

        /// Absent for frames without new content.
        pixel_buffer: Option<PixelBuffer>,
    },
    Audio {
        format: AudioFormat,
        frame_count: usize,

        /// Interleaved 32-bit float PCM.
        data: Bytes,
    },
}

/// One captured media sample.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    pub output_type: OutputType,
    pub presentation_time: MediaTime,
    pub duration: MediaTime,
    pub payload: SamplePayload,
}

impl SampleBuffer {
    pub fn video(
        presentation_time: MediaTime,
        duration: MediaTime,
        info: FrameInfo,
        pixel_buffer: Option<PixelBuffer>,
    ) -> Self {
        Self {
            output_type: OutputType::Screen,
            presentation_time,
            duration,
            payload: SamplePayload::Video { info, pixel_buffer },
        }
    }

    /// An audio sample from interleaved float PCM.
    pub fn audio(
        output_type: OutputType,
        presentation_time: MediaTime,
        format: AudioFormat,
        samples: &[f32],
    ) -> Self {
        let frame_count = samples.len() / format.channel_count.max(1) as usize;
        let mut data = Vec::with_capacity(samples.len() * AudioFormat::BYTES_PER_SAMPLE);
        for sample in samples {
            data.extend_from_slice(&sample.to_ne_bytes());
        }

        Self {
            output_type,
            presentation_time,
            duration: MediaTime::new(frame_count as i64, format.sample_rate as i32),
            payload: SamplePayload::Audio {
                format,
                frame_count,
                data: Bytes::from(data),
            },
        }
    }

    pub fn frame_info(&self) -> Option<&FrameInfo> {
        match &self.payload {
            SamplePayload::Video { info, .. } => Some(info),
            SamplePayload::Audio { .. } => None,
        }
    }

    pub fn pixel_buffer(&self) -> Option<&PixelBuffer> {
        match &self.payload {
            SamplePayload::Video { pixel_buffer, .. } => pixel_buffer.as_ref(),
            SamplePayload::Audio { .. } => None,
        }
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        match &self.payload {
            SamplePayload::Audio { format, .. } => Some(*format),
            SamplePayload::Video { .. } => None,
        }
    }

    /// Audio frames (one sample per channel), or 1 for video.
    pub fn num_samples(&self) -> usize {
        match &self.payload {
            SamplePayload::Audio { frame_count, .. } => *frame_count,
            SamplePayload::Video { .. } => 1,
        }
    }

    pub fn audio_data(&self) -> Option<&Bytes> {
        match &self.payload {
            SamplePayload::Audio { data, .. } => Some(data),
            SamplePayload::Video { .. } => None,
        }
    }

    /// Copy up to `dest.len()` bytes of audio data. Returns the count copied.
    pub fn copy_audio_data(&self, dest: &mut [u8]) -> usize {
        let Some(data) = self.audio_data() else {
            return 0;
        };
        let n = data.len().min(dest.len());
        dest[..n].copy_from_slice(&data[..n]);
        n
    }
}
