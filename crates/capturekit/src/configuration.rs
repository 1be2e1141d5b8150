//! Stream configuration handles.

use std::ffi::CString;

use capturekit_ffi as ffi;
use capturekit_types::{PixelFormat, StreamConfiguration as StreamSettings};

use crate::error::{check, CaptureError, Result};
use crate::handle::{adopt, handle_type, take_string, HandleType};

handle_type!(
    /// A native configuration object, built from [`StreamSettings`].
    ///
    /// Values are only validated when a stream or screenshot uses them.
    StreamConfiguration
);

impl StreamConfiguration {
    /// A configuration with default settings.
    pub fn new() -> Result<Self> {
        // SAFETY: the C ABI hands us a new reference.
        unsafe { adopt(ffi::sc_stream_configuration_create(), "configuration") }
    }

    pub fn from_settings(settings: &StreamSettings) -> Result<Self> {
        let configuration = Self::new()?;
        configuration.apply(settings)?;
        Ok(configuration)
    }

    /// Overwrite every field with `settings`.
    pub fn apply(&self, settings: &StreamSettings) -> Result<()> {
        let raw = self.as_ptr();
        check("set width", ffi::sc_stream_configuration_set_width(raw, settings.width))?;
        check("set height", ffi::sc_stream_configuration_set_height(raw, settings.height))?;
        check(
            "set pixel format",
            ffi::sc_stream_configuration_set_pixel_format(raw, settings.pixel_format.four_cc()),
        )?;
        check(
            "set shows cursor",
            ffi::sc_stream_configuration_set_shows_cursor(raw, settings.shows_cursor),
        )?;
        check(
            "set scales to fit",
            ffi::sc_stream_configuration_set_scales_to_fit(raw, settings.scales_to_fit),
        )?;
        check(
            "set preserves aspect ratio",
            ffi::sc_stream_configuration_set_preserves_aspect_ratio(
                raw,
                settings.preserves_aspect_ratio,
            ),
        )?;
        let code = match settings.source_rect {
            Some(rect) => ffi::sc_stream_configuration_set_source_rect(raw, rect),
            None => ffi::sc_stream_configuration_clear_source_rect(raw),
        };
        check("set source rect", code)?;
        check(
            "set captures audio",
            ffi::sc_stream_configuration_set_captures_audio(raw, settings.captures_audio),
        )?;
        check(
            "set sample rate",
            ffi::sc_stream_configuration_set_sample_rate(raw, settings.sample_rate),
        )?;
        check(
            "set channel count",
            ffi::sc_stream_configuration_set_channel_count(raw, settings.channel_count),
        )?;
        check(
            "set captures microphone",
            ffi::sc_stream_configuration_set_captures_microphone(raw, settings.captures_microphone),
        )?;
        check(
            "set excludes current process audio",
            ffi::sc_stream_configuration_set_excludes_current_process_audio(
                raw,
                settings.excludes_current_process_audio,
            ),
        )?;
        check(
            "set minimum frame interval",
            ffi::sc_stream_configuration_set_minimum_frame_interval(
                raw,
                settings.minimum_frame_interval,
            ),
        )?;
        check(
            "set queue depth",
            ffi::sc_stream_configuration_set_queue_depth(raw, settings.queue_depth),
        )?;
        self.set_stream_name(settings.stream_name.as_deref())
    }

    pub fn set_stream_name(&self, name: Option<&str>) -> Result<()> {
        let name = name
            .map(CString::new)
            .transpose()
            .map_err(|_| CaptureError::InteriorNul("stream name"))?;
        let ptr = name.as_ref().map_or(std::ptr::null(), |n| n.as_ptr());
        // SAFETY: `ptr` is null or a NUL-terminated string alive for the call.
        check("set stream name", unsafe {
            ffi::sc_stream_configuration_set_stream_name(self.as_ptr(), ptr)
        })
    }

    /// Read the current values back.
    pub fn settings(&self) -> Result<StreamSettings> {
        let raw = self.as_ptr();
        let four_cc = ffi::sc_stream_configuration_get_pixel_format(raw);
        let pixel_format =
            PixelFormat::from_four_cc(four_cc).ok_or(CaptureError::UnknownPixelFormat(four_cc))?;
        let source_rect = ffi::sc_stream_configuration_get_source_rect(raw);

        Ok(StreamSettings {
            width: ffi::sc_stream_configuration_get_width(raw),
            height: ffi::sc_stream_configuration_get_height(raw),
            pixel_format,
            shows_cursor: ffi::sc_stream_configuration_get_shows_cursor(raw),
            scales_to_fit: ffi::sc_stream_configuration_get_scales_to_fit(raw),
            preserves_aspect_ratio: ffi::sc_stream_configuration_get_preserves_aspect_ratio(raw),
            source_rect: (!source_rect.is_empty()).then_some(source_rect),
            captures_audio: ffi::sc_stream_configuration_get_captures_audio(raw),
            sample_rate: ffi::sc_stream_configuration_get_sample_rate(raw),
            channel_count: ffi::sc_stream_configuration_get_channel_count(raw),
            captures_microphone: ffi::sc_stream_configuration_get_captures_microphone(raw),
            excludes_current_process_audio:
                ffi::sc_stream_configuration_get_excludes_current_process_audio(raw),
            minimum_frame_interval: ffi::sc_stream_configuration_get_minimum_frame_interval(raw),
            queue_depth: ffi::sc_stream_configuration_get_queue_depth(raw),
            // SAFETY: fresh string owned by us.
            stream_name: unsafe { take_string(ffi::sc_stream_configuration_get_stream_name(raw)) },
        })
    }
}

#[cfg(test)]
mod tests {
    use capturekit_types::Rect;

    use super::*;

    #[test]
    fn test_settings_round_trip_through_handle() {
        let settings = StreamSettings {
            width: 1280,
            height: 720,
            pixel_format: PixelFormat::YCbCr420Video,
            source_rect: Some(Rect::new(10.0, 20.0, 640.0, 360.0)),
            captures_audio: true,
            queue_depth: 5,
            stream_name: Some("preview".into()),
            ..StreamSettings::default()
        };
        let configuration = StreamConfiguration::from_settings(&settings).unwrap();
        assert_eq!(configuration.settings().unwrap(), settings);
    }

    #[test]
    fn test_defaults() {
        let configuration = StreamConfiguration::new().unwrap();
        assert_eq!(configuration.settings().unwrap(), StreamSettings::default());
    }

    #[test]
    fn test_interior_nul_name() {
        let configuration = StreamConfiguration::new().unwrap();
        let err = configuration.set_stream_name(Some("a\0b")).unwrap_err();
        assert!(matches!(err, CaptureError::InteriorNul(_)));
    }
}
