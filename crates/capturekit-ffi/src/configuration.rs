//! Stream configurations.
//!
//! Setters never validate ranges; a stream or screenshot validates the
//! whole configuration when it consumes it. Setters return 0, or -1 for a
//! null configuration or a value that has no meaning (an unknown pixel
//! format code).

use std::ffi::{c_char, c_void};

use capturekit_native::ConfigurationObject;
use capturekit_types::{MediaTime, PixelFormat, Rect, Status, StreamConfiguration};

use crate::{borrow, borrowed_str, bridge, invalid_parameter, owned_string, release_as, to_raw};

/// New configuration with default values.
#[no_mangle]
pub extern "C" fn sc_stream_configuration_create() -> *const c_void {
    to_raw(bridge().create_configuration())
}

#[no_mangle]
pub extern "C" fn sc_stream_configuration_release(configuration: *const c_void) {
    release_as::<ConfigurationObject>(configuration);
}

fn update(configuration: *const c_void, f: impl FnOnce(&mut StreamConfiguration)) -> i32 {
    match borrow::<ConfigurationObject>(configuration) {
        Some(object) => {
            object.update(f);
            Status::Ok.as_raw()
        }
        None => invalid_parameter(),
    }
}

fn read<R>(configuration: *const c_void, default: R, f: impl FnOnce(&StreamConfiguration) -> R) -> R {
    borrow::<ConfigurationObject>(configuration).map_or(default, |object| object.read(f))
}

macro_rules! scalar_accessors {
    ($($field:ident: $ty:ty = $default:expr => $setter:ident, $getter:ident;)*) => {
        $(
            #[no_mangle]
            pub extern "C" fn $setter(configuration: *const c_void, value: $ty) -> i32 {
                update(configuration, |c| c.$field = value)
            }

            #[no_mangle]
            pub extern "C" fn $getter(configuration: *const c_void) -> $ty {
                read(configuration, $default, |c| c.$field)
            }
        )*
    };
}

scalar_accessors! {
    width: u32 = 0
        => sc_stream_configuration_set_width, sc_stream_configuration_get_width;
    height: u32 = 0
        => sc_stream_configuration_set_height, sc_stream_configuration_get_height;
    shows_cursor: bool = false
        => sc_stream_configuration_set_shows_cursor, sc_stream_configuration_get_shows_cursor;
    scales_to_fit: bool = false
        => sc_stream_configuration_set_scales_to_fit, sc_stream_configuration_get_scales_to_fit;
    preserves_aspect_ratio: bool = false
        => sc_stream_configuration_set_preserves_aspect_ratio, sc_stream_configuration_get_preserves_aspect_ratio;
    captures_audio: bool = false
        => sc_stream_configuration_set_captures_audio, sc_stream_configuration_get_captures_audio;
    sample_rate: u32 = 0
        => sc_stream_configuration_set_sample_rate, sc_stream_configuration_get_sample_rate;
    channel_count: u32 = 0
        => sc_stream_configuration_set_channel_count, sc_stream_configuration_get_channel_count;
    captures_microphone: bool = false
        => sc_stream_configuration_set_captures_microphone, sc_stream_configuration_get_captures_microphone;
    excludes_current_process_audio: bool = false
        => sc_stream_configuration_set_excludes_current_process_audio, sc_stream_configuration_get_excludes_current_process_audio;
    minimum_frame_interval: f64 = 0.0
        => sc_stream_configuration_set_minimum_frame_interval, sc_stream_configuration_get_minimum_frame_interval;
    queue_depth: u32 = 0
        => sc_stream_configuration_set_queue_depth, sc_stream_configuration_get_queue_depth;
}

/// Set the pixel format by four-char code. Unknown codes return -1 and
/// leave the configuration unchanged.
#[no_mangle]
pub extern "C" fn sc_stream_configuration_set_pixel_format(
    configuration: *const c_void,
    four_cc: u32,
) -> i32 {
    let Some(format) = PixelFormat::from_four_cc(four_cc) else {
        return invalid_parameter();
    };
    update(configuration, |c| c.pixel_format = format)
}

#[no_mangle]
pub extern "C" fn sc_stream_configuration_get_pixel_format(configuration: *const c_void) -> u32 {
    read(configuration, 0, |c| c.pixel_format.four_cc())
}

#[no_mangle]
pub extern "C" fn sc_stream_configuration_set_source_rect(
    configuration: *const c_void,
    rect: Rect,
) -> i32 {
    update(configuration, |c| c.source_rect = Some(rect))
}

/// Capture the whole source again.
#[no_mangle]
pub extern "C" fn sc_stream_configuration_clear_source_rect(configuration: *const c_void) -> i32 {
    update(configuration, |c| c.source_rect = None)
}

/// The source rect, or a zero rect when the whole source is captured.
#[no_mangle]
pub extern "C" fn sc_stream_configuration_get_source_rect(configuration: *const c_void) -> Rect {
    read(configuration, Rect::zero(), |c| c.source_rect.unwrap_or_else(Rect::zero))
}

#[no_mangle]
pub extern "C" fn sc_stream_configuration_set_minimum_frame_interval_time(
    configuration: *const c_void,
    time: MediaTime,
) -> i32 {
    update(configuration, |c| c.set_minimum_frame_interval_time(time))
}

#[no_mangle]
pub extern "C" fn sc_stream_configuration_get_minimum_frame_interval_time(
    configuration: *const c_void,
) -> MediaTime {
    read(configuration, MediaTime::zero(), |c| c.minimum_frame_interval_time())
}

/// Set the stream name. Null clears it.
///
/// # Safety
///
/// `name` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn sc_stream_configuration_set_stream_name(
    configuration: *const c_void,
    name: *const c_char,
) -> i32 {
    let name = if name.is_null() {
        None
    } else {
        match borrowed_str(name) {
            Some(name) => Some(name.to_string()),
            None => return invalid_parameter(),
        }
    };
    update(configuration, |c| c.stream_name = name)
}

/// Owned copy of the stream name, or null.
#[no_mangle]
pub extern "C" fn sc_stream_configuration_get_stream_name(configuration: *const c_void) -> *mut c_char {
    read(configuration, std::ptr::null_mut(), |c| {
        c.stream_name.as_deref().map_or(std::ptr::null_mut(), owned_string)
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::{CStr, CString};

    use super::*;
    use crate::sc_free_string;

    #[test]
    fn test_defaults() {
        let config = sc_stream_configuration_create();
        assert_eq!(sc_stream_configuration_get_width(config), 1920);
        assert_eq!(sc_stream_configuration_get_height(config), 1080);
        assert_eq!(
            sc_stream_configuration_get_pixel_format(config),
            PixelFormat::Bgra32.four_cc()
        );
        assert!(sc_stream_configuration_get_shows_cursor(config));
        assert_eq!(sc_stream_configuration_get_queue_depth(config), 3);
        assert_eq!(sc_stream_configuration_get_source_rect(config), Rect::zero());
        sc_stream_configuration_release(config);
    }

    #[test]
    fn test_setters_round_trip_through_getters() {
        let config = sc_stream_configuration_create();
        assert_eq!(sc_stream_configuration_set_width(config, 640), 0);
        assert_eq!(sc_stream_configuration_set_captures_audio(config, true), 0);
        assert_eq!(sc_stream_configuration_set_minimum_frame_interval(config, 0.5), 0);

        assert_eq!(sc_stream_configuration_get_width(config), 640);
        assert!(sc_stream_configuration_get_captures_audio(config));
        let time = sc_stream_configuration_get_minimum_frame_interval_time(config);
        assert_eq!((time.value, time.timescale), (300, 600));
        sc_stream_configuration_release(config);
    }

    #[test]
    fn test_unknown_pixel_format_is_rejected() {
        let config = sc_stream_configuration_create();
        let bogus = u32::from_be_bytes(*b"zzzz");
        assert_eq!(sc_stream_configuration_set_pixel_format(config, bogus), -1);
        assert_eq!(
            sc_stream_configuration_get_pixel_format(config),
            PixelFormat::Bgra32.four_cc()
        );

        let yuv = PixelFormat::YCbCr420Video.four_cc();
        assert_eq!(sc_stream_configuration_set_pixel_format(config, yuv), 0);
        assert_eq!(sc_stream_configuration_get_pixel_format(config), yuv);
        sc_stream_configuration_release(config);
    }

    #[test]
    fn test_stream_name() {
        let config = sc_stream_configuration_create();
        assert!(sc_stream_configuration_get_stream_name(config).is_null());

        let name = CString::new("demo").unwrap();
        assert_eq!(unsafe { sc_stream_configuration_set_stream_name(config, name.as_ptr()) }, 0);
        let raw = sc_stream_configuration_get_stream_name(config);
        let copy = unsafe { CStr::from_ptr(raw) }.to_str().unwrap().to_string();
        unsafe { sc_free_string(raw) };
        assert_eq!(copy, "demo");
        sc_stream_configuration_release(config);
    }

    #[test]
    fn test_null_configuration() {
        assert_eq!(sc_stream_configuration_set_height(std::ptr::null(), 10), -1);
        assert_eq!(sc_stream_configuration_get_height(std::ptr::null()), 0);
    }
}
