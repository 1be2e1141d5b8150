//! One-shot screenshots and the images they produce.

use std::ffi::c_void;

use capturekit_native::{Completion, HandleId, Image};
use capturekit_types::Rect;

use crate::content::split;
use crate::{borrow, bridge, checked, from_raw, invalid_parameter, release_as, status, to_raw, Context};

/// `(context, image, error)`: exactly one of `image` and `error` is
/// non-null, and the caller owns it.
pub type ScImageCompletion =
    Option<unsafe extern "C" fn(context: *mut c_void, image: *const c_void, error: *const c_void)>;

/// `(context, sample, error)`: exactly one of `sample` and `error` is
/// non-null, and the caller owns it.
pub type ScSampleBufferCompletion =
    Option<unsafe extern "C" fn(context: *mut c_void, sample: *const c_void, error: *const c_void)>;

fn wrap_completion(
    callback: unsafe extern "C" fn(*mut c_void, *const c_void, *const c_void),
    context: *mut c_void,
) -> Completion<HandleId> {
    let context = Context::new(context);
    Box::new(move |result| {
        let (value, error) = split(result);
        // SAFETY: the caller registered this callback for this context.
        unsafe { callback(context.get(), value, error) }
    })
}

/// Capture a single image. The completion runs exactly once on a bridge
/// thread; an invalid configuration arrives there as a configuration
/// error. Returns -1 without calling it if any argument is null.
#[no_mangle]
pub extern "C" fn sc_screenshot_capture(
    filter: *const c_void,
    configuration: *const c_void,
    completion: ScImageCompletion,
    context: *mut c_void,
) -> i32 {
    let (Some(filter), Some(configuration), Some(callback)) =
        (from_raw(filter), from_raw(configuration), completion)
    else {
        return invalid_parameter();
    };
    status(bridge().capture_screenshot(filter, configuration, wrap_completion(callback, context)))
}

/// Capture a single frame as an owned video sample buffer. Same contract
/// as [`sc_screenshot_capture`].
#[no_mangle]
pub extern "C" fn sc_screenshot_capture_sample_buffer(
    filter: *const c_void,
    configuration: *const c_void,
    completion: ScSampleBufferCompletion,
    context: *mut c_void,
) -> i32 {
    let (Some(filter), Some(configuration), Some(callback)) =
        (from_raw(filter), from_raw(configuration), completion)
    else {
        return invalid_parameter();
    };
    status(bridge().capture_sample_buffer(filter, configuration, wrap_completion(callback, context)))
}

/// Alias of [`sc_screenshot_capture_sample_buffer`].
#[no_mangle]
pub extern "C" fn sc_screenshot_manager_capture_sample_buffer(
    filter: *const c_void,
    configuration: *const c_void,
    completion: ScSampleBufferCompletion,
    context: *mut c_void,
) -> i32 {
    sc_screenshot_capture_sample_buffer(filter, configuration, completion, context)
}

/// Capture a region of the desktop in points, possibly spanning displays.
/// An empty or non-finite rect returns -1 without calling the completion.
#[no_mangle]
pub extern "C" fn sc_screenshot_capture_image_in_rect(
    rect: Rect,
    completion: ScImageCompletion,
    context: *mut c_void,
) -> i32 {
    let Some(callback) = completion else {
        return invalid_parameter();
    };
    status(bridge().capture_image_in_rect(rect, wrap_completion(callback, context)))
}

/// [`sc_screenshot_capture_image_in_rect`] with the rect spelled out.
#[no_mangle]
pub extern "C" fn sc_screenshot_manager_capture_image_in_rect(
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    completion: ScImageCompletion,
    context: *mut c_void,
) -> i32 {
    sc_screenshot_capture_image_in_rect(Rect::new(x, y, width, height), completion, context)
}

/// Alias of [`sc_screenshot_capture`].
#[no_mangle]
pub extern "C" fn sc_screenshot_manager_capture_image(
    filter: *const c_void,
    configuration: *const c_void,
    completion: ScImageCompletion,
    context: *mut c_void,
) -> i32 {
    sc_screenshot_capture(filter, configuration, completion, context)
}

#[no_mangle]
pub extern "C" fn sc_image_get_width(image: *const c_void) -> u32 {
    borrow::<Image>(image).map_or(0, |i| i.width())
}

#[no_mangle]
pub extern "C" fn sc_image_get_height(image: *const c_void) -> u32 {
    borrow::<Image>(image).map_or(0, |i| i.height())
}

/// New owned handle to the image's pixel buffer.
#[no_mangle]
pub extern "C" fn sc_image_copy_pixel_buffer(image: *const c_void) -> *const c_void {
    from_raw(image)
        .and_then(|id| checked(bridge().image_pixel_buffer(id)))
        .map_or(std::ptr::null(), to_raw)
}

#[no_mangle]
pub extern "C" fn sc_image_release(image: *const c_void) {
    release_as::<Image>(image);
}

/// Alias of [`sc_image_release`].
#[no_mangle]
pub extern "C" fn sc_cgimage_release(image: *const c_void) {
    sc_image_release(image);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::{
        sc_content_filter_create_with_display_excluding_windows, sc_content_filter_release,
        sc_error_get_kind, sc_error_release, sc_pixel_buffer_get_plane, sc_pixel_buffer_get_width,
        sc_pixel_buffer_release, sc_sample_buffer_copy_pixel_buffer,
        sc_sample_buffer_get_frame_status, sc_sample_buffer_get_output_type,
        sc_sample_buffer_release, sc_shareable_content_release, sc_stream_configuration_create,
        sc_stream_configuration_release, sc_stream_configuration_set_height,
        sc_stream_configuration_set_width, ScPlaneInfo,
    };
    use capturekit_types::{FrameStatus, OutputType};
    use capturekit_types::ErrorKind;

    fn filter() -> *const c_void {
        let content = discover();
        let filter = unsafe {
            sc_content_filter_create_with_display_excluding_windows(
                first_display(content),
                std::ptr::null(),
                0,
            )
        };
        sc_shareable_content_release(content);
        filter
    }

    #[test]
    fn test_full_hd_bgra_screenshot() {
        let filter = filter();
        let config = sc_stream_configuration_create();
        let (tx, rx) = channel();

        assert_eq!(sc_screenshot_capture(filter, config, Some(forward), ctx(&tx)), 0);
        let (image, error) = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(error, 0);
        let image = image as *const c_void;
        assert_eq!((sc_image_get_width(image), sc_image_get_height(image)), (1920, 1080));

        let buffer = sc_image_copy_pixel_buffer(image);
        sc_image_release(image);
        let mut plane = ScPlaneInfo::default();
        assert_eq!(unsafe { sc_pixel_buffer_get_plane(buffer, 0, &mut plane) }, 0);
        assert_eq!((plane.width, plane.height), (1920, 1080));
        assert!(plane.bytes_per_row >= 1920 * 4);

        sc_pixel_buffer_release(buffer);
        sc_content_filter_release(filter);
        sc_stream_configuration_release(config);
    }

    #[test]
    fn test_invalid_configuration_arrives_async() {
        let filter = filter();
        let config = sc_stream_configuration_create();
        sc_stream_configuration_set_width(config, 0);
        let (tx, rx) = channel();

        assert_eq!(
            sc_screenshot_manager_capture_image(filter, config, Some(forward), ctx(&tx)),
            0
        );
        let (image, error) = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(image, 0);
        let error = error as *const c_void;
        assert_eq!(sc_error_get_kind(error), ErrorKind::Configuration.as_raw());

        sc_error_release(error);
        sc_content_filter_release(filter);
        sc_stream_configuration_release(config);
    }

    #[test]
    fn test_null_completion() {
        let filter = filter();
        let config = sc_stream_configuration_create();
        assert_eq!(sc_screenshot_capture(filter, config, None, std::ptr::null_mut()), -1);
        sc_content_filter_release(filter);
        sc_stream_configuration_release(config);
    }

    #[test]
    fn test_sample_buffer_screenshot() {
        let filter = filter();
        let config = sc_stream_configuration_create();
        sc_stream_configuration_set_width(config, 320);
        sc_stream_configuration_set_height(config, 180);
        let (tx, rx) = channel();

        assert_eq!(
            sc_screenshot_manager_capture_sample_buffer(filter, config, Some(forward), ctx(&tx)),
            0
        );
        let (sample, error) = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(error, 0);
        let sample = sample as *const c_void;
        assert_eq!(sc_sample_buffer_get_output_type(sample), OutputType::Screen.as_raw());
        assert_eq!(sc_sample_buffer_get_frame_status(sample), FrameStatus::Complete.as_raw());

        let buffer = sc_sample_buffer_copy_pixel_buffer(sample);
        sc_sample_buffer_release(sample);
        assert_eq!(sc_pixel_buffer_get_width(buffer), 320);

        sc_pixel_buffer_release(buffer);
        sc_content_filter_release(filter);
        sc_stream_configuration_release(config);
    }

    #[test]
    fn test_image_in_rect() {
        let (tx, rx) = channel();
        assert_eq!(
            sc_screenshot_manager_capture_image_in_rect(0.0, 0.0, 200.0, 100.0, Some(forward), ctx(&tx)),
            0
        );
        let (image, error) = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(error, 0);
        let image = image as *const c_void;
        assert_eq!((sc_image_get_width(image), sc_image_get_height(image)), (200, 100));
        sc_image_release(image);

        let empty = Rect::new(0.0, 0.0, -1.0, 10.0);
        assert_eq!(sc_screenshot_capture_image_in_rect(empty, Some(forward), ctx(&tx)), -1);
        assert_eq!(sc_screenshot_capture_image_in_rect(Rect::new(0.0, 0.0, 1.0, 1.0), None, ctx(&tx)), -1);
        assert!(rx.recv_timeout(std::time::Duration::from_millis(50)).is_err());
    }
}
