//! Content filters.

use std::ffi::c_void;

use capturekit_native::{ContentFilter, ContractViolation, HandleId};
use capturekit_types::Rect;

use crate::{borrow, bridge, checked, from_raw, handle_slice, release_as, to_raw};

/// # Safety
///
/// `windows` must be null or point to `window_count` handles.
#[no_mangle]
pub unsafe extern "C" fn sc_content_filter_create_with_display_excluding_windows(
    display: *const c_void,
    windows: *const *const c_void,
    window_count: usize,
) -> *const c_void {
    let (Some(display), Some(windows)) = (from_raw(display), handle_slice(windows, window_count))
    else {
        return std::ptr::null();
    };
    created(bridge().filter_display_excluding_windows(display, &windows))
}

/// # Safety
///
/// `windows` must be null or point to `window_count` handles.
#[no_mangle]
pub unsafe extern "C" fn sc_content_filter_create_with_display_including_windows(
    display: *const c_void,
    windows: *const *const c_void,
    window_count: usize,
) -> *const c_void {
    let (Some(display), Some(windows)) = (from_raw(display), handle_slice(windows, window_count))
    else {
        return std::ptr::null();
    };
    created(bridge().filter_display_including_windows(display, &windows))
}

/// # Safety
///
/// `applications` and `windows` must be null or point to the given number
/// of handles.
#[no_mangle]
pub unsafe extern "C" fn sc_content_filter_create_with_display_including_applications_excepting_windows(
    display: *const c_void,
    applications: *const *const c_void,
    application_count: usize,
    windows: *const *const c_void,
    window_count: usize,
) -> *const c_void {
    let (Some(display), Some(applications), Some(windows)) = (
        from_raw(display),
        handle_slice(applications, application_count),
        handle_slice(windows, window_count),
    ) else {
        return std::ptr::null();
    };
    created(bridge().filter_display_including_applications(display, &applications, &windows))
}

#[no_mangle]
pub extern "C" fn sc_content_filter_create_with_desktop_independent_window(
    window: *const c_void,
) -> *const c_void {
    let Some(window) = from_raw(window) else {
        return std::ptr::null();
    };
    created(bridge().filter_desktop_independent_window(window))
}

/// Area captured by the filter, in points.
#[no_mangle]
pub extern "C" fn sc_content_filter_get_content_rect(filter: *const c_void) -> Rect {
    borrow::<ContentFilter>(filter).map_or(Rect::zero(), |f| f.content_rect())
}

/// Pixels per point of the filtered content, 0.0 for a null filter.
#[no_mangle]
pub extern "C" fn sc_content_filter_get_point_pixel_scale(filter: *const c_void) -> f64 {
    borrow::<ContentFilter>(filter).map_or(0.0, |f| f.point_pixel_scale())
}

#[no_mangle]
pub extern "C" fn sc_content_filter_release(filter: *const c_void) {
    release_as::<ContentFilter>(filter);
}

fn created(result: Result<HandleId, ContractViolation>) -> *const c_void {
    checked(result).map_or(std::ptr::null(), to_raw)
}
