//! Shareable content discovery and the display, window and application
//! objects it produces.

use std::ffi::{c_char, c_void};

use capturekit_native::{ContentSnapshot, Display, HandleId, RunningApplication, Window};
use capturekit_types::{DiscoveryOptions, Rect, Status};
use tracing::debug;

use crate::{borrow, bridge, checked, from_raw, opt_to_raw, owned_string, release_as, to_raw, Context};

/// `(context, content, error)`: exactly one of `content` and `error` is
/// non-null, and the caller owns it.
pub type ScContentCompletion =
    Option<unsafe extern "C" fn(context: *mut c_void, content: *const c_void, error: *const c_void)>;

/// Discover shareable content with default options.
#[no_mangle]
pub extern "C" fn sc_shareable_content_get(
    completion: ScContentCompletion,
    context: *mut c_void,
) -> i32 {
    sc_shareable_content_get_with_options(false, false, completion, context)
}

/// Discover shareable content. The completion runs exactly once on a bridge
/// thread. Returns -1 without calling it if `completion` is null.
#[no_mangle]
pub extern "C" fn sc_shareable_content_get_with_options(
    exclude_desktop_windows: bool,
    on_screen_windows_only: bool,
    completion: ScContentCompletion,
    context: *mut c_void,
) -> i32 {
    let Some(callback) = completion else {
        return Status::InvalidParameter.as_raw();
    };
    let options = DiscoveryOptions {
        exclude_desktop_windows,
        on_screen_windows_only,
    };
    let context = Context::new(context);

    bridge().discover(
        options,
        Box::new(move |result| {
            let (content, error) = split(result);
            // SAFETY: the caller registered this callback for this context.
            unsafe { callback(context.get(), content, error) }
        }),
    );
    Status::Ok.as_raw()
}

/// Alias of [`sc_shareable_content_get`].
#[no_mangle]
pub extern "C" fn sc_get_shareable_content(
    completion: ScContentCompletion,
    context: *mut c_void,
) -> i32 {
    sc_shareable_content_get(completion, context)
}

/// Alias of [`sc_shareable_content_get_with_options`].
#[no_mangle]
pub extern "C" fn sc_get_shareable_content_with_options(
    exclude_desktop_windows: bool,
    on_screen_windows_only: bool,
    completion: ScContentCompletion,
    context: *mut c_void,
) -> i32 {
    sc_shareable_content_get_with_options(
        exclude_desktop_windows,
        on_screen_windows_only,
        completion,
        context,
    )
}

/// Release a snapshot, and with it every element nobody retained.
#[no_mangle]
pub extern "C" fn sc_shareable_content_release(content: *const c_void) {
    release_as::<ContentSnapshot>(content);
}

/// Borrowed display handles. Free the array with `sc_free_array`.
#[no_mangle]
pub extern "C" fn sc_shareable_content_get_displays(
    content: *const c_void,
    count: *mut usize,
) -> *mut *const c_void {
    element_array(content, count, ContentSnapshot::display_handles)
}

/// Borrowed window handles. Free the array with `sc_free_array`.
#[no_mangle]
pub extern "C" fn sc_shareable_content_get_windows(
    content: *const c_void,
    count: *mut usize,
) -> *mut *const c_void {
    element_array(content, count, ContentSnapshot::window_handles)
}

/// Borrowed application handles. Free the array with `sc_free_array`.
#[no_mangle]
pub extern "C" fn sc_shareable_content_get_applications(
    content: *const c_void,
    count: *mut usize,
) -> *mut *const c_void {
    element_array(content, count, ContentSnapshot::application_handles)
}

/// Free an array container. The handles inside are not released.
///
/// # Safety
///
/// `array` must be null or an array returned by this library that has not
/// been freed yet.
#[no_mangle]
pub unsafe extern "C" fn sc_free_array(array: *mut c_void) {
    if !array.is_null() {
        libc::free(array);
    }
}

// Display.

#[no_mangle]
pub extern "C" fn sc_display_get_display_id(display: *const c_void) -> u32 {
    borrow::<Display>(display).map_or(0, |d| d.display_id)
}

#[no_mangle]
pub extern "C" fn sc_display_get_frame(display: *const c_void) -> Rect {
    borrow::<Display>(display).map_or(Rect::zero(), |d| d.frame)
}

#[no_mangle]
pub extern "C" fn sc_display_get_width(display: *const c_void) -> u32 {
    borrow::<Display>(display).map_or(0, |d| d.width())
}

#[no_mangle]
pub extern "C" fn sc_display_get_height(display: *const c_void) -> u32 {
    borrow::<Display>(display).map_or(0, |d| d.height())
}

#[no_mangle]
pub extern "C" fn sc_display_get_scale_factor(display: *const c_void) -> f64 {
    borrow::<Display>(display).map_or(0.0, |d| d.scale_factor)
}

#[no_mangle]
pub extern "C" fn sc_display_release(display: *const c_void) {
    release_as::<Display>(display);
}

// Window.

#[no_mangle]
pub extern "C" fn sc_window_get_window_id(window: *const c_void) -> u32 {
    borrow::<Window>(window).map_or(0, |w| w.window_id)
}

/// Owned title string, or null if the window has none.
#[no_mangle]
pub extern "C" fn sc_window_get_title(window: *const c_void) -> *mut c_char {
    borrow::<Window>(window)
        .and_then(|w| w.title.as_deref().map(owned_string))
        .unwrap_or(std::ptr::null_mut())
}

#[no_mangle]
pub extern "C" fn sc_window_get_frame(window: *const c_void) -> Rect {
    borrow::<Window>(window).map_or(Rect::zero(), |w| w.frame)
}

/// Stacking layer; the desktop sits far below zero.
#[no_mangle]
pub extern "C" fn sc_window_get_window_layer(window: *const c_void) -> i32 {
    borrow::<Window>(window).map_or(0, |w| w.window_layer)
}

#[no_mangle]
pub extern "C" fn sc_window_is_on_screen(window: *const c_void) -> bool {
    borrow::<Window>(window).is_some_and(|w| w.is_on_screen)
}

#[no_mangle]
pub extern "C" fn sc_window_is_desktop(window: *const c_void) -> bool {
    borrow::<Window>(window).is_some_and(|w| w.is_desktop)
}

/// New owned handle to the window's application, or null.
#[no_mangle]
pub extern "C" fn sc_window_get_owning_application(window: *const c_void) -> *const c_void {
    let Some(id) = from_raw(window) else {
        return std::ptr::null();
    };
    opt_to_raw(checked(bridge().window_owning_application(id)).flatten())
}

#[no_mangle]
pub extern "C" fn sc_window_release(window: *const c_void) {
    release_as::<Window>(window);
}

// Running application.

#[no_mangle]
pub extern "C" fn sc_running_application_get_bundle_identifier(
    application: *const c_void,
) -> *mut c_char {
    borrow::<RunningApplication>(application)
        .map_or(std::ptr::null_mut(), |a| owned_string(&a.bundle_identifier))
}

#[no_mangle]
pub extern "C" fn sc_running_application_get_application_name(
    application: *const c_void,
) -> *mut c_char {
    borrow::<RunningApplication>(application)
        .map_or(std::ptr::null_mut(), |a| owned_string(&a.application_name))
}

#[no_mangle]
pub extern "C" fn sc_running_application_get_process_id(application: *const c_void) -> i32 {
    borrow::<RunningApplication>(application).map_or(0, |a| a.process_id)
}

#[no_mangle]
pub extern "C" fn sc_running_application_release(application: *const c_void) {
    release_as::<RunningApplication>(application);
}

/// `(result, error)` raw pair for a two-handle completion.
pub(crate) fn split(result: Result<HandleId, HandleId>) -> (*const c_void, *const c_void) {
    match result {
        Ok(id) => (to_raw(id), std::ptr::null()),
        Err(error) => (std::ptr::null(), to_raw(error)),
    }
}

fn element_array(
    content: *const c_void,
    count: *mut usize,
    select: fn(&ContentSnapshot) -> &[HandleId],
) -> *mut *const c_void {
    let handles: Vec<*const c_void> = match borrow::<ContentSnapshot>(content) {
        Some(snapshot) => select(&snapshot).iter().copied().map(to_raw).collect(),
        None => Vec::new(),
    };
    if !count.is_null() {
        // SAFETY: the caller passed a writable count.
        unsafe { *count = handles.len() };
    }
    if handles.is_empty() {
        return std::ptr::null_mut();
    }

    let bytes = std::mem::size_of_val(handles.as_slice());
    // SAFETY: a fresh allocation large enough for every element.
    unsafe {
        let array = libc::malloc(bytes) as *mut *const c_void;
        if array.is_null() {
            if !count.is_null() {
                *count = 0;
            }
            return std::ptr::null_mut();
        }
        std::ptr::copy_nonoverlapping(handles.as_ptr(), array, handles.len());
        debug!(elements = handles.len(), "Handle array allocated");
        array
    }
}
