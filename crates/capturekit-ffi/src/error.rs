//! Error objects and owned strings.

use std::ffi::{c_char, c_void, CString};

use capturekit_native::NativeError;
use capturekit_types::ErrorKind;

use crate::{borrow, owned_string, release_as};

/// Describe an error. The string is owned by the caller; free it with
/// `sc_free_string`. Null for a null error.
#[no_mangle]
pub extern "C" fn sc_error_copy_description(error: *const c_void) -> *mut c_char {
    match borrow::<NativeError>(error) {
        Some(error) => owned_string(&error.describe()),
        None => std::ptr::null_mut(),
    }
}

/// Alias of [`sc_error_copy_description`].
#[no_mangle]
pub extern "C" fn sc_get_error_description(error: *const c_void) -> *mut c_char {
    sc_error_copy_description(error)
}

/// Error kind code (unknown 0 ... permission denied 8).
#[no_mangle]
pub extern "C" fn sc_error_get_kind(error: *const c_void) -> i32 {
    borrow::<NativeError>(error).map_or(ErrorKind::Unknown.as_raw(), |e| e.kind.as_raw())
}

/// Provider domain code, or 0.
#[no_mangle]
pub extern "C" fn sc_error_get_code(error: *const c_void) -> i32 {
    borrow::<NativeError>(error).map_or(0, |e| e.code)
}

/// Release an error handle delivered to a completion.
#[no_mangle]
pub extern "C" fn sc_error_release(error: *const c_void) {
    release_as::<NativeError>(error);
}

/// Free a string returned by any `sc_*` function.
///
/// # Safety
///
/// `string` must be null or a pointer returned by this library that has not
/// been freed yet.
#[no_mangle]
pub unsafe extern "C" fn sc_free_string(string: *mut c_char) {
    if !string.is_null() {
        drop(CString::from_raw(string));
    }
}
