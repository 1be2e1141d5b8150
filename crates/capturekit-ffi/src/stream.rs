//! Capture streams.
//!
//! Output callbacks receive a borrowed sample handle, valid until the
//! callback returns. Error callbacks receive a borrowed error handle.
//! Completions receive null on success or an owned error handle.

use std::ffi::c_void;
use std::sync::Arc;

use capturekit_native::{Completion, ErrorHandler, OutputHandler, StreamSession};
use capturekit_types::{OutputType, Status};

use crate::{borrow, bridge, from_raw, invalid_parameter, release_as, status, to_raw, Context};

/// `(context, stream, output_type, sample)`.
pub type ScOutputCallback = Option<
    unsafe extern "C" fn(
        context: *mut c_void,
        stream: *const c_void,
        output_type: i32,
        sample: *const c_void,
    ),
>;

/// `(context, stream, error)`.
pub type ScErrorCallback =
    Option<unsafe extern "C" fn(context: *mut c_void, stream: *const c_void, error: *const c_void)>;

/// `(context, error)`: `error` is null on success, else owned by the caller.
pub type ScCompletion = Option<unsafe extern "C" fn(context: *mut c_void, error: *const c_void)>;

/// Create a stream. The error callback is mandatory.
///
/// Returns null on failure and, when `status_out` is non-null, stores the
/// reason there: -1 for a null filter or configuration, -6 for a missing
/// error callback or an invalid configuration.
///
/// # Safety
///
/// `status_out` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn sc_stream_create(
    filter: *const c_void,
    configuration: *const c_void,
    error_callback: ScErrorCallback,
    context: *mut c_void,
    status_out: *mut i32,
) -> *const c_void {
    let (stream, code) = match (from_raw(filter), from_raw(configuration)) {
        (Some(filter), Some(configuration)) => {
            let context = Context::new(context);
            let error_handler = error_callback.map(|callback| -> ErrorHandler {
                Arc::new(move |stream, error| {
                    // SAFETY: the caller registered this callback for this context.
                    unsafe { callback(context.get(), to_raw(stream), to_raw(error)) }
                })
            });
            match bridge().create_stream(filter, configuration, error_handler) {
                Ok(id) => (to_raw(id), Status::Ok.as_raw()),
                Err(e) => (std::ptr::null(), status(Err(e))),
            }
        }
        _ => (std::ptr::null(), invalid_parameter()),
    };

    if !status_out.is_null() {
        *status_out = code;
    }
    stream
}

/// Register an output callback on a stream-owned serial queue.
#[no_mangle]
pub extern "C" fn sc_stream_add_output(
    stream: *const c_void,
    output_type: i32,
    callback: ScOutputCallback,
    context: *mut c_void,
) -> i32 {
    sc_stream_add_output_with_queue(stream, output_type, callback, context, std::ptr::null())
}

/// Register an output callback on a caller-supplied serial queue (null for
/// a stream-owned one). A concurrent queue is rejected with -1.
#[no_mangle]
pub extern "C" fn sc_stream_add_output_with_queue(
    stream: *const c_void,
    output_type: i32,
    callback: ScOutputCallback,
    context: *mut c_void,
    queue: *const c_void,
) -> i32 {
    let (Some(stream), Some(output_type), Some(callback)) =
        (from_raw(stream), OutputType::from_raw(output_type), callback)
    else {
        return invalid_parameter();
    };

    let context = Context::new(context);
    let handler: OutputHandler = Arc::new(move |stream, output_type, sample| {
        // SAFETY: the caller registered this callback for this context.
        unsafe { callback(context.get(), to_raw(stream), output_type.as_raw(), to_raw(sample)) }
    });
    status(bridge().stream_add_output(stream, output_type, handler, from_raw(queue)))
}

/// Remove every output callback of `output_type`. Returns how many were
/// removed, or a negative status.
#[no_mangle]
pub extern "C" fn sc_stream_remove_output(stream: *const c_void, output_type: i32) -> i32 {
    let (Some(stream), Some(output_type)) = (from_raw(stream), OutputType::from_raw(output_type))
    else {
        return invalid_parameter();
    };
    match bridge().stream_remove_output(stream, output_type) {
        Ok(removed) => removed as i32,
        Err(e) => status(Err(e)),
    }
}

/// Start capturing. -2 if the stream is not freshly created, in which case
/// the completion is not called.
#[no_mangle]
pub extern "C" fn sc_stream_start_capture(
    stream: *const c_void,
    completion: ScCompletion,
    context: *mut c_void,
) -> i32 {
    let Some(stream) = from_raw(stream) else {
        return invalid_parameter();
    };
    status(bridge().stream_start(stream, wrap_completion(completion, context)))
}

/// Alias of [`sc_stream_start_capture`].
#[no_mangle]
pub extern "C" fn sc_stream_start(
    stream: *const c_void,
    completion: ScCompletion,
    context: *mut c_void,
) -> i32 {
    sc_stream_start_capture(stream, completion, context)
}

/// Stop capturing. No output callback runs after the completion.
#[no_mangle]
pub extern "C" fn sc_stream_stop_capture(
    stream: *const c_void,
    completion: ScCompletion,
    context: *mut c_void,
) -> i32 {
    let Some(stream) = from_raw(stream) else {
        return invalid_parameter();
    };
    status(bridge().stream_stop(stream, wrap_completion(completion, context)))
}

/// Alias of [`sc_stream_stop_capture`].
#[no_mangle]
pub extern "C" fn sc_stream_stop(
    stream: *const c_void,
    completion: ScCompletion,
    context: *mut c_void,
) -> i32 {
    sc_stream_stop_capture(stream, completion, context)
}

/// Apply a new configuration. Invalid configurations fail here with -6.
#[no_mangle]
pub extern "C" fn sc_stream_update_configuration(
    stream: *const c_void,
    configuration: *const c_void,
    completion: ScCompletion,
    context: *mut c_void,
) -> i32 {
    let (Some(stream), Some(configuration)) = (from_raw(stream), from_raw(configuration)) else {
        return invalid_parameter();
    };
    status(bridge().stream_update_configuration(
        stream,
        configuration,
        wrap_completion(completion, context),
    ))
}

/// Capture different content without restarting. Allowed while created
/// or capturing; a missing source fails in the completion.
#[no_mangle]
pub extern "C" fn sc_stream_update_content_filter(
    stream: *const c_void,
    filter: *const c_void,
    completion: ScCompletion,
    context: *mut c_void,
) -> i32 {
    let (Some(stream), Some(filter)) = (from_raw(stream), from_raw(filter)) else {
        return invalid_parameter();
    };
    status(bridge().stream_update_content_filter(
        stream,
        filter,
        wrap_completion(completion, context),
    ))
}

/// Lifecycle state (created 0 ... released 6), or -1 for a null stream.
#[no_mangle]
pub extern "C" fn sc_stream_get_state(stream: *const c_void) -> i32 {
    borrow::<StreamSession>(stream).map_or(invalid_parameter(), |s| s.state().as_raw())
}

/// Release a stream. A capturing stream is stopped first; once this
/// returns no callback registered on it runs again.
#[no_mangle]
pub extern "C" fn sc_stream_release(stream: *const c_void) {
    release_as::<StreamSession>(stream);
}

fn wrap_completion(
    completion: ScCompletion,
    context: *mut c_void,
) -> Option<Completion<()>> {
    let callback = completion?;
    let context = Context::new(context);
    Some(Box::new(move |result| {
        let error = match result {
            Ok(()) => std::ptr::null(),
            Err(error) => to_raw(error),
        };
        // SAFETY: the caller registered this callback for this context.
        unsafe { callback(context.get(), error) }
    }))
}
