//! C ABI for the capture bridge.
//!
//! Every object crosses the boundary as an opaque `const void *` handle.
//! Functions that return a handle, array or string transfer ownership to
//! the caller, who frees it with the paired `_release`/`_free` function.
//! Handle parameters are borrowed.
//!
//! A null handle is a parameter error. Any other misuse of a handle (a
//! released, unknown or wrongly typed one) is logged and aborts the
//! process: carrying on would mean acting on memory the caller already
//! gave up.
//!
//! The process-wide [`Bridge`] is created on first use with the synthetic
//! provider, unless [`install_provider`] ran first.

mod buffer;
mod configuration;
mod content;
mod error;
mod filter;
mod queue;
mod screenshot;
mod stream;

pub use buffer::*;
pub use configuration::*;
pub use content::*;
pub use error::*;
pub use filter::*;
pub use queue::*;
pub use screenshot::*;
pub use stream::*;

use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Arc;

use capturekit_native::{
    Bridge, BridgeError, CaptureProvider, ContractViolation, HandleId, NativeType,
};
use capturekit_types::Status;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{error, info, warn};

static BRIDGE: OnceCell<Bridge> = OnceCell::new();

/// Errors from [`install_provider`].
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("the capture bridge is already running")]
    AlreadyInstalled,

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Route every `sc_*` call in this process to `provider`.
///
/// Must run before the first `sc_*` call.
pub fn install_provider(provider: Arc<dyn CaptureProvider>) -> Result<(), InstallError> {
    let bridge = Bridge::new(provider)?;
    BRIDGE
        .set(bridge)
        .map_err(|_| InstallError::AlreadyInstalled)?;
    info!("Capture provider installed");
    Ok(())
}

/// The process-wide bridge.
pub fn bridge() -> &'static Bridge {
    match BRIDGE.get_or_try_init(Bridge::synthetic) {
        Ok(bridge) => bridge,
        Err(e) => {
            error!(error = %e, "Failed to start the capture bridge");
            std::process::abort()
        }
    }
}

/// Opaque context pointer handed back to C callbacks.
///
/// The caller promises the pointer may be used from any thread.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Context(*mut c_void);

// SAFETY: the pointer is never dereferenced here, only passed back to the
// caller's callback, which owns its thread-safety.
unsafe impl Send for Context {}
unsafe impl Sync for Context {}

impl Context {
    pub(crate) fn new(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    pub(crate) fn get(self) -> *mut c_void {
        self.0
    }
}

pub(crate) fn to_raw(id: HandleId) -> *const c_void {
    id.as_raw() as usize as *const c_void
}

pub(crate) fn opt_to_raw(id: Option<HandleId>) -> *const c_void {
    id.map_or(std::ptr::null(), to_raw)
}

pub(crate) fn from_raw(raw: *const c_void) -> Option<HandleId> {
    HandleId::from_raw(raw as usize as u64)
}

/// Log a contract violation and abort.
pub(crate) fn fatal(violation: ContractViolation) -> ! {
    error!(%violation, "Handle contract violated at the C boundary, aborting");
    std::process::abort()
}

/// Unwrap a handle result, aborting on anything but a null handle.
pub(crate) fn checked<T>(result: Result<T, ContractViolation>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(ContractViolation::Null) => None,
        Err(violation) => fatal(violation),
    }
}

/// Borrow a handle as `T`. Null yields None; any other misuse aborts.
pub(crate) fn borrow<T: NativeType>(raw: *const c_void) -> Option<Arc<T>> {
    let id = from_raw(raw)?;
    checked(bridge().borrow::<T>(id))
}

/// Borrow the handle ids behind a caller array of `count` handles.
///
/// # Safety
///
/// `ptr` must be null or point to `count` readable handles.
pub(crate) unsafe fn handle_slice(ptr: *const *const c_void, count: usize) -> Option<Vec<HandleId>> {
    if count == 0 {
        return Some(Vec::new());
    }
    if ptr.is_null() {
        return None;
    }
    std::slice::from_raw_parts(ptr, count)
        .iter()
        .map(|&raw| from_raw(raw))
        .collect()
}

/// Status code for a handle result.
pub(crate) fn contract_status(result: Result<(), ContractViolation>) -> i32 {
    match checked(result) {
        Some(()) => Status::Ok.as_raw(),
        None => Status::InvalidParameter.as_raw(),
    }
}

/// Status code for a bridge result. Fatal contract violations abort.
pub(crate) fn status(result: Result<(), BridgeError>) -> i32 {
    match result {
        Ok(()) => Status::Ok.as_raw(),
        Err(BridgeError::Contract(violation)) if violation.is_fatal() => fatal(violation),
        Err(e) => {
            warn!(error = %e, "Call rejected");
            e.status().as_raw()
        }
    }
}

pub(crate) fn invalid_parameter() -> i32 {
    Status::InvalidParameter.as_raw()
}

/// Hand a string to the caller; freed with [`sc_free_string`].
pub(crate) fn owned_string(value: &str) -> *mut c_char {
    let sanitized: String = value.chars().filter(|&c| c != '\0').collect();
    match CString::new(sanitized) {
        Ok(s) => s.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Read a caller string. Null or invalid UTF-8 yields None.
///
/// # Safety
///
/// `ptr` must be null or a valid NUL-terminated string.
pub(crate) unsafe fn borrowed_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Generic retain. Returns the same handle as a new owned alias.
#[no_mangle]
pub extern "C" fn sc_retain(handle: *const c_void) -> *const c_void {
    let Some(id) = from_raw(handle) else {
        return std::ptr::null();
    };
    checked(bridge().retain(id)).map_or(std::ptr::null(), to_raw)
}

/// Generic release of any handle.
#[no_mangle]
pub extern "C" fn sc_release(handle: *const c_void) {
    if let Some(id) = from_raw(handle) {
        checked(bridge().release(id));
    }
}

/// Current reference count, or -1 for a null handle.
#[no_mangle]
pub extern "C" fn sc_handle_get_retain_count(handle: *const c_void) -> isize {
    from_raw(handle)
        .and_then(|id| checked(bridge().retain_count(id)))
        .map_or(-1, |count| count as isize)
}

/// Release a handle that must be of kind `T`.
pub(crate) fn release_as<T: NativeType>(handle: *const c_void) {
    if let Some(id) = from_raw(handle) {
        checked(bridge().release_as::<T>(id));
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_null_handles_are_parameter_errors() {
        assert!(sc_retain(std::ptr::null()).is_null());
        sc_release(std::ptr::null());
        assert_eq!(sc_handle_get_retain_count(std::ptr::null()), -1);
    }

    #[test]
    fn test_retain_release_counts() {
        let content = discover();
        assert_eq!(sc_handle_get_retain_count(content), 1);

        let alias = sc_retain(content);
        assert_eq!(alias, content);
        assert_eq!(sc_handle_get_retain_count(content), 2);

        sc_release(alias);
        assert_eq!(sc_handle_get_retain_count(content), 1);
        sc_release(content);
    }

    #[test]
    fn test_handle_round_trip() {
        let id = HandleId::MIN;
        assert_eq!(from_raw(to_raw(id)), Some(id));
        assert_eq!(from_raw(std::ptr::null()), None);
    }

    #[test]
    fn test_owned_string_strips_nul() {
        let raw = owned_string("a\0b");
        // SAFETY: just allocated by owned_string.
        let text = unsafe { CStr::from_ptr(raw) }.to_str().unwrap().to_string();
        unsafe { sc_free_string(raw) };
        assert_eq!(text, "ab");
    }
}
