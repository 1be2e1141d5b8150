//! Owned and borrowed handles.
//!
//! An [`OwnedHandle`] holds one reference to a native object and releases
//! it on drop; cloning retains. A [`Borrowed`] view wraps a handle the
//! wrapper does not own (snapshot array elements, callback arguments) and
//! never releases it. Call [`Borrowed::retain`] to keep the object past
//! the borrow.

use std::ffi::{c_char, c_void, CStr};
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;

use capturekit_ffi as ffi;
use capturekit_types::ErrorKind;

/// One reference to a native object.
pub struct OwnedHandle(*const c_void);

// SAFETY: handles are plain ids into a thread-safe table; the bridge
// serialises every access to the object behind them.
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    /// Take ownership of a handle returned by the C ABI. None for null.
    ///
    /// # Safety
    ///
    /// `raw` must be null or a handle whose reference the caller owns.
    pub unsafe fn from_raw(raw: *const c_void) -> Option<Self> {
        (!raw.is_null()).then_some(Self(raw))
    }

    /// The raw handle, still owned by `self`.
    pub fn as_ptr(&self) -> *const c_void {
        self.0
    }

    /// Give up ownership without releasing.
    pub fn into_raw(self) -> *const c_void {
        ManuallyDrop::new(self).0
    }

    /// Current reference count.
    pub fn retain_count(&self) -> usize {
        ffi::sc_handle_get_retain_count(self.0).max(0) as usize
    }
}

impl Clone for OwnedHandle {
    fn clone(&self) -> Self {
        Self(ffi::sc_retain(self.0))
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        ffi::sc_release(self.0);
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnedHandle({:#x})", self.0 as usize)
    }
}

/// A typed wrapper around an [`OwnedHandle`].
pub trait HandleType: Sized {
    const NAME: &'static str;

    fn from_owned(handle: OwnedHandle) -> Self;

    fn handle(&self) -> &OwnedHandle;

    fn as_ptr(&self) -> *const c_void {
        self.handle().as_ptr()
    }
}

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name(crate::handle::OwnedHandle);

        impl crate::handle::HandleType for $name {
            const NAME: &'static str = stringify!($name);

            fn from_owned(handle: crate::handle::OwnedHandle) -> Self {
                Self(handle)
            }

            fn handle(&self) -> &crate::handle::OwnedHandle {
                &self.0
            }
        }
    };
}

pub(crate) use handle_type;

/// Take an owned handle from the C ABI, or report which call returned null.
///
/// # Safety
///
/// Same contract as [`OwnedHandle::from_raw`].
pub(crate) unsafe fn adopt<T: HandleType>(
    raw: *const c_void,
    operation: &'static str,
) -> crate::Result<T> {
    OwnedHandle::from_raw(raw)
        .map(T::from_owned)
        .ok_or(crate::CaptureError::NullHandle(operation))
}

/// A non-owning view of a handle, valid for `'a`.
pub struct Borrowed<'a, T: HandleType> {
    inner: ManuallyDrop<T>,
    _source: PhantomData<&'a ()>,
}

impl<'a, T: HandleType> Borrowed<'a, T> {
    /// # Safety
    ///
    /// `raw` must be a live, non-null handle of kind `T` for all of `'a`.
    pub(crate) unsafe fn from_raw(raw: *const c_void) -> Option<Self> {
        let handle = OwnedHandle::from_raw(raw)?;
        Some(Self {
            inner: ManuallyDrop::new(T::from_owned(handle)),
            _source: PhantomData,
        })
    }

    /// Take a new reference, independent of the borrow's source.
    pub fn retain(&self) -> T {
        T::from_owned(self.inner.handle().clone())
    }
}

impl<T: HandleType> Deref for Borrowed<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: HandleType + fmt::Debug> fmt::Debug for Borrowed<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Borrowed").field(&*self.inner).finish()
    }
}

/// Copy a string returned by the C ABI and free the original.
///
/// # Safety
///
/// `raw` must be null or a string allocated by the C ABI.
pub(crate) unsafe fn take_string(raw: *mut c_char) -> Option<String> {
    if raw.is_null() {
        return None;
    }
    let text = CStr::from_ptr(raw).to_string_lossy().into_owned();
    ffi::sc_free_string(raw);
    Some(text)
}

handle_type!(
    /// A native error object.
    ErrorObject
);

impl ErrorObject {
    /// Human-readable description. Identical on every call.
    pub fn describe(&self) -> String {
        // SAFETY: the description is a fresh string owned by us.
        unsafe { take_string(ffi::sc_error_copy_description(self.as_ptr())) }.unwrap_or_default()
    }

    /// Taxonomy bucket, [`ErrorKind::Unknown`] for unrecognised values.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_raw(ffi::sc_error_get_kind(self.as_ptr()))
    }

    /// Provider domain code (0 when there is none).
    pub fn code(&self) -> i32 {
        ffi::sc_error_get_code(self.as_ptr())
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{capture_image, ContentFilter, ShareableContent, StreamConfiguration, StreamSettings};

    #[test]
    fn test_null_is_not_adopted() {
        assert!(unsafe { OwnedHandle::from_raw(std::ptr::null()) }.is_none());
        let err = unsafe { adopt::<ErrorObject>(std::ptr::null(), "op") }.unwrap_err();
        assert!(matches!(err, crate::CaptureError::NullHandle("op")));
    }

    #[test]
    fn test_describe_is_idempotent() {
        let timeout = Duration::from_secs(5);
        let content = ShareableContent::get().unwrap().wait_timeout(timeout).unwrap();
        let filter = ContentFilter::display_excluding_windows(&content.displays()[0], &[]).unwrap();
        let configuration = StreamConfiguration::from_settings(&StreamSettings {
            height: 0,
            ..StreamSettings::default()
        })
        .unwrap();

        // Go through the C ABI to keep hold of the error object itself.
        let (tx, rx) = crossbeam_channel::bounded::<usize>(1);
        unsafe extern "C" fn forward(context: *mut c_void, _image: *const c_void, error: *const c_void) {
            let tx = &*(context as *const crossbeam_channel::Sender<usize>);
            let _ = tx.send(error as usize);
        }
        let context = &tx as *const crossbeam_channel::Sender<usize> as *mut c_void;
        assert_eq!(
            ffi::sc_screenshot_capture(filter.as_ptr(), configuration.as_ptr(), Some(forward), context),
            0
        );
        let raw = rx.recv_timeout(timeout).unwrap() as *const c_void;
        let error = ErrorObject::from_owned(unsafe { OwnedHandle::from_raw(raw) }.unwrap());

        let first = error.describe();
        assert!(!first.is_empty());
        assert_eq!(error.describe(), first);
        assert_eq!(error.to_string(), first);
        assert_eq!(error.kind(), ErrorKind::Configuration);

        // The wrapper's own path yields the same classification.
        let err = capture_image(&filter, &configuration)
            .unwrap()
            .wait_timeout(timeout)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.to_string(), first);
    }
}
