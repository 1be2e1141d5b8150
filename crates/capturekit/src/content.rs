//! Shareable content discovery.

use std::ffi::c_void;

use capturekit_ffi as ffi;
use capturekit_types::{DiscoveryOptions, Rect};
use tracing::instrument;

use crate::completion::{handle_trampoline, submit, Completion};
use crate::error::Result;
use crate::handle::{handle_type, take_string, Borrowed, HandleType, OwnedHandle};

handle_type!(
    /// A point-in-time snapshot of displays, windows and applications.
    ///
    /// Elements are borrowed from the snapshot. Retain one to keep it after
    /// the snapshot is dropped.
    ShareableContent
);

handle_type!(Display);
handle_type!(Window);
handle_type!(RunningApplication);

type ArrayGetter = extern "C" fn(*const c_void, *mut usize) -> *mut *const c_void;

impl ShareableContent {
    /// Discover capturable content with default options.
    pub fn get() -> Result<Completion<Self>> {
        Self::get_with_options(DiscoveryOptions::default())
    }

    /// Discover capturable content, filtering windows by `options`.
    #[instrument(name = "discover")]
    pub fn get_with_options(options: DiscoveryOptions) -> Result<Completion<Self>> {
        submit("discovery", |context| {
            ffi::sc_shareable_content_get_with_options(
                options.exclude_desktop_windows,
                options.on_screen_windows_only,
                Some(handle_trampoline::<Self>),
                context,
            )
        })
    }

    pub fn displays(&self) -> Vec<Borrowed<'_, Display>> {
        self.elements(ffi::sc_shareable_content_get_displays)
    }

    pub fn windows(&self) -> Vec<Borrowed<'_, Window>> {
        self.elements(ffi::sc_shareable_content_get_windows)
    }

    pub fn applications(&self) -> Vec<Borrowed<'_, RunningApplication>> {
        self.elements(ffi::sc_shareable_content_get_applications)
    }

    fn elements<T: HandleType>(&self, getter: ArrayGetter) -> Vec<Borrowed<'_, T>> {
        let mut count = 0usize;
        let array = getter(self.as_ptr(), &mut count);
        if array.is_null() {
            return Vec::new();
        }
        // SAFETY: the array holds `count` element handles owned by the
        // snapshot, which outlives the returned borrows.
        let elements = unsafe { std::slice::from_raw_parts(array, count) }
            .iter()
            .filter_map(|&raw| unsafe { Borrowed::from_raw(raw) })
            .collect();
        unsafe { ffi::sc_free_array(array.cast()) };
        elements
    }
}

impl Display {
    pub fn display_id(&self) -> u32 {
        ffi::sc_display_get_display_id(self.as_ptr())
    }

    pub fn frame(&self) -> Rect {
        ffi::sc_display_get_frame(self.as_ptr())
    }

    /// Width in points.
    pub fn width(&self) -> u32 {
        ffi::sc_display_get_width(self.as_ptr())
    }

    /// Height in points.
    pub fn height(&self) -> u32 {
        ffi::sc_display_get_height(self.as_ptr())
    }

    pub fn scale_factor(&self) -> f64 {
        ffi::sc_display_get_scale_factor(self.as_ptr())
    }
}

impl Window {
    pub fn window_id(&self) -> u32 {
        ffi::sc_window_get_window_id(self.as_ptr())
    }

    pub fn title(&self) -> Option<String> {
        // SAFETY: the title is a fresh string owned by us.
        unsafe { take_string(ffi::sc_window_get_title(self.as_ptr())) }
    }

    pub fn frame(&self) -> Rect {
        ffi::sc_window_get_frame(self.as_ptr())
    }

    pub fn window_layer(&self) -> i32 {
        ffi::sc_window_get_window_layer(self.as_ptr())
    }

    pub fn is_on_screen(&self) -> bool {
        ffi::sc_window_is_on_screen(self.as_ptr())
    }

    pub fn is_desktop(&self) -> bool {
        ffi::sc_window_is_desktop(self.as_ptr())
    }

    /// The application owning this window, as a new owned handle.
    pub fn owning_application(&self) -> Option<RunningApplication> {
        let raw = ffi::sc_window_get_owning_application(self.as_ptr());
        // SAFETY: the C ABI hands us a new reference.
        unsafe { OwnedHandle::from_raw(raw) }.map(RunningApplication::from_owned)
    }
}

impl RunningApplication {
    pub fn bundle_identifier(&self) -> String {
        // SAFETY: fresh string owned by us.
        unsafe { take_string(ffi::sc_running_application_get_bundle_identifier(self.as_ptr())) }
            .unwrap_or_default()
    }

    pub fn application_name(&self) -> String {
        // SAFETY: fresh string owned by us.
        unsafe { take_string(ffi::sc_running_application_get_application_name(self.as_ptr())) }
            .unwrap_or_default()
    }

    pub fn process_id(&self) -> i32 {
        ffi::sc_running_application_get_process_id(self.as_ptr())
    }
}
